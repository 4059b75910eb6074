//! Per-request state.
//!
//! A [`Context`] is built once per matched request and threaded through the
//! endpoint's chain. Request facets are parsed up front, but only the ones
//! named by the endpoint's usage set; everything else stays unparsed.

use crate::body::{OptionReqBody, RequestError};
use crate::compile::Endpoint;
use crate::facet::Facet;
use crate::payload::Payload;
use crate::sse::SseStream;
use crate::ws::WsHandler;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Response};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// App-level shared state: a typed key→value bag populated by plugins at
/// compile time and read by the chain at request time.
#[derive(Default)]
pub struct Memory {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.map.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.map.get(key)?.downcast_ref()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("keys", &self.map.len()).finish()
    }
}

/// The inbound half of a context: raw request parts plus the parsed facets.
#[derive(Debug)]
pub struct ContextRequest {
    pub raw: Parts,
    pub path: String,
    body_source: OptionReqBody,
    body: Option<Value>,
    body_bytes: Option<Bytes>,
    cookies: Option<Value>,
    headers: Option<Value>,
    params: Option<Value>,
    query: Option<Value>,
}

impl ContextRequest {
    /// The parsed value of one facet, if it was loaded and non-empty.
    pub fn facet(&self, facet: Facet) -> Option<&Value> {
        match facet {
            Facet::Body => self.body.as_ref(),
            Facet::Cookies => self.cookies.as_ref(),
            Facet::Headers => self.headers.as_ref(),
            Facet::Params => self.params.as_ref(),
            Facet::Query => self.query.as_ref(),
        }
    }

    pub(crate) fn set_facet(&mut self, facet: Facet, value: Value) {
        let slot = match facet {
            Facet::Body => &mut self.body,
            Facet::Cookies => &mut self.cookies,
            Facet::Headers => &mut self.headers,
            Facet::Params => &mut self.params,
            Facet::Query => &mut self.query,
        };
        *slot = Some(value);
    }

    /// One named path parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// One query value.
    pub fn query(&self, name: &str) -> Option<&Value> {
        self.query.as_ref()?.get(name)
    }

    /// The raw body bytes, present only for `application/octet-stream`.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body_bytes.as_ref()
    }
}

/// The response value accumulated while the chain runs.
pub enum ResponseContent {
    Payload(Payload),
    Stream(SseStream),
    Native(Response<crate::body::ResponseBody>),
}

impl std::fmt::Debug for ResponseContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseContent::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
            ResponseContent::Stream(_) => f.write_str("Stream"),
            ResponseContent::Native(response) => f.debug_tuple("Native").field(&response.status()).finish(),
        }
    }
}

/// The outbound accumulator: content, extra headers and cookies.
#[derive(Debug, Default)]
pub struct ContextResponse {
    pub content: Option<ResponseContent>,
    pub headers: HeaderMap,
    pub cookies: Vec<(String, String)>,
}

impl ContextResponse {
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Queues a cookie; each one becomes its own `Set-Cookie` entry, in
    /// insertion order.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.push((name.into(), value.into()));
    }
}

/// The per-request state threaded through a chain. Never shared between
/// requests and never reused.
pub struct Context {
    pub endpoint: Arc<Endpoint>,
    pub memory: Arc<Memory>,
    pub request: ContextRequest,
    pub response: ContextResponse,
    pub store: Map<String, Value>,
    pub(crate) upgrade: Option<Box<dyn WsHandler>>,
}

impl Context {
    pub fn new(endpoint: Arc<Endpoint>, memory: Arc<Memory>, raw: Parts, body: OptionReqBody) -> Self {
        let path = raw.uri.path().to_owned();

        Context {
            endpoint,
            memory,
            request: ContextRequest {
                raw,
                path,
                body_source: body,
                body: None,
                body_bytes: None,
                cookies: None,
                headers: None,
                params: None,
                query: None,
            },
            response: ContextResponse::default(),
            store: Map::new(),
            upgrade: None,
        }
    }

    /// Parses the facets named by the endpoint's usage set.
    pub async fn load_request(&mut self) -> Result<(), RequestError> {
        let uses = self.endpoint.uses();

        if uses.contains(Facet::Body) {
            self.load_body().await?;
        }

        if uses.contains(Facet::Headers) {
            let mut headers = Map::new();
            for (name, value) in &self.request.raw.headers {
                headers.insert(
                    name.as_str().to_owned(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                );
            }
            if !headers.is_empty() {
                self.request.headers = Some(Value::Object(headers));
            }
        }

        if uses.contains(Facet::Cookies) {
            let mut cookies = Map::new();
            for header in self.request.raw.headers.get_all(COOKIE) {
                parse_cookies(&String::from_utf8_lossy(header.as_bytes()), &mut cookies);
            }
            if !cookies.is_empty() {
                self.request.cookies = Some(Value::Object(cookies));
            }
        }

        if uses.contains(Facet::Params) {
            let params = self.endpoint.pattern.params(&self.request.path);
            if !params.is_empty() {
                self.request.params = Some(Value::Object(params));
            }
        }

        if uses.contains(Facet::Query) {
            if let Some(raw) = self.request.raw.uri.query() {
                let query = parse_query(raw)?;
                if !query.is_empty() {
                    self.request.query = Some(Value::Object(query));
                }
            }
        }

        Ok(())
    }

    async fn load_body(&mut self) -> Result<(), RequestError> {
        let content_type = self
            .request
            .raw
            .headers
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).to_lowercase());
        let kind = content_type.as_deref().map(|full| full.split(';').next().unwrap_or("").trim().to_owned());

        let bytes = self.request.body_source.bytes().await?;
        let kind = kind.as_deref().unwrap_or("");

        if kind == mime::APPLICATION_JSON.essence_str() {
            self.request.body = Some(serde_json::from_slice(&bytes)?);
        } else if kind == mime::APPLICATION_OCTET_STREAM.essence_str() {
            self.request.body_bytes = Some(bytes);
        } else if kind == mime::MULTIPART_FORM_DATA.essence_str() {
            let full = content_type.as_deref().unwrap_or("");
            self.request.body = Some(Value::Object(parse_multipart(full, &bytes)?));
        } else {
            self.request.body = Some(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        }

        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.request.path)
            .field("endpoint", &self.endpoint.path())
            .finish()
    }
}

/// Parses a raw query string.
///
/// Keys ending in `[]` are JSON-decoded, repeated keys accumulate into a
/// list and `+` in a value decodes to a space. Pairs without both a key and
/// a value are skipped.
pub(crate) fn parse_query(raw: &str) -> Result<Map<String, Value>, serde_json::Error> {
    let mut query = Map::new();

    for pair in raw.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.is_empty() || value.is_empty() {
            continue;
        }

        let Ok(key) = urlencoding::decode(key) else {
            continue;
        };
        let Ok(value) = urlencoding::decode(value) else {
            continue;
        };
        let value = value.replace('+', " ");

        let parsed = if key.ends_with("[]") { serde_json::from_str(&value)? } else { Value::String(value) };

        accumulate(&mut query, key.into_owned(), parsed);
    }

    Ok(query)
}

/// Parses one `Cookie` header value into `cookies`. Pairs missing a name or
/// a value are skipped.
pub(crate) fn parse_cookies(header: &str, cookies: &mut Map<String, Value>) {
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }

        cookies.insert(name.to_owned(), Value::String(value.to_owned()));
    }
}

/// Parses a `multipart/form-data` body.
///
/// Repeated field names collapse into a list; file parts become objects
/// carrying the filename and the content as text.
pub(crate) fn parse_multipart(content_type: &str, bytes: &Bytes) -> Result<Map<String, Value>, RequestError> {
    let boundary = content_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("boundary="))
        .map(|value| value.trim_matches('"'))
        .next()
        .ok_or(RequestError::MissingBoundary)?;

    let text = String::from_utf8_lossy(bytes);
    let delimiter = format!("--{boundary}");

    let mut fields = Map::new();

    for part in text.split(delimiter.as_str()) {
        let part = part.trim_start_matches("\r\n");
        if part.is_empty() || part == "--" || part == "--\r\n" {
            continue;
        }

        let Some((head, body)) = part.split_once("\r\n\r\n") else {
            continue;
        };

        let Some(disposition) = head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"))
        else {
            continue;
        };

        let Some(name) = disposition_param(disposition, "name") else {
            continue;
        };
        let filename = disposition_param(disposition, "filename");

        let content = body.strip_suffix("\r\n").unwrap_or(body);
        let value = match filename {
            Some(filename) => json!({ "filename": filename, "content": content }),
            None => Value::String(content.to_owned()),
        };

        accumulate(&mut fields, name, value);
    }

    Ok(fields)
}

/// Inserts `value` under `key`; a repeated key turns the entry into a list.
fn accumulate(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.entry(key) {
        serde_json::map::Entry::Occupied(mut occupied) => {
            let slot = occupied.get_mut();
            if let Value::Array(items) = slot {
                items.push(value);
            } else {
                let first = slot.take();
                *slot = Value::Array(vec![first, value]);
            }
        }
        serde_json::map::Entry::Vacant(vacant) => {
            vacant.insert(value);
        }
    }
}

fn disposition_param(line: &str, name: &str) -> Option<String> {
    let marker = format!("{name}=\"");
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_parse_and_accumulate() {
        let query = parse_query("a=1&a=2&a=3&b=hello+world&skip&=x&c=").unwrap();

        let expected: Vec<Value> = ["1", "2", "3"].iter().map(|s| Value::String((*s).into())).collect();
        assert_eq!(query.get("a"), Some(&Value::Array(expected)));
        assert_eq!(query.get("b"), Some(&Value::String("hello world".into())));
        assert!(query.get("skip").is_none());
        assert!(query.get("c").is_none());
    }

    #[test]
    fn bracket_keys_are_json_decoded() {
        let query = parse_query("ids%5B%5D=%5B1%2C2%5D").unwrap();
        assert_eq!(query.get("ids[]"), Some(&json!([1, 2])));

        assert!(parse_query("ids%5B%5D=not-json").is_err());
    }

    #[test]
    fn percent_escapes_decode() {
        let query = parse_query("name=J%C3%BCrgen").unwrap();
        assert_eq!(query.get("name"), Some(&Value::String("Jürgen".into())));
    }

    #[test]
    fn malformed_cookie_pairs_are_skipped() {
        let mut cookies = Map::new();
        parse_cookies("session=abc; =1; broken; theme=dark ; empty=", &mut cookies);

        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies.get("session"), Some(&Value::String("abc".into())));
        assert_eq!(cookies.get("theme"), Some(&Value::String("dark".into())));
    }

    #[test]
    fn multipart_fields_and_files_parse() {
        let body = concat!(
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "hello\r\n",
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"tag\"\r\n",
            "\r\n",
            "a\r\n",
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"tag\"\r\n",
            "\r\n",
            "b\r\n",
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"x.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "contents\r\n",
            "--xyz--\r\n",
        );

        let fields =
            parse_multipart("multipart/form-data; boundary=xyz", &Bytes::from_static(body.as_bytes())).unwrap();

        assert_eq!(fields.get("title"), Some(&Value::String("hello".into())));
        assert_eq!(fields.get("tag"), Some(&json!(["a", "b"])));
        assert_eq!(fields.get("upload"), Some(&json!({"filename": "x.txt", "content": "contents"})));
    }

    #[test]
    fn multipart_without_boundary_is_an_error() {
        let result = parse_multipart("multipart/form-data", &Bytes::from_static(b""));
        assert!(matches!(result, Err(RequestError::MissingBoundary)));
    }
}
