//! The response normalizer.
//!
//! Turns the accumulated [`ContextResponse`] into one wire response:
//! cookies become appended `Set-Cookie` entries, streams get event-stream
//! headers, transformed payloads are serialized as a JSON envelope and
//! untransformed payloads are written raw. Native responses bypass all of
//! it.

use crate::body::ResponseBody;
use crate::context::{ContextResponse, ResponseContent};
use crate::sse::sse_body;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};

pub(crate) fn process_response(response: ContextResponse) -> Response<ResponseBody> {
    let ContextResponse { content, mut headers, cookies } = response;

    for (name, value) in cookies {
        if let Ok(entry) = HeaderValue::from_str(&format!("{name}={value}")) {
            headers.append(SET_COOKIE, entry);
        }
    }

    match content {
        Some(ResponseContent::Stream(stream)) => {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            }

            assemble(StatusCode::OK, headers, sse_body(stream))
        }
        Some(ResponseContent::Native(native)) => native,
        Some(ResponseContent::Payload(payload)) if payload.transform => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

            assemble(payload.status, headers, ResponseBody::from(payload.envelope().to_string()))
        }
        Some(ResponseContent::Payload(payload)) => {
            assemble(payload.status, headers, ResponseBody::from(payload.raw_bytes()))
        }
        None => assemble(StatusCode::OK, headers, ResponseBody::empty()),
    }
}

fn assemble(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Payload, error, success};
    use crate::sse::{SseEvent, SseItem};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    async fn body_bytes(response: Response<ResponseBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn transformed_payload_becomes_a_json_envelope() {
        let mut ctx_response = ContextResponse::default();
        ctx_response.content =
            Some(ResponseContent::Payload(error(json!("missing")).status(StatusCode::NOT_FOUND)));

        let response = process_response(ctx_response);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, json!({"content": "missing", "status": 404, "success": false}));
    }

    #[tokio::test]
    async fn untransformed_payload_is_written_raw() {
        let mut ctx_response = ContextResponse::default();
        ctx_response.content = Some(ResponseContent::Payload(Payload::text("world")));

        let response = process_response(ctx_response);

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_bytes(response).await, Bytes::from("world"));
    }

    #[tokio::test]
    async fn cookies_append_in_insertion_order() {
        let mut ctx_response = ContextResponse::default();
        ctx_response.set_cookie("first", "1");
        ctx_response.set_cookie("second", "2");
        ctx_response.content = Some(ResponseContent::Payload(success(json!(null))));

        let response = process_response(ctx_response);

        let cookies: Vec<&str> =
            response.headers().get_all(SET_COOKIE).iter().map(|value| value.to_str().unwrap()).collect();
        assert_eq!(cookies, ["first=1", "second=2"]);
    }

    #[tokio::test]
    async fn stream_content_forces_event_stream_headers() {
        let items = vec![SseItem::Event(SseEvent::new(json!(1))), SseItem::Event(SseEvent::new(json!(2)))];

        let mut ctx_response = ContextResponse::default();
        ctx_response.content = Some(ResponseContent::Stream(Box::pin(futures::stream::iter(items))));

        let response = process_response(ctx_response);

        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/event-stream");

        assert_eq!(body_bytes(response).await, Bytes::from("data: 1\n\ndata: 2\n\n"));
    }

    #[tokio::test]
    async fn preset_content_type_survives_streaming() {
        let mut ctx_response = ContextResponse::default();
        ctx_response.set_header(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
        ctx_response.content = Some(ResponseContent::Stream(Box::pin(futures::stream::empty())));

        let response = process_response(ctx_response);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/x-ndjson");
    }

    #[tokio::test]
    async fn native_responses_pass_through_unchanged() {
        let native = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .body(ResponseBody::from("tea"))
            .unwrap();

        let mut ctx_response = ContextResponse::default();
        ctx_response.set_cookie("ignored", "yes");
        ctx_response.content = Some(ResponseContent::Native(native));

        let response = process_response(ctx_response);

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn no_content_is_an_empty_200() {
        let response = process_response(ContextResponse::default());

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, Bytes::new());
    }
}
