//! Server-sent-event framing.
//!
//! A stream route yields [`SseItem`]s. Framed events become the usual
//! `id:`/`event:`/`retry:` lines followed by a `data:` line with the JSON
//! payload and a blank line; raw items are written to the wire untouched,
//! which lets a producer emit pre-encoded or binary chunks.

use crate::body::{BoxError, ResponseBody};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use http_body::Frame;
use http_body_util::StreamBody;
use serde_json::Value;
use std::fmt::Write;
use std::pin::Pin;

/// What a stream route produces.
///
/// The item type carries no error variant: a producer that fails signals it
/// by ending the stream, which closes the response body. Producers that
/// want the client to see the failure emit a final framed event before
/// returning `None`.
pub type SseStream = Pin<Box<dyn Stream<Item = SseItem> + Send + 'static>>;

#[derive(Debug, Clone)]
pub enum SseItem {
    Event(SseEvent),
    Raw(Bytes),
}

/// One framed event. Only `data` is mandatory.
#[derive(Debug, Clone)]
pub struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    retry: Option<u64>,
    data: Value,
}

impl SseEvent {
    pub fn new(data: impl Into<Value>) -> Self {
        SseEvent { id: None, event: None, retry: None, data: data.into() }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }
}

impl From<SseEvent> for SseItem {
    fn from(event: SseEvent) -> Self {
        SseItem::Event(event)
    }
}

impl SseItem {
    pub(crate) fn encode(&self) -> Bytes {
        match self {
            SseItem::Raw(bytes) => bytes.clone(),
            SseItem::Event(event) => {
                let mut frame = String::new();

                if let Some(id) = &event.id {
                    let _ = writeln!(frame, "id: {id}");
                }
                if let Some(name) = &event.event {
                    let _ = writeln!(frame, "event: {name}");
                }
                if let Some(retry) = event.retry {
                    let _ = writeln!(frame, "retry: {retry}");
                }
                let _ = write!(frame, "data: {}\n\n", event.data);

                Bytes::from(frame)
            }
        }
    }
}

/// Adapts a producer stream into a wire body, one frame per item.
pub(crate) fn sse_body(stream: SseStream) -> ResponseBody {
    let frames = stream.map(|item| Ok::<_, BoxError>(Frame::data(item.encode())));
    ResponseBody::stream(StreamBody::new(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_only_event_is_a_single_data_line() {
        let frame = SseItem::Event(SseEvent::new(json!({"n": 1}))).encode();
        assert_eq!(frame, Bytes::from("data: {\"n\":1}\n\n"));
    }

    #[test]
    fn optional_lines_come_before_data_in_order() {
        let event = SseEvent::new(json!("tick")).id("7").event("clock").retry(1500);
        let frame = SseItem::Event(event).encode();

        assert_eq!(frame, Bytes::from("id: 7\nevent: clock\nretry: 1500\ndata: \"tick\"\n\n"));
    }

    #[test]
    fn raw_items_pass_through_unframed() {
        let frame = SseItem::Raw(Bytes::from_static(b"\x00\x01")).encode();
        assert_eq!(frame, Bytes::from_static(b"\x00\x01"));
    }
}
