//! WebSocket upgrade plumbing.
//!
//! A WebSocket route's handler runs once per upgrade request, with the full
//! chain in front of it, and returns a [`WsHandler`] whose lifecycle
//! callbacks are then bound to the upgraded socket.

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;

pub type WsError = tokio_tungstenite::tungstenite::Error;

/// The write half of an upgraded connection.
pub struct WsConn {
    sink: SplitSink<WebSocketStream<TokioIo<Upgraded>>, Message>,
}

impl WsConn {
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), WsError> {
        self.sink.send(Message::text(text.into())).await
    }

    pub async fn close(&mut self) -> Result<(), WsError> {
        self.sink.send(Message::Close(None)).await
    }
}

impl std::fmt::Debug for WsConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WsConn")
    }
}

/// Lifecycle callbacks for one socket. Only `message` is mandatory.
#[async_trait]
pub trait WsHandler: Send {
    async fn open(&mut self, _conn: &mut WsConn) {}

    async fn message(&mut self, conn: &mut WsConn, message: String);

    async fn drain(&mut self, _conn: &mut WsConn) {}

    async fn close(&mut self, _code: Option<u16>, _reason: String) {}
}

/// The `Sec-WebSocket-Accept` value for a client key.
pub(crate) fn accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Runs one upgraded connection to completion.
pub(crate) async fn drive(upgraded: Upgraded, mut handler: Box<dyn WsHandler>) {
    let stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
    let (sink, mut source) = stream.split();
    let mut conn = WsConn { sink };

    handler.open(&mut conn).await;

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => handler.message(&mut conn, text.to_string()).await,
            Ok(Message::Binary(bytes)) => {
                handler.message(&mut conn, String::from_utf8_lossy(&bytes).into_owned()).await;
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                    None => (None, String::new()),
                };
                handler.close(code, reason).await;
                break;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::debug!("websocket connection ended: {error}");
                break;
            }
        }
    }
}
