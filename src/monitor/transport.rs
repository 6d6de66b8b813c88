//! Socket transport.
//!
//! Responsibilities:
//! • Supply the HTTP origin the socket URL is derived from.
//! • Open a socket and expose it as a text-frame sink and stream.
//!
//! The driver only sees [`Transport`], so tests plug in an in-memory one.

use crate::errors::{AppError, Result};
use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;
/// Inbound text frames. The stream ending means the socket closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open socket split into its two halves.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

pub trait Transport: Send + Sync + 'static {
    /// HTTP(S) origin of the backend; read again on every connection attempt.
    fn base_url(&self) -> String;

    /// False when the host cannot open sockets at all.
    fn supports_sockets(&self) -> bool {
        true
    }

    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Socket>>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Transport for WsTransport {
    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Socket>> {
        Box::pin(async move {
            let (ws_stream, _resp) = connect_async(url).await?;
            let (sink, stream) = ws_stream.split();

            let sink =
                sink.with(|text: String| future::ready(Ok::<_, AppError>(Message::Text(text))));
            let stream = stream.filter_map(|frame| future::ready(text_frame(frame)));

            Ok::<_, AppError>(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

fn text_frame(
    frame: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                debug!("[MONITOR] skipping non-utf8 binary frame");
                None
            }
        },
        // ping/pong/close control frames are handled by tungstenite
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::Error as WsError;

    #[test]
    fn text_and_utf8_binary_frames_pass() {
        let text = text_frame(Ok(Message::Text("{}".into())));
        assert!(matches!(text, Some(Ok(ref t)) if t == "{}"));
        let bin = text_frame(Ok(Message::Binary(b"{\"a\":1}".to_vec())));
        assert!(matches!(bin, Some(Ok(ref t)) if t == "{\"a\":1}"));
    }

    #[test]
    fn control_and_invalid_frames_are_skipped() {
        assert!(text_frame(Ok(Message::Ping(vec![1]))).is_none());
        assert!(text_frame(Ok(Message::Binary(vec![0xff, 0xfe]))).is_none());
    }

    #[test]
    fn stream_errors_surface() {
        let err = text_frame(Err(WsError::ConnectionClosed));
        assert!(matches!(err, Some(Err(AppError::WebSocket(_)))));
    }

    #[test]
    fn ws_transport_reports_its_origin() {
        let t = WsTransport::new("https://api.example.com");
        assert_eq!(t.base_url(), "https://api.example.com");
        assert!(t.supports_sockets());
    }
}
