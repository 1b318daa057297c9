//! Relay link establishment
//!
//! A [`Connector`] opens one transport connection and returns it as a
//! [`Link`] split into independently owned reader and writer halves, so the
//! channel driver can wait on inbound frames while it writes.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{AppError, Result};

/// Writing half of a link
#[async_trait]
pub trait LinkWriter: Send {
    /// Write one text frame
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Close the connection gracefully
    async fn close(&mut self);
}

/// Reading half of a link
#[async_trait]
pub trait LinkReader: Send {
    /// Next text frame, `None` once the connection is closed
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// One open connection to the relay
pub struct Link {
    pub writer: Box<dyn LinkWriter>,
    pub reader: Box<dyn LinkReader>,
}

/// Opens connections to the relay
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, token: &str) -> Result<Link>;
}

/// Build the relay WebSocket URL
///
/// `http(s)://host` becomes `ws(s)://host/ws?token=<token>`; `ws(s)://`
/// bases are used as they are.
pub fn relay_ws_url(base: &str, token: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws?token={}", ws_base, urlencoding::encode(token))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector (tokio-tungstenite)
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Link> {
        let url = relay_ws_url(&self.base_url, token);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AppError::Transport(format!("connect {}: {}", self.base_url, e)))?;
        let (sink, stream) = ws_stream.split();

        Ok(Link {
            writer: Box::new(WsWriter { sink }),
            reader: Box::new(WsReader { stream }),
        })
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LinkWriter for WsWriter {
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.sink
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| AppError::Transport(format!("write failed: {}", e)))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl LinkReader for WsReader {
    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Relay closed the connection: {:?}", frame);
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(AppError::Transport(format!("read failed: {}", e)))),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_ws_url_from_http() {
        assert_eq!(
            relay_ws_url("http://localhost:8080", "abc"),
            "ws://localhost:8080/ws?token=abc"
        );
        assert_eq!(
            relay_ws_url("https://chat.example.com/", "a b&c"),
            "wss://chat.example.com/ws?token=a%20b%26c"
        );
    }

    #[test]
    fn test_relay_ws_url_keeps_ws_scheme() {
        assert_eq!(
            relay_ws_url("wss://relay.example.com", "t"),
            "wss://relay.example.com/ws?token=t"
        );
    }
}
