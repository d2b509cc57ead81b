//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] opens a fresh [`WebSocketTransport`] for every
//! connection attempt. Both `ws://` and `wss://` URLs are supported; TLS is
//! handled through [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::close_code::{CloseCode, CloseStatus};
use crate::error::VersusError;
use crate::transport::{Connector, Inbound, Transport};

/// Default handshake timeout used by [`WebSocketConnector`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::HandshakeRejected`] when the server answered the
    /// upgrade with a non-101 HTTP status, and [`VersusError::Io`] for
    /// everything else. I/O error kinds are preserved.
    pub async fn connect(url: &str) -> Result<Self, VersusError> {
        tracing::debug!("connecting to match socket");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            use tokio_tungstenite::tungstenite::Error;
            match e {
                Error::Http(response) => VersusError::HandshakeRejected {
                    status: response.status().as_u16(),
                },
                Error::Io(io) => VersusError::Io(io),
                other => VersusError::Io(std::io::Error::other(other)),
            }
        })?;

        tracing::info!("match socket established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Wrap an already-established stream (custom TLS, proxies, headers).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, VersusError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| VersusError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), VersusError> {
        if self.closed {
            return Err(VersusError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| VersusError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Inbound, VersusError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(VersusError::TransportReceive(e.to_string())),
                None => {
                    return Ok(Inbound::Closed(CloseStatus::abnormal(
                        "stream ended without close frame",
                    )))
                }
            };

            match msg {
                Message::Text(text) => return Ok(Inbound::Text(text.to_string())),
                Message::Close(Some(frame)) => {
                    tracing::debug!(?frame, "received close frame");
                    return Ok(Inbound::Closed(CloseStatus::new(
                        CloseCode(u16::from(frame.code)),
                        frame.reason.to_string(),
                    )));
                }
                Message::Close(None) => {
                    return Ok(Inbound::Closed(CloseStatus::new(CloseCode::NO_STATUS, "")));
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite answers pings itself.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), VersusError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| VersusError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] that opens a [`WebSocketTransport`] per attempt.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, VersusError> {
        let transport = WebSocketTransport::connect_with_timeout(url.as_str(), self.timeout).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url").await.unwrap_err();
        assert!(matches!(err, VersusError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, VersusError::Io(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_reports_close_code() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.close(Some(CloseFrame {
                code: WsCloseCode::from(4410),
                reason: "invite expired".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            Inbound::Text("hello".into())
        );
        let Inbound::Closed(status) = transport.recv().await.unwrap() else {
            panic!("expected close");
        };
        assert_eq!(status.code, CloseCode::INVITE_EXPIRED);
        assert_eq!(status.reason, "invite expired");
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            Inbound::Text("after_binary".into())
        );
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, VersusError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_times_out() {
        let connector = WebSocketConnector::new().with_timeout(Duration::from_millis(50));
        let url = Url::parse("ws://192.0.2.1:1").unwrap();
        let err = connector.connect(&url).await.err().unwrap();
        assert!(matches!(err, VersusError::Timeout));
    }

    #[tokio::test]
    async fn connector_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new()
            .connect(&Url::parse(&url).unwrap())
            .await
            .unwrap();
        transport.send(r#"{"type":"ping"}"#.into()).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap(),
            Inbound::Text(r#"{"type":"ping"}"#.into())
        );
    }
}
