//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the JSON frame protocol over a WebSocket
//! connection. Both `ws://` and `wss://` URLs are supported — TLS is handled
//! transparently via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! The session credential travels as a `token` query parameter on the
//! connection URL; the server authenticates the socket at upgrade time, so
//! no in-band auth frame exists in the protocol.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by
//! default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), serpentia_client::SerpentiaError> {
//! use serpentia_client::{WebSocketTransport, Transport};
//!
//! let mut transport =
//!     WebSocketTransport::connect("ws://localhost:8080/ws", "jwt-token").await?;
//! transport.send(r#"{"type":"Subscribe","data":{"topic":"/topic/lobby"}}"#.into()).await?;
//!
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("received: {frame}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SerpentiaError;
use crate::transport::Transport;

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from
/// an existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Construction
///
/// Use [`WebSocketTransport::connect`] with the base URL and the bearer
/// credential. For advanced use-cases (custom TLS, proxy, headers) construct
/// the stream yourself and use [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any
/// frames, making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to `url`, passing `token` as
    /// the `token` query parameter.
    ///
    /// Supports both `ws://` and `wss://` schemes. TLS is handled
    /// automatically by `tokio-tungstenite`.
    ///
    /// # Errors
    ///
    /// Returns [`SerpentiaError::Io`] if the URL is invalid or the
    /// connection cannot be established. When the underlying error is an
    /// I/O error its [`ErrorKind`](std::io::ErrorKind) is preserved; all
    /// other errors map to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str, token: &str) -> Result<Self, SerpentiaError> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let full_url = format!("{url}{separator}token={token}");
        tracing::debug!(url = %url, "connecting to game server");

        let (stream, _response) =
            tokio_tungstenite::connect_async(&full_url).await.map_err(|e| {
                let kind = match &e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                    _ => std::io::ErrorKind::Other,
                };
                SerpentiaError::Io(std::io::Error::new(kind, e))
            })?;

        tracing::info!(url = %url, "game server connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Create a [`WebSocketTransport`] from an already-established stream.
    ///
    /// Useful when you need custom TLS configuration, proxy headers, or any
    /// other connection setup that [`connect`](Self::connect) does not
    /// expose. The caller is responsible for credential handling in that
    /// case.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new connection with a deadline.
    ///
    /// Behaves identically to [`connect`](Self::connect) but fails with
    /// [`SerpentiaError::Timeout`] if the connection is not established
    /// within the given duration.
    ///
    /// # Errors
    ///
    /// Returns [`SerpentiaError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        token: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, SerpentiaError> {
        tokio::time::timeout(timeout, Self::connect(url, token))
            .await
            .map_err(|_| SerpentiaError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), SerpentiaError> {
        if self.closed {
            return Err(SerpentiaError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| SerpentiaError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SerpentiaError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SerpentiaError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) => {
                    // tungstenite auto-queues a Pong reply; nothing to do.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; kept for exhaustiveness.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SerpentiaError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SerpentiaError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url", "tok").await;
        let err = result.unwrap_err();
        assert!(matches!(err, SerpentiaError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1", "tok").await;
        let err = result.unwrap_err();
        assert!(matches!(err, SerpentiaError::Io(_)));
    }

    // ── Mock-server helpers ─────────────────────────────────────────

    use tokio::net::TcpListener;

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

        format!("ws://{addr}/")
    }

    // ── Mock-server tests ───────────────────────────────────────────

    #[tokio::test]
    async fn credential_rides_as_token_query_parameter() {
        use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uri_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut uri_tx = Some(uri_tx);
            let ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
                if let Some(tx) = uri_tx.take() {
                    let _ = tx.send(req.uri().to_string());
                }
                Ok(resp)
            })
            .await
            .unwrap();
            drop(ws);
        });

        let _transport = WebSocketTransport::connect(&format!("ws://{addr}/ws"), "jwt-abc")
            .await
            .unwrap();

        let uri = uri_rx.await.unwrap();
        assert_eq!(uri, "/ws?token=jwt-abc");
    }

    #[tokio::test]
    async fn recv_receives_text_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("first".into())).await.unwrap();
            ws.send(Message::Text("second".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "first");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "second");
    }

    #[tokio::test]
    async fn recv_returns_none_on_close_frame() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();
        assert!(transport.recv().await.is_none());
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

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, SerpentiaError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address guarantees the deadline fires first.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1/",
            "tok",
            std::time::Duration::from_millis(50),
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, SerpentiaError::Timeout));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, "tok").await.unwrap();
        transport.send("echo_me".to_string()).await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "echo_me");
    }

    #[tokio::test]
    async fn from_stream_constructor_works() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("from_stream_frame".into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(ws_stream);

        assert_eq!(transport.recv().await.unwrap().unwrap(), "from_stream_frame");
    }
}
