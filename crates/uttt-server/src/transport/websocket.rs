//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, performs the upgrade handshake on the configured
//! socket path, and hands finished connections to the server over a channel.

use crate::error::{ServerError, ServerResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// One inbound frame as seen by the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text or binary payload carrying an envelope.
    Data(Vec<u8>),
    /// Ping or pong. tungstenite queues the pong reply itself.
    Control,
}

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound address (useful when binding port 0) and a receiver that
/// yields accepted connections. The accept loop stops when `shutdown` fires.
/// tungstenite refuses messages above twice `max_frame_bytes`; anything
/// between the two limits is read whole and rejected by [`ws_recv_frame`].
pub async fn start_listener(
    bind_addr: SocketAddr,
    socket_path: String,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> ServerResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ServerError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, path = %socket_path, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let ws_config = transport_config(max_frame_bytes);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = tcp_listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let path = socket_path.clone();
                    let ws_config = ws_config.clone();
                    tokio::spawn(async move {
                        let check_path = move |req: &Request, resp: Response| {
                            if req.uri().path() == path {
                                Ok(resp)
                            } else {
                                let mut refused = ErrorResponse::new(Some("not found".into()));
                                *refused.status_mut() = StatusCode::NOT_FOUND;
                                Err(refused)
                            }
                        };
                        match tokio_tungstenite::accept_hdr_async_with_config(
                            stream,
                            check_path,
                            Some(ws_config),
                        )
                        .await
                        {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
        debug!("WebSocket listener stopped");
    });

    Ok((local_addr, rx))
}

/// Send a text frame.
pub async fn ws_send_text(ws: &mut WsStream, text: String) -> ServerResult<()> {
    ws.send(Message::text(text))
        .await
        .map_err(|e| ServerError::Transport(format!("WS send failed: {e}")))
}

/// Message and frame limits handed to tungstenite.
fn transport_config(max_frame_bytes: usize) -> WebSocketConfig {
    let hard_limit = max_frame_bytes.saturating_mul(2).max(1024);
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(hard_limit);
    config.max_frame_size = Some(hard_limit);
    config
}

/// Receive the next inbound frame.
///
/// Returns `None` once the peer has closed the connection. Data frames above
/// `max_frame_bytes`, and messages tungstenite refuses for size, both come
/// back as [`ServerError::FrameTooLarge`].
pub async fn ws_recv_frame(ws: &mut WsStream, max_frame_bytes: usize) -> ServerResult<Option<InboundFrame>> {
    let data = match ws.next().await {
        Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
        Some(Ok(Message::Binary(data))) => data.to_vec(),
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
            return Ok(Some(InboundFrame::Control));
        }
        Some(Ok(Message::Close(_))) | None => return Ok(None),
        Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size }))) => {
            return Err(ServerError::FrameTooLarge {
                size,
                max: max_size,
            });
        }
        Some(Err(e)) => {
            return Err(ServerError::Transport(format!("WS recv failed: {e}")));
        }
    };
    if data.len() > max_frame_bytes {
        return Err(ServerError::FrameTooLarge {
            size: data.len(),
            max: max_frame_bytes,
        });
    }
    Ok(Some(InboundFrame::Data(data)))
}

/// Close the connection, ignoring errors from a peer that is already gone.
pub async fn ws_close(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "WebSocket close failed");
    }
}
