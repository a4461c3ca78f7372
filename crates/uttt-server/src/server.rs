//! Core server: accepts connections and drives one session per connection.
//!
//! Owns the session registry, dispatcher, and notification hub, and
//! coordinates the lifecycle of every incoming connection. Each connection
//! runs on its own task and is the only writer to its socket: direct replies
//! and hub notifications are both written from that task's select loop.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::GameEngine;
use crate::error::{ServerError, ServerResult};
use crate::hub::NotificationHub;
use crate::session::{ConnectionSession, Notification, SessionRegistry};
use crate::store::Store;
use crate::transport::websocket::{self, InboundFrame, WebSocketConnection, WsStream};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uttt_protocol::messages::ErrorMessage;
use uttt_protocol::{encode_message, ServerMessage, UNSOLICITED_REQUEST_ID};

/// The uttt session server.
pub struct GameServer {
    config: ServerConfig,
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    /// Root token; every session token is a child of it.
    shutdown: CancellationToken,
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting, close every session, and wait for the accept loop to end.
    pub async fn shutdown(self) {
        info!(sessions = self.registry.count().await, "shutting down, closing sessions");
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task ended abnormally");
        }
    }

    /// Run until `signal` resolves, then shut down.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) {
        signal.await;
        self.shutdown().await;
    }
}

impl GameServer {
    /// Create a new server instance around its collaborators.
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, engine: Arc<dyn GameEngine>) -> Self {
        Self::with_registry(config, store, engine, Arc::new(SessionRegistry::new()))
    }

    /// Like [`GameServer::new`], but sessions are indexed in a caller-owned registry.
    pub fn with_registry(
        config: ServerConfig,
        store: Arc<dyn Store>,
        engine: Arc<dyn GameEngine>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), engine, registry.clone()));
        Self {
            config,
            store,
            registry,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind the listener, start the notification hub, and spawn the accept loop.
    pub async fn start(self) -> ServerResult<ServerHandle> {
        let server = Arc::new(self);

        let (local_addr, mut ws_rx) = websocket::start_listener(
            server.config.listen_addr(),
            server.config.socket_path.clone(),
            server.config.max_frame_bytes,
            server.shutdown.clone(),
        )
        .await?;

        let hub = NotificationHub::new(server.registry.clone());
        let hub_task = hub.spawn(server.store.subscribe(), server.shutdown.clone());

        info!(
            addr = %local_addr,
            path = %server.config.socket_path,
            idle_timeout = server.config.idle_timeout,
            "uttt-server ready"
        );

        let registry = server.registry.clone();
        let shutdown = server.shutdown.clone();
        let task = tokio::spawn(async move {
            let mut connections = Vec::new();
            loop {
                tokio::select! {
                    _ = server.shutdown.cancelled() => break,
                    conn = ws_rx.recv() => match conn {
                        Some(conn) => {
                            let srv = server.clone();
                            connections.push(tokio::spawn(async move {
                                let remote = conn.remote_addr;
                                if let Err(e) = srv.handle_websocket(conn).await {
                                    warn!(remote = %remote, error = %e, "WebSocket connection error");
                                }
                            }));
                            connections.retain(|task: &JoinHandle<()>| !task.is_finished());
                        }
                        None => {
                            info!("listener closed, shutting down");
                            break;
                        }
                    },
                }
            }

            server.shutdown.cancel();
            for task in connections {
                let _ = task.await;
            }
            let _ = hub_task.await;
            debug!("accept loop stopped");
        });

        Ok(ServerHandle {
            local_addr,
            registry,
            shutdown,
            task,
        })
    }

    /// Drive one connection from upgrade to teardown.
    async fn handle_websocket(&self, mut conn: WebSocketConnection) -> ServerResult<()> {
        let session_id = self.registry.next_session_id();
        let remote = conn.remote_addr;
        info!(remote = %remote, session_id, "handling WebSocket connection");

        let (notify_tx, mut notify_rx) = mpsc::channel::<Notification>(self.config.notification_queue);
        let cancel = self.shutdown.child_token();
        let mut session =
            ConnectionSession::new(session_id, self.dispatcher.clone(), notify_tx, cancel.clone())
                .with_request_logs(self.config.request_logs);

        let result = self
            .session_loop(&mut conn.ws_stream, &mut session, &mut notify_rx, &cancel)
            .await;

        session.close().await;
        websocket::ws_close(&mut conn.ws_stream).await;
        info!(remote = %remote, session_id, "connection closed");
        result
    }

    /// Sequential receive loop: at most one request in flight per session.
    async fn session_loop(
        &self,
        ws: &mut WsStream,
        session: &mut ConnectionSession,
        notify_rx: &mut mpsc::Receiver<Notification>,
        cancel: &CancellationToken,
    ) -> ServerResult<()> {
        let idle_timeout = self.config.idle_timeout();
        let mut idle_deadline = idle_timeout.map(|d| Instant::now() + d);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(session_id = session.session_id(), "session cancelled");
                    if self.shutdown.is_cancelled() {
                        let bye = ErrorMessage::fatal("server shutting down");
                        let _ = send_message(ws, &bye.into(), UNSOLICITED_REQUEST_ID).await;
                    }
                    break;
                }

                _ = idle_expired(idle_deadline) => {
                    info!(session_id = session.session_id(), "idle timeout");
                    let bye = ErrorMessage::fatal("idle timeout");
                    let _ = send_message(ws, &bye.into(), UNSOLICITED_REQUEST_ID).await;
                    break;
                }

                Some(notification) = notify_rx.recv() => {
                    if let Some(message) = session.accept_notification(notification) {
                        send_message(ws, &message, UNSOLICITED_REQUEST_ID).await?;
                    }
                }

                frame = websocket::ws_recv_frame(ws, self.config.max_frame_bytes) => {
                    // Any inbound frame, control frames included, counts as activity.
                    idle_deadline = idle_timeout.map(|d| Instant::now() + d);
                    let reply = match frame {
                        Ok(Some(InboundFrame::Data(data))) => session.handle_frame(&data).await,
                        Ok(Some(InboundFrame::Control)) => continue,
                        Err(ServerError::FrameTooLarge { size, max }) => {
                            warn!(session_id = session.session_id(), size, max, "frame too large");
                            session.malformed(None)
                        }
                        Ok(None) => {
                            debug!(session_id = session.session_id(), "peer closed");
                            break;
                        }
                        Err(e) => {
                            debug!(session_id = session.session_id(), error = %e, "transport failure");
                            break;
                        }
                    };

                    if let Some(message) = &reply.message {
                        send_message(ws, message, reply.request_id).await?;
                    }
                    if reply.close {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn send_message(ws: &mut WsStream, message: &ServerMessage, request_id: i64) -> ServerResult<()> {
    let frame = encode_message(message, request_id)?;
    websocket::ws_send_text(ws, frame).await
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
