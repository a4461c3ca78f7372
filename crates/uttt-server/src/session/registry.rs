//! Registry of authenticated sessions.
//!
//! Maps a player id to the handle of the session currently bound to it.
//! The registry is a lookup index only: sessions are owned by their
//! connection task, which registers on login and deregisters on teardown.

use super::Notification;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a notification could not be handed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("session notification queue is full")]
    QueueFull,

    #[error("session is closed")]
    Closed,
}

/// Cloneable handle used to reach a live session from other tasks.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: u64,
    pub player_id: String,
    pub username: String,
    pub registered_at: Instant,
    sender: mpsc::Sender<Notification>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        session_id: u64,
        player_id: String,
        username: String,
        sender: mpsc::Sender<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            player_id,
            username,
            registered_at: Instant::now(),
            sender,
            cancel,
        }
    }

    /// Whether the owning session is still running.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.sender.is_closed()
    }

    /// Enqueue a notification without waiting. Full queues drop the notification.
    pub fn notify(&self, notification: Notification) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("player {player_id} is already bound to session {session_id}")]
    AlreadyConnected { player_id: String, session_id: u64 },
}

/// Process-wide index of authenticated sessions, injected wherever needed.
pub struct SessionRegistry {
    /// Live sessions indexed by player id.
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Monotonic session id counter (ids start at 1).
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a newly accepted connection.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind a session to its player.
    ///
    /// A second live session for the same player is rejected. An entry whose
    /// session has already shut down but not yet deregistered is replaced.
    pub async fn register(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&handle.player_id) {
            if existing.is_open() {
                return Err(RegistryError::AlreadyConnected {
                    player_id: handle.player_id.clone(),
                    session_id: existing.session_id,
                });
            }
            debug!(
                player_id = %handle.player_id,
                stale_session = existing.session_id,
                stale_for_ms = existing.registered_at.elapsed().as_millis() as u64,
                "replacing stale session"
            );
        }
        info!(
            player_id = %handle.player_id,
            session_id = handle.session_id,
            "session registered"
        );
        sessions.insert(handle.player_id.clone(), handle);
        Ok(())
    }

    /// Remove the entry for `player_id` if it still belongs to `session_id`.
    pub async fn deregister(&self, player_id: &str, session_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(player_id) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(player_id);
                debug!(player_id, session_id, "session deregistered");
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, player_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(player_id).cloned()
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
