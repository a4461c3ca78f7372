//! Notification hub: routes store events to connected sessions.
//!
//! Delivery is best-effort. A player who is offline, or whose queue is full,
//! simply misses the push; open games are listed again on their next login.
//! There is no persistent outbound queue and no backpressure toward the store.

use crate::session::registry::SessionRegistry;
use crate::session::Notification;
use crate::store::{Player, StoreEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uttt_protocol::messages::NewGameNotification;
use uttt_protocol::GameState;

pub struct NotificationHub {
    registry: Arc<SessionRegistry>,
}

impl NotificationHub {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Route one store event. Returns how many sessions accepted a notification.
    pub async fn publish(&self, event: &StoreEvent) -> usize {
        match event {
            StoreEvent::GameCreated {
                game,
                x_player,
                o_player,
            } => {
                let mut delivered = 0;
                for (recipient, opponent) in [(x_player, o_player), (o_player, x_player)] {
                    if self.deliver(recipient, new_game(game, opponent)).await {
                        delivered += 1;
                    }
                }
                delivered
            }
            StoreEvent::MoveRecorded { game, mover } => {
                let mut delivered = 0;
                for player_id in [&game.x_player, &game.o_player] {
                    if player_id == mover {
                        continue;
                    }
                    if self
                        .deliver_to(player_id, Notification::GameUpdate(game.clone()))
                        .await
                    {
                        delivered += 1;
                    }
                }
                delivered
            }
        }
    }

    async fn deliver(&self, recipient: &Player, notification: Notification) -> bool {
        self.deliver_to(&recipient.player_id, notification).await
    }

    async fn deliver_to(&self, player_id: &str, notification: Notification) -> bool {
        let Some(handle) = self.registry.lookup(player_id).await else {
            debug!(player_id, "player offline, notification dropped");
            return false;
        };
        match handle.notify(notification) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    player_id,
                    session_id = handle.session_id,
                    error = %e,
                    "notification dropped"
                );
                false
            }
        }
    }

    /// Run the hub on its own task until `shutdown` fires or the store goes away.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<StoreEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            self.publish(&event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "notification hub lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("notification hub stopped");
        })
    }
}

fn new_game(game: &GameState, opponent: &Player) -> Notification {
    Notification::NewGame(NewGameNotification {
        game_id: game.game_id.clone(),
        opponent: opponent.username.clone(),
        game: game.clone(),
    })
}
