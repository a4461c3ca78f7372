//! In-process [`Store`] backed by maps behind a `RwLock`.
//!
//! Accounts come from configuration. Games are kept in creation order so
//! open-game listings are deterministic. Nothing survives a restart.

use super::{Player, Store, StoreError, StoreEvent, StoreFuture};
use crate::config::PlayerSection;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uttt_protocol::GameState;

/// Capacity of the event broadcast; slow subscribers lag and drop events.
const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    /// login id → player
    logins: HashMap<String, Player>,
    /// username → player
    usernames: HashMap<String, Player>,
    /// Games in creation order.
    games: Vec<GameState>,
    /// game id → index into `games`
    game_index: HashMap<String, usize>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// Build a store holding the configured player accounts.
    pub fn with_players(players: &[PlayerSection]) -> Self {
        let mut inner = Inner::default();
        for p in players {
            let player = Player {
                player_id: p.resolved_player_id().to_string(),
                username: p.username.clone(),
            };
            inner.usernames.insert(player.username.clone(), player.clone());
            inner.logins.insert(p.login_id.clone(), player);
        }
        info!(count = inner.logins.len(), "loaded player accounts");
        Self {
            inner: RwLock::new(inner),
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// Number of games ever created.
    pub async fn game_count(&self) -> usize {
        self.inner.read().await.games.len()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine: notifications are best-effort.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn authenticate_login<'a>(&'a self, login_id: &'a str) -> StoreFuture<'a, Player> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            inner
                .logins
                .get(login_id)
                .cloned()
                .ok_or(StoreError::UnknownLogin)
        })
    }

    fn lookup_user<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<Player>> {
        Box::pin(async move { Ok(self.inner.read().await.usernames.get(username).cloned()) })
    }

    fn create_game<'a>(&'a self, challenger: &'a Player, opponent: &'a str) -> StoreFuture<'a, GameState> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let o_player = inner
                .usernames
                .get(opponent)
                .cloned()
                .ok_or_else(|| StoreError::UnknownUser(opponent.to_string()))?;
            if o_player.player_id == challenger.player_id {
                return Err(StoreError::SelfChallenge);
            }

            let mut game_id = generate_game_id();
            while inner.game_index.contains_key(&game_id) {
                game_id = generate_game_id();
            }

            let game = GameState::new(
                game_id.clone(),
                challenger.player_id.clone(),
                o_player.player_id.clone(),
            );
            let index = inner.games.len();
            inner.games.push(game.clone());
            inner.game_index.insert(game_id.clone(), index);
            drop(inner);

            info!(
                game_id = %game_id,
                x_player = %challenger.player_id,
                o_player = %o_player.player_id,
                "game created"
            );
            self.emit(StoreEvent::GameCreated {
                game: game.clone(),
                x_player: challenger.clone(),
                o_player,
            });
            Ok(game)
        })
    }

    fn load_game<'a>(&'a self, game_id: &'a str) -> StoreFuture<'a, Option<GameState>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .game_index
                .get(game_id)
                .map(|&index| inner.games[index].clone()))
        })
    }

    fn record_move<'a>(&'a self, next: &'a GameState, mover: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let index = *inner
                .game_index
                .get(&next.game_id)
                .ok_or_else(|| StoreError::GameNotFound(next.game_id.clone()))?;
            let stored = &mut inner.games[index];
            if stored.move_count + 1 != next.move_count {
                debug!(
                    game_id = %next.game_id,
                    stored = stored.move_count,
                    proposed = next.move_count,
                    "rejecting stale move"
                );
                return Err(StoreError::Conflict(next.game_id.clone()));
            }
            *stored = next.clone();
            drop(inner);

            self.emit(StoreEvent::MoveRecorded {
                game: next.clone(),
                mover: mover.to_string(),
            });
            Ok(())
        })
    }

    fn list_open_games<'a>(&'a self, player_id: &'a str) -> StoreFuture<'a, Vec<GameState>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .games
                .iter()
                .filter(|g| g.status.is_open() && g.is_participant(player_id))
                .cloned()
                .collect())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Generate a random game ID (hex-encoded, 8 bytes = 16 hex chars).
fn generate_game_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uttt_protocol::GameStatus;

    fn seeded() -> MemoryStore {
        MemoryStore::with_players(&[
            PlayerSection {
                login_id: "login-alice".into(),
                username: "alice".into(),
                player_id: None,
            },
            PlayerSection {
                login_id: "login-bob".into(),
                username: "bob".into(),
                player_id: Some("p-bob".into()),
            },
        ])
    }

    #[tokio::test]
    async fn authenticate_known_and_unknown() {
        let store = seeded();
        let alice = store.authenticate_login("login-alice").await.unwrap();
        assert_eq!(alice.player_id, "alice");
        assert_eq!(
            store.authenticate_login("nope").await,
            Err(StoreError::UnknownLogin)
        );
    }

    #[tokio::test]
    async fn lookup_user_found_and_missing() {
        let store = seeded();
        let bob = store.lookup_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.player_id, "p-bob");
        assert!(store.lookup_user("zed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_game_emits_event() {
        let store = seeded();
        let mut events = store.subscribe();
        let alice = store.authenticate_login("login-alice").await.unwrap();
        let game = store.create_game(&alice, "bob").await.unwrap();
        assert_eq!(game.x_player, "alice");
        assert_eq!(game.o_player, "p-bob");
        assert_eq!(game.game_id.len(), 16);

        match events.recv().await.unwrap() {
            StoreEvent::GameCreated { game: g, o_player, .. } => {
                assert_eq!(g, game);
                assert_eq!(o_player.username, "bob");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_game_rejects_self_and_unknown() {
        let store = seeded();
        let alice = store.authenticate_login("login-alice").await.unwrap();
        assert_eq!(
            store.create_game(&alice, "alice").await,
            Err(StoreError::SelfChallenge)
        );
        assert_eq!(
            store.create_game(&alice, "zed").await,
            Err(StoreError::UnknownUser("zed".into()))
        );
        assert_eq!(store.game_count().await, 0);
    }

    #[tokio::test]
    async fn open_games_in_creation_order() {
        let store = seeded();
        let alice = store.authenticate_login("login-alice").await.unwrap();
        let bob = store.authenticate_login("login-bob").await.unwrap();
        let first = store.create_game(&alice, "bob").await.unwrap();
        let second = store.create_game(&bob, "alice").await.unwrap();

        let mut finished = store.load_game(&first.game_id).await.unwrap().unwrap();
        let third = store.create_game(&alice, "bob").await.unwrap();
        finished.status = GameStatus::Draw;
        finished.move_count += 1;
        store.record_move(&finished, "alice").await.unwrap();

        let open: Vec<String> = store
            .list_open_games("p-bob")
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.game_id)
            .collect();
        assert_eq!(open, vec![second.game_id, third.game_id]);
    }

    #[tokio::test]
    async fn record_move_rejects_stale_state() {
        let store = seeded();
        let alice = store.authenticate_login("login-alice").await.unwrap();
        let game = store.create_game(&alice, "bob").await.unwrap();

        let mut next = game.clone();
        next.move_count = 1;
        store.record_move(&next, "alice").await.unwrap();
        assert_eq!(
            store.record_move(&next, "alice").await,
            Err(StoreError::Conflict(game.game_id.clone()))
        );
    }
}
