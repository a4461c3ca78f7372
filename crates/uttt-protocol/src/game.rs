//! Game data carried on the wire.
//!
//! These types are owned by the game engine; the protocol layer only moves
//! them between peers. Boards are indexed `[board][square]`, both `0..9`,
//! row-major from the top-left.

use serde::{Deserialize, Serialize};

/// Number of sub-boards (and squares per sub-board).
pub const BOARD_SIZE: usize = 9;

/// A player's mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

/// A single move: which sub-board and which square inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Move {
    pub board: u8,
    pub square: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    InProgress,
    XWon,
    OWon,
    Draw,
}

impl GameStatus {
    pub fn is_open(self) -> bool {
        self == GameStatus::InProgress
    }

    pub fn won_by(mark: Mark) -> GameStatus {
        match mark {
            Mark::X => GameStatus::XWon,
            Mark::O => GameStatus::OWon,
        }
    }
}

/// Full state of one game between two players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(rename = "gameID")]
    pub game_id: String,
    /// Player id playing X (moves first).
    #[serde(rename = "xPlayer")]
    pub x_player: String,
    #[serde(rename = "oPlayer")]
    pub o_player: String,
    pub board: [[Option<Mark>; BOARD_SIZE]; BOARD_SIZE],
    #[serde(rename = "boardWinners")]
    pub board_winners: [Option<Mark>; BOARD_SIZE],
    /// Sub-board the next move must be played in; `None` means any open board.
    #[serde(rename = "activeBoard")]
    pub active_board: Option<u8>,
    #[serde(rename = "nextTurn")]
    pub next_turn: Mark,
    #[serde(rename = "moveCount")]
    pub move_count: u32,
    pub status: GameStatus,
}

impl GameState {
    /// A fresh game with an empty board, X to move anywhere.
    pub fn new(game_id: String, x_player: String, o_player: String) -> Self {
        Self {
            game_id,
            x_player,
            o_player,
            board: [[None; BOARD_SIZE]; BOARD_SIZE],
            board_winners: [None; BOARD_SIZE],
            active_board: None,
            next_turn: Mark::X,
            move_count: 0,
            status: GameStatus::InProgress,
        }
    }

    /// The mark `player_id` plays in this game, or `None` if they are not a participant.
    pub fn mark_of(&self, player_id: &str) -> Option<Mark> {
        if self.x_player == player_id {
            Some(Mark::X)
        } else if self.o_player == player_id {
            Some(Mark::O)
        } else {
            None
        }
    }

    pub fn player_with(&self, mark: Mark) -> &str {
        match mark {
            Mark::X => &self.x_player,
            Mark::O => &self.o_player,
        }
    }

    pub fn is_participant(&self, player_id: &str) -> bool {
        self.mark_of(player_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_of_participants() {
        let game = GameState::new("g1".into(), "alice".into(), "bob".into());
        assert_eq!(game.mark_of("alice"), Some(Mark::X));
        assert_eq!(game.mark_of("bob"), Some(Mark::O));
        assert_eq!(game.mark_of("carol"), None);
        assert_eq!(game.player_with(Mark::O), "bob");
    }

    #[test]
    fn wire_field_names() {
        let game = GameState::new("g1".into(), "alice".into(), "bob".into());
        let value = serde_json::to_value(&game).unwrap();
        assert_eq!(value["gameID"], "g1");
        assert_eq!(value["xPlayer"], "alice");
        assert_eq!(value["nextTurn"], "X");
        assert_eq!(value["status"], "inProgress");
        assert!(value["activeBoard"].is_null());
        assert_eq!(value["board"].as_array().unwrap().len(), BOARD_SIZE);
    }

    #[test]
    fn move_rejects_unknown_fields() {
        let err = serde_json::from_str::<Move>(r#"{"board":1,"square":2,"extra":true}"#);
        assert!(err.is_err());
    }
}
