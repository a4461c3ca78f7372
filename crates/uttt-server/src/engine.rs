//! Game engine collaborator: validates and applies moves.
//!
//! The session layer only needs [`GameEngine::apply_move`]; the rules live
//! entirely behind it. [`UltimateTicTacToe`] is the engine the server ships with.

use thiserror::Error;
use uttt_protocol::game::BOARD_SIZE;
use uttt_protocol::{GameState, GameStatus, Mark, Move};

/// A move rejected by the rules. Always reported to the player, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalMove {
    #[error("the game is already over")]
    GameOver,

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("board {board} square {square} is off the grid")]
    OutOfRange { board: u8, square: u8 },

    #[error("you must play in board {expected}")]
    WrongBoard { expected: u8 },

    #[error("board {0} is already decided")]
    BoardClosed(u8),

    #[error("that square is already taken")]
    SquareTaken,
}

pub trait GameEngine: Send + Sync {
    /// Apply `mv` by the player holding `mover`, returning the next state.
    fn apply_move(&self, state: &GameState, mover: Mark, mv: Move) -> Result<GameState, IllegalMove>;
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

fn line_winner(cells: &[Option<Mark>; BOARD_SIZE]) -> Option<Mark> {
    LINES.iter().find_map(|&[a, b, c]| match (cells[a], cells[b], cells[c]) {
        (Some(x), Some(y), Some(z)) if x == y && y == z => Some(x),
        _ => None,
    })
}

/// Standard ultimate tic-tac-toe.
#[derive(Debug, Default, Clone, Copy)]
pub struct UltimateTicTacToe;

impl UltimateTicTacToe {
    /// A sub-board is closed once it has a winner or no empty squares.
    fn board_closed(state: &GameState, board: usize) -> bool {
        state.board_winners[board].is_some() || state.board[board].iter().all(Option::is_some)
    }
}

impl GameEngine for UltimateTicTacToe {
    fn apply_move(&self, state: &GameState, mover: Mark, mv: Move) -> Result<GameState, IllegalMove> {
        if !state.status.is_open() {
            return Err(IllegalMove::GameOver);
        }
        if state.next_turn != mover {
            return Err(IllegalMove::NotYourTurn);
        }
        let (board, square) = (mv.board as usize, mv.square as usize);
        if board >= BOARD_SIZE || square >= BOARD_SIZE {
            return Err(IllegalMove::OutOfRange {
                board: mv.board,
                square: mv.square,
            });
        }
        if let Some(expected) = state.active_board {
            if expected != mv.board {
                return Err(IllegalMove::WrongBoard { expected });
            }
        }
        if Self::board_closed(state, board) {
            return Err(IllegalMove::BoardClosed(mv.board));
        }
        if state.board[board][square].is_some() {
            return Err(IllegalMove::SquareTaken);
        }

        let mut next = state.clone();
        next.board[board][square] = Some(mover);
        if next.board_winners[board].is_none() {
            next.board_winners[board] = line_winner(&next.board[board]);
        }

        next.status = if let Some(winner) = line_winner(&next.board_winners) {
            GameStatus::won_by(winner)
        } else if (0..BOARD_SIZE).all(|b| Self::board_closed(&next, b)) {
            GameStatus::Draw
        } else {
            GameStatus::InProgress
        };

        next.active_board = if next.status.is_open() && !Self::board_closed(&next, square) {
            Some(mv.square)
        } else {
            None
        };
        next.next_turn = mover.opponent();
        next.move_count += 1;
        Ok(next)
    }
}
