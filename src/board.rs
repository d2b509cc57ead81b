//! Normalized board state handed to the match-state store.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VersusError};
use crate::protocol::{MatchId, MatchUpdatePayload};

/// Number of cells on the board.
pub const BOARD_CELLS: usize = 9;

/// A player's mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    fn from_cell(c: char) -> Option<Self> {
        match c {
            'X' | 'x' => Some(Self::X),
            'O' | 'o' => Some(Self::O),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
        }
    }
}

impl std::str::FromStr for Mark {
    type Err = VersusError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.trim().chars();
        match (chars.next().and_then(Mark::from_cell), chars.next()) {
            (Some(mark), None) => Ok(mark),
            _ => Err(VersusError::MalformedUpdate(format!("unknown mark {s:?}"))),
        }
    }
}

/// Whether an update replaces the view wholesale or follows a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Snapshot,
    Update,
}

/// A fully validated board update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardUpdate {
    pub kind: UpdateKind,
    pub match_id: Option<MatchId>,
    pub cells: [Option<Mark>; BOARD_CELLS],
    pub current_turn: Mark,
    pub winner: Option<String>,
    pub turns_left: usize,
    pub is_game_over: bool,
    pub winning_combination: Vec<usize>,
}

impl BoardUpdate {
    /// Validate and normalize a wire payload.
    ///
    /// Fails without producing anything when `board` or `current_turn` is
    /// missing, the board is longer than [`BOARD_CELLS`], or the turn is not a
    /// mark. A board shorter than [`BOARD_CELLS`] is padded with empty cells.
    pub fn from_payload(kind: UpdateKind, payload: MatchUpdatePayload) -> Result<Self> {
        let board = payload
            .board
            .ok_or_else(|| VersusError::MalformedUpdate("missing board".into()))?;
        let turn = payload
            .current_turn
            .ok_or_else(|| VersusError::MalformedUpdate("missing current_turn".into()))?;

        let cells = decode_board(&board)?;
        let current_turn = turn.parse::<Mark>()?;
        let winner = payload
            .winner
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());
        let winning_combination: Vec<usize> = payload
            .winning_combination
            .unwrap_or_default()
            .into_iter()
            .filter(|&i| i < BOARD_CELLS)
            .collect();

        Ok(Self {
            kind,
            match_id: payload.match_id,
            turns_left: cells.iter().filter(|c| c.is_none()).count(),
            is_game_over: winner.is_some() || payload.is_completed,
            cells,
            current_turn,
            winner,
            winning_combination,
        })
    }

    /// Cell contents as display strings; empty cells are `""`.
    pub fn cell_values(&self) -> [&'static str; BOARD_CELLS] {
        self.cells.map(|c| c.map_or("", Mark::as_str))
    }
}

fn decode_board(board: &str) -> Result<[Option<Mark>; BOARD_CELLS]> {
    let len = board.chars().count();
    if len > BOARD_CELLS {
        return Err(VersusError::MalformedUpdate(format!(
            "board has {len} cells, expected {BOARD_CELLS}"
        )));
    }
    let mut cells = [None; BOARD_CELLS];
    for (cell, c) in cells.iter_mut().zip(board.chars()) {
        *cell = Mark::from_cell(c);
    }
    Ok(cells)
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

    fn payload(board: Option<&str>, turn: Option<&str>) -> MatchUpdatePayload {
        MatchUpdatePayload {
            board: board.map(Into::into),
            current_turn: turn.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn short_board_is_padded() {
        let update =
            BoardUpdate::from_payload(UpdateKind::Update, payload(Some("XOX_____"), Some("O")))
                .unwrap();
        assert_eq!(update.cell_values(), ["X", "O", "X", "", "", "", "", "", ""]);
        assert_eq!(update.turns_left, 6);
        assert!(!update.is_game_over);
        assert_eq!(update.current_turn, Mark::O);
        assert!(update.winning_combination.is_empty());
    }

    #[test]
    fn remaining_cells_match_placeholders() {
        let update =
            BoardUpdate::from_payload(UpdateKind::Snapshot, payload(Some("XO_X_O__X"), Some("O")))
                .unwrap();
        assert_eq!(update.turns_left, 4);
        for (value, c) in update.cell_values().iter().zip("XO_X_O__X".chars()) {
            assert_eq!(value.is_empty(), c == '_');
        }
    }

    #[test]
    fn winner_ends_the_game() {
        let mut p = payload(Some("XXXOO____"), Some("O"));
        p.winner = Some("X".into());
        p.winning_combination = Some(vec![0, 1, 2, 42]);
        let update = BoardUpdate::from_payload(UpdateKind::Update, p).unwrap();
        assert!(update.is_game_over);
        assert_eq!(update.winner.as_deref(), Some("X"));
        assert_eq!(update.winning_combination, vec![0, 1, 2]);
    }

    #[test]
    fn completed_flag_ends_the_game_without_winner() {
        let mut p = payload(Some("XOXXOOOXX"), Some("X"));
        p.is_completed = true;
        p.winner = Some("  ".into());
        let update = BoardUpdate::from_payload(UpdateKind::Update, p).unwrap();
        assert!(update.is_game_over);
        assert!(update.winner.is_none());
        assert_eq!(update.turns_left, 0);
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(matches!(
            BoardUpdate::from_payload(UpdateKind::Update, payload(None, Some("X"))),
            Err(VersusError::MalformedUpdate(_))
        ));
        assert!(matches!(
            BoardUpdate::from_payload(UpdateKind::Update, payload(Some("_________"), None)),
            Err(VersusError::MalformedUpdate(_))
        ));
    }

    #[test]
    fn oversized_board_and_bad_turn_are_rejected() {
        assert!(BoardUpdate::from_payload(UpdateKind::Update, payload(Some("__________"), Some("X")))
            .is_err());
        assert!(BoardUpdate::from_payload(UpdateKind::Update, payload(Some("_________"), Some("Z")))
            .is_err());
    }
}
