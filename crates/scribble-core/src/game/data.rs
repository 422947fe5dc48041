//! Mode-specific round data.
//!
//! Each engine owns exactly one [`ModeData`] variant and reaches it through
//! the typed accessors, which fail with `Internal` on a mismatch instead of
//! panicking.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::UserId;

/// One drawing action as submitted by a player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stroke {
    pub player_id: UserId,
    pub data: Value,
}

/// Finalized record of one round, used for the end-of-game report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub word: String,
    pub drawer_id: Option<UserId>,
    pub strokes: Vec<Stroke>,
}

/// Round state for the guessing mode.
#[derive(Debug, Clone, Default)]
pub struct DrawingData {
    pub current_word: String,
    pub guessed: HashSet<UserId>,
    pub strokes: Vec<Stroke>,
    /// Keyed by round number. An entry is opened at round start and sealed
    /// with the round's strokes when the round ends.
    pub history: BTreeMap<u32, RoundRecord>,
}

/// Round state for the collaborative mode.
#[derive(Debug, Clone, Default)]
pub struct CanvasData {
    pub current_word: String,
    pub strokes: Vec<Stroke>,
    pub history: BTreeMap<u32, RoundRecord>,
}

/// Mode-specific data held by a game.
#[derive(Debug, Clone)]
pub enum ModeData {
    Drawing(DrawingData),
    Canvas(CanvasData),
}

impl ModeData {
    /// # Errors
    ///
    /// Returns `Internal` if the game holds another mode's data.
    pub fn drawing(&self) -> CoreResult<&DrawingData> {
        match self {
            ModeData::Drawing(d) => Ok(d),
            ModeData::Canvas(_) => Err(CoreError::internal("expected drawing round data")),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if the game holds another mode's data.
    pub fn drawing_mut(&mut self) -> CoreResult<&mut DrawingData> {
        match self {
            ModeData::Drawing(d) => Ok(d),
            ModeData::Canvas(_) => Err(CoreError::internal("expected drawing round data")),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if the game holds another mode's data.
    pub fn canvas(&self) -> CoreResult<&CanvasData> {
        match self {
            ModeData::Canvas(d) => Ok(d),
            ModeData::Drawing(_) => Err(CoreError::internal("expected canvas round data")),
        }
    }

    /// # Errors
    ///
    /// Returns `Internal` if the game holds another mode's data.
    pub fn canvas_mut(&mut self) -> CoreResult<&mut CanvasData> {
        match self {
            ModeData::Canvas(d) => Ok(d),
            ModeData::Drawing(_) => Err(CoreError::internal("expected canvas round data")),
        }
    }

    /// The secret word of the current round.
    #[must_use]
    pub fn current_word(&self) -> &str {
        match self {
            ModeData::Drawing(d) => &d.current_word,
            ModeData::Canvas(d) => &d.current_word,
        }
    }

    /// Strokes drawn so far in the current round.
    #[must_use]
    pub fn strokes(&self) -> &[Stroke] {
        match self {
            ModeData::Drawing(d) => &d.strokes,
            ModeData::Canvas(d) => &d.strokes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_reject_other_variant() {
        let mut data = ModeData::Canvas(CanvasData::default());
        assert!(data.canvas_mut().is_ok());
        assert!(matches!(data.drawing(), Err(CoreError::Internal(_))));
        assert!(matches!(data.drawing_mut(), Err(CoreError::Internal(_))));
    }

    #[test]
    fn test_shared_views() {
        let data = ModeData::Drawing(DrawingData {
            current_word: "Elma".into(),
            ..DrawingData::default()
        });
        assert_eq!(data.current_word(), "Elma");
        assert!(data.strokes().is_empty());
    }
}
