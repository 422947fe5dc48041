//! Game modes and per-room settings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Supported game modes.
///
/// Modes travel on the wire as their numeric identifier, either as a number
/// or as a string (`"1"`, `"2"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    /// Turn-based drawing with word guessing and scoring.
    DrawingGuessing,
    /// Everyone draws on a shared canvas, no scoring.
    CollaborativeCanvas,
}

impl GameMode {
    /// All modes, in identifier order.
    pub const ALL: [GameMode; 2] = [GameMode::DrawingGuessing, GameMode::CollaborativeCanvas];

    /// Numeric identifier.
    #[must_use]
    pub const fn id(&self) -> u8 {
        match self {
            GameMode::DrawingGuessing => 1,
            GameMode::CollaborativeCanvas => 2,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            GameMode::DrawingGuessing => "Drawing & Guessing",
            GameMode::CollaborativeCanvas => "Collaborative Canvas",
        }
    }

    /// Look up a mode by numeric identifier.
    #[must_use]
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| u64::from(m.id()) == id)
    }

    /// Parse a mode from a JSON value holding a number or a numeric string.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::from_id),
            Value::String(s) => s.trim().parse().ok().and_then(Self::from_id),
            _ => None,
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl Serialize for GameMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id().to_string())
    }
}

impl<'de> Deserialize<'de> for GameMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }

        let id = match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Some(n),
            Raw::Str(s) => s.trim().parse().ok(),
        };
        id.and_then(GameMode::from_id)
            .ok_or_else(|| serde::de::Error::custom("unknown game mode"))
    }
}

/// Per-room game configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    #[serde(rename = "mode_id")]
    pub mode: GameMode,
    pub mode_name: String,
    pub total_rounds: u32,
    /// Round length in seconds.
    pub round_duration: u64,
    /// Pause before each round in seconds.
    pub preparation_duration: u64,
    pub max_players: usize,
    pub min_players: usize,
}

impl GameSettings {
    /// Default settings for a mode.
    #[must_use]
    pub fn defaults_for(mode: GameMode) -> Self {
        match mode {
            GameMode::DrawingGuessing => Self {
                mode,
                mode_name: mode.name().to_string(),
                total_rounds: 2,
                round_duration: 60,
                preparation_duration: 5,
                max_players: 8,
                min_players: 2,
            },
            GameMode::CollaborativeCanvas => Self {
                mode,
                mode_name: mode.name().to_string(),
                total_rounds: 1,
                round_duration: 120,
                preparation_duration: 5,
                max_players: 10,
                min_players: 2,
            },
        }
    }

    /// Switch to another mode, keeping the numeric settings.
    pub fn switch_mode(&mut self, mode: GameMode) {
        self.mode = mode;
        self.mode_name = mode.name().to_string();
    }

    #[must_use]
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration)
    }

    #[must_use]
    pub fn preparation_duration(&self) -> Duration {
        Duration::from_secs(self.preparation_duration)
    }

    /// Apply a partial update, validating the result as a whole.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the update leaves the settings inconsistent;
    /// the settings are unchanged in that case.
    pub fn apply(&mut self, update: &SettingsUpdate) -> CoreResult<()> {
        let mut next = self.clone();
        if let Some(v) = update.total_rounds {
            next.total_rounds = v;
        }
        if let Some(v) = update.round_duration {
            next.round_duration = v;
        }
        if let Some(v) = update.preparation_duration {
            next.preparation_duration = v;
        }
        if let Some(v) = update.max_players {
            next.max_players = v;
        }
        if let Some(v) = update.min_players {
            next.min_players = v;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the first violated constraint.
    pub fn validate(&self) -> CoreResult<()> {
        if self.total_rounds == 0 {
            return Err(CoreError::invalid("total_rounds must be at least 1"));
        }
        if self.round_duration == 0 {
            return Err(CoreError::invalid("round_duration must be at least 1 second"));
        }
        if self.min_players == 0 {
            return Err(CoreError::invalid("min_players must be at least 1"));
        }
        if self.min_players > self.max_players {
            return Err(CoreError::invalid("min_players exceeds max_players"));
        }
        Ok(())
    }
}

/// Partial settings update as sent by clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub total_rounds: Option<u32>,
    pub round_duration: Option<u64>,
    pub preparation_duration: Option<u64>,
    pub max_players: Option<usize>,
    pub min_players: Option<usize>,
}

impl SettingsUpdate {
    /// Extract the recognised fields from an event content object.
    ///
    /// Unknown fields are ignored; numbers may be sent as strings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a recognised field holds a non-numeric value.
    pub fn from_content(content: &Value) -> CoreResult<Self> {
        fn field(content: &Value, key: &str) -> CoreResult<Option<u64>> {
            match content.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::Number(n)) => n
                    .as_u64()
                    .map(Some)
                    .ok_or_else(|| CoreError::invalid(format!("{key} must be a positive integer"))),
                Some(Value::String(s)) => s
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| CoreError::invalid(format!("{key} must be a positive integer"))),
                Some(_) => Err(CoreError::invalid(format!("{key} must be a positive integer"))),
            }
        }

        let to_u32 = |v: u64| u32::try_from(v).map_err(|_| CoreError::invalid("total_rounds out of range"));
        let to_usize = |v: u64| usize::try_from(v).map_err(|_| CoreError::invalid("player limit out of range"));

        Ok(Self {
            total_rounds: field(content, "total_rounds")?.map(to_u32).transpose()?,
            round_duration: field(content, "round_duration")?,
            preparation_duration: field(content, "preparation_duration")?,
            max_players: field(content, "max_players")?.map(to_usize).transpose()?,
            min_players: field(content, "min_players")?.map(to_usize).transpose()?,
        })
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_from_value() {
        assert_eq!(GameMode::from_value(&json!(1)), Some(GameMode::DrawingGuessing));
        assert_eq!(GameMode::from_value(&json!("2")), Some(GameMode::CollaborativeCanvas));
        assert_eq!(GameMode::from_value(&json!("7")), None);
        assert_eq!(GameMode::from_value(&json!(true)), None);
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&GameMode::CollaborativeCanvas).unwrap(), "\"2\"");
        let m: GameMode = serde_json::from_str("1").unwrap();
        assert_eq!(m, GameMode::DrawingGuessing);
        assert!(serde_json::from_str::<GameMode>("\"9\"").is_err());
    }

    #[test]
    fn test_defaults() {
        let drawing = GameSettings::defaults_for(GameMode::DrawingGuessing);
        assert_eq!(drawing.total_rounds, 2);
        assert_eq!(drawing.round_duration(), Duration::from_secs(60));
        assert_eq!((drawing.min_players, drawing.max_players), (2, 8));

        let canvas = GameSettings::defaults_for(GameMode::CollaborativeCanvas);
        assert_eq!(canvas.total_rounds, 1);
        assert_eq!(canvas.round_duration, 120);
        assert_eq!(canvas.max_players, 10);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut settings = GameSettings::defaults_for(GameMode::DrawingGuessing);
        let update =
            SettingsUpdate::from_content(&json!({"total_rounds": "4", "round_duration": 90})).unwrap();
        settings.apply(&update).unwrap();
        assert_eq!(settings.total_rounds, 4);
        assert_eq!(settings.round_duration, 90);
        assert_eq!(settings.max_players, 8);
    }

    #[test]
    fn test_apply_rejects_inconsistent_update() {
        let mut settings = GameSettings::defaults_for(GameMode::DrawingGuessing);
        let before = settings.clone();
        let update = SettingsUpdate {
            min_players: Some(9),
            ..SettingsUpdate::default()
        };
        assert!(settings.apply(&update).is_err());
        assert_eq!(settings, before);
    }

    #[test]
    fn test_update_rejects_non_numeric() {
        assert!(SettingsUpdate::from_content(&json!({"total_rounds": "many"})).is_err());
        assert!(SettingsUpdate::from_content(&json!({"max_players": -1})).is_err());
        assert!(SettingsUpdate::from_content(&json!({"unrelated": 3}))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_switch_mode_keeps_numbers() {
        let mut settings = GameSettings::defaults_for(GameMode::DrawingGuessing);
        settings.total_rounds = 5;
        settings.switch_mode(GameMode::CollaborativeCanvas);
        assert_eq!(settings.mode, GameMode::CollaborativeCanvas);
        assert_eq!(settings.mode_name, "Collaborative Canvas");
        assert_eq!(settings.total_rounds, 5);
    }
}
