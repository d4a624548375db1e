//! Conversation modes.
//!
//! The backend keeps a separate conversation per mode. Modes form a fixed
//! cycle and the client only ever advances to the next one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the backend's conversation modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Ss,
    Gg,
    Dd,
}

impl Mode {
    /// Cycle order used by [`Mode::next`].
    pub const CYCLE: [Mode; 3] = [Mode::Ss, Mode::Gg, Mode::Dd];

    /// The next mode in the cycle, wrapping around after the last one.
    pub fn next(self) -> Mode {
        let idx = Self::CYCLE
            .iter()
            .position(|m| *m == self)
            .unwrap_or_default();
        Self::CYCLE[(idx + 1) % Self::CYCLE.len()]
    }

    /// Wire identifier, also used as the `type` of outbound chat frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Ss => "ss",
            Mode::Gg => "gg",
            Mode::Dd => "dd",
        }
    }

    /// Parse a stored mode, falling back to the default for anything unknown.
    pub fn from_stored(value: &str) -> Mode {
        value.parse().unwrap_or_default()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ss" => Ok(Mode::Ss),
            "gg" => Ok(Mode::Gg),
            "dd" => Ok(Mode::Dd),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
