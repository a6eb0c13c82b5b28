//! Log severity levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a log record.
///
/// Named levels are spaced four apart so intermediate severities can be
/// expressed (e.g. `WARN - 1`). The default is [`Level::INFO`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Level(pub i32);

impl Level {
    pub const DEBUG: Level = Level(-4);
    pub const INFO: Level = Level(0);
    pub const WARN: Level = Level(4);
    pub const ERROR: Level = Level(8);

    /// Distance between two adjacent named levels.
    pub const STEP: i32 = 4;

    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Parse a level name (`debug`, `info`, `warn`, `error`) or an integer.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::DEBUG),
            "info" => Some(Self::INFO),
            "warn" | "warning" => Some(Self::WARN),
            "error" => Some(Self::ERROR),
            other => other.parse::<i32>().ok().map(Level),
        }
    }
}

impl From<i32> for Level {
    fn from(value: i32) -> Self {
        Level(value)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, base) = match self.0 {
            i32::MIN..=-1 => ("DEBUG", Self::DEBUG.0),
            0..=3 => ("INFO", Self::INFO.0),
            4..=7 => ("WARN", Self::WARN.0),
            _ => ("ERROR", Self::ERROR.0),
        };

        let delta = self.0 - base;
        if delta == 0 {
            write!(f, "{name}")
        } else {
            write!(f, "{name}{delta:+}")
        }
    }
}
