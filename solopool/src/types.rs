//! Small shared types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hashing::{U256, target_for_difficulty};

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Pool share difficulty.
///
/// Stored as the float the Stratum protocol exchanges; the corresponding
/// 256-bit share target is derived on demand. Display uses SI suffixes for
/// log readability ("16.4K" rather than "16384").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Difficulty(f64);

impl Difficulty {
    /// Clamp to a sane positive value; garbage becomes difficulty 1.
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Self(value)
        } else {
            Self(1.0)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The share target a hash must not exceed.
    pub fn target(self) -> U256 {
        target_for_difficulty(self.0)
    }
}

impl From<f64> for Difficulty {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;

        if value < 1.0 {
            let s = format!("{:.6}", value);
            let trimmed = s.trim_end_matches('0').trim_end_matches('.');
            return write!(f, "{}", trimmed);
        }

        let (scaled, suffix) = if value >= 1e15 {
            (value / 1e15, "P")
        } else if value >= 1e12 {
            (value / 1e12, "T")
        } else if value >= 1e9 {
            (value / 1e9, "G")
        } else if value >= 1e6 {
            (value / 1e6, "M")
        } else if value >= 1e3 {
            (value / 1e3, "K")
        } else {
            (value, "")
        };

        if scaled >= 100.0 || scaled.fract() == 0.0 {
            write!(f, "{:.0}{}", scaled, suffix)
        } else if scaled >= 10.0 {
            write!(f, "{:.1}{}", scaled, suffix)
        } else {
            write!(f, "{:.2}{}", scaled, suffix)
        }
    }
}
