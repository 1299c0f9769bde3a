//! Newtypes shared across the encoder stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Presentation time in seconds (f64 precision).
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeCode(pub f64);

impl TimeCode {
    pub const ZERO: Self = Self(0.0);

    pub fn from_micros(micros: u64) -> Self {
        Self(micros as f64 / 1_000_000.0)
    }

    /// Whole microseconds, clamped at zero. This is the unit the encoder
    /// stamps onto submitted pictures.
    pub fn as_micros(self) -> u64 {
        if self.0 <= 0.0 {
            0
        } else {
            (self.0 * 1_000_000.0).round() as u64
        }
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

/// Stable identity of a GPU resource, issued by whoever owns the resource.
///
/// Caches key on this instead of on raw pointer values, so a freed and
/// re-allocated texture that happens to land at the same address is never
/// mistaken for the old one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}
