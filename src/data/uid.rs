use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unique ordered identity of one bar.
///
/// Ordering is by `timestamp` first and `seq` second, which is exactly the derived
/// lexicographic order of the fields. `seq` separates several bars that share one
/// timestamp (e.g. multiple Renko boxes produced by a single raw candle).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Uid {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub seq: u32,
}

impl Uid {
    pub const MIN: Uid = Uid {
        timestamp: i64::MIN,
        seq: 0,
    };

    pub const MAX: Uid = Uid {
        timestamp: i64::MAX,
        seq: u32::MAX,
    };

    #[inline]
    pub const fn new(timestamp: i64, seq: u32) -> Self {
        Self { timestamp, seq }
    }

    /// Uid of the first bar at `timestamp`.
    #[inline]
    pub const fn at(timestamp: i64) -> Self {
        Self { timestamp, seq: 0 }
    }

    /// A virtual Uid `delta_ms` away from this one, on the same lattice (seq 0).
    #[inline]
    pub fn shifted(&self, delta_ms: i64) -> Self {
        Self::at(self.timestamp.saturating_add(delta_ms))
    }

    /// Wall-clock date of the bar. Falls back to the epoch for out-of-range timestamps.
    pub fn date(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Uid {
    fn from(date: DateTime<Utc>) -> Self {
        Self::at(date.timestamp_millis())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timestamp, self.seq)
    }
}

/// Anything stored in a sorted container exposes its ordering key.
pub trait Keyed {
    fn uid(&self) -> Uid;
}

impl Keyed for Uid {
    #[inline]
    fn uid(&self) -> Uid {
        *self
    }
}
