use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{range::AmountRange, uid::Uid};

/// Identifies one provider fetch. Completions are matched by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A fetch the engine wants issued upstream.
///
/// `Counted` ranges map to [`RawProvider::load`](super::raw::RawProvider::load),
/// `Bounded` ranges to `load_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadRequest(pub AmountRange);

impl LoadRequest {
    pub fn counted(from: Uid, count: i64) -> Self {
        Self(AmountRange::counted(from, count))
    }

    pub fn range(first: Uid, last: Uid) -> Self {
        Self(AmountRange::bounded(first, last))
    }

    pub fn amount(&self) -> AmountRange {
        self.0
    }
}

impl From<AmountRange> for LoadRequest {
    fn from(range: AmountRange) -> Self {
        Self(range)
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Failure reported by the provider for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Fetch failed: {message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
