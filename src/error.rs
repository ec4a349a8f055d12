use thiserror::Error;

use crate::data::{range::AmountRange, uid::Uid};

pub type ChartflowResult<T> = Result<T, ChartflowError>;

#[derive(Debug, Error)]
pub enum ChartflowError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Viewport(#[from] ViewportError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the range algebra. All of them are programmer errors.
#[derive(Debug, Error, PartialEq)]
pub enum RangeError {
    #[error("Both ranges are unbounded, at least one side needs an explicit end: {a:?} vs {b:?}")]
    Unbounded { a: AmountRange, b: AmountRange },

    #[error("Counted range anchored at {0} has a zero count")]
    ZeroCount(Uid),

    #[error("Range interval must be positive, got {0} ms")]
    NonPositiveInterval(i64),
}

/// Errors raised when a cursor is driven outside of its contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("Cursor is unset, position it with `go_to` or `move_next` first")]
    Unset,

    #[error("`{0}` is not supported on a filtered cursor")]
    UnsupportedOnFiltered(&'static str),
}

/// Errors related to the viewport geometry.
#[derive(Debug, Error, PartialEq)]
pub enum ViewportError {
    #[error("Viewport width must be positive")]
    ZeroWidth,

    #[error("Viewport slot count {n} is outside [{min}, {max}]")]
    InvalidSlotCount { n: usize, min: usize, max: usize },

    #[error("Viewport interval must be positive, got {0} ms")]
    NonPositiveInterval(i64),

    #[error("Pixel delta is not finite: {0}")]
    NonFiniteDelta(f64),

    #[error("No viewport is bound to the chart")]
    NotBound,
}

/// Errors raised by compute delegates and derived sources.
#[derive(Debug, Error, PartialEq)]
pub enum ComputeError {
    #[error("Invalid compute parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown derived series index {0}")]
    UnknownSeries(usize),
}

/// Errors related to engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid engine configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse engine configuration")]
    Json(#[from] serde_json::Error),

    #[error("Invalid period string: '{0}'")]
    InvalidPeriod(String),
}
