//! Virtualized time-series windowing and incremental derived data for financial charts.
//!
//! A [`Chart`](chart::Chart) owns one raw candle source fed by a [`RawProvider`](provider::raw::RawProvider),
//! any number of derived series (renko, range bars, line break, indicators) recomputed
//! incrementally from it, and a viewport that maps pixels to candle identities across
//! resident and not-yet-loaded data.

mod macros;

pub mod chart;
pub mod clock;
pub mod compute;
pub mod config;
pub mod data;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod storage;
pub mod viewport;
