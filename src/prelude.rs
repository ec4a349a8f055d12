// 1. Traits
pub use crate::clock::Clock;
pub use crate::compute::{Compute, bars::BarBuilder, indicator::StreamingIndicator};
pub use crate::compute::source::DerivedSeries;
pub use crate::data::{extension::CandleExtension, uid::Keyed};
pub use crate::provider::raw::RawProvider;
pub use crate::viewport::grid::GridSpacing;

// 2. The Core Engine Types
pub use crate::chart::{Chart, SeriesId};
pub use crate::compute::{ComputeBatch, Passthrough, source::DerivedSource};
pub use crate::provider::{
    raw::RawSource,
    request::{FetchError, LoadRequest, RequestId},
};
pub use crate::storage::{
    cursor::{Cursor, Filter},
    event::{Change, Listener, ListenerId},
    store::SortedStore,
};
pub use crate::viewport::{Viewport, stepper::Stepper};

// 3. Financial Domain Types
pub use crate::data::candle::Candle;
pub use crate::data::domain::{Interval, Period, Price, SourceField, Volume};
pub use crate::data::range::{AmountRange, RangeOps};
pub use crate::data::uid::Uid;

// 4. Derived Series & Grid Strategies
pub use crate::compute::bars::BarCompute;
pub use crate::compute::indicator::{Ema, IndicatorCompute, Rsi, Sma};
pub use crate::compute::line_break::LineBreak;
pub use crate::compute::range_bar::RangeBars;
pub use crate::compute::renko::Renko;
pub use crate::data::extension::{DirectionalMovement, GainLoss, TrueRange};
pub use crate::viewport::grid::{DayBoundary, EveryNth};

// 5. Errors
pub use crate::error::{
    ChartflowError, ChartflowResult, ComputeError, ConfigError, CursorError, RangeError,
    ViewportError,
};

// 6. Configs & Clocks
pub use crate::clock::{ManualClock, SystemClock};
pub use crate::config::{EngineConfig, RetryPolicy};
