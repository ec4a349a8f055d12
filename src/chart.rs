use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    compute::{
        Compute,
        source::{DerivedSeries, DerivedSource},
    },
    config::EngineConfig,
    data::{candle::Candle, domain::Interval, extension::CandleExtension, uid::Uid},
    error::{ChartflowError, ChartflowResult, ComputeError, ViewportError},
    provider::{
        raw::{RawProvider, RawSource},
        request::{FetchError, LoadRequest, RequestId},
    },
    storage::{
        cursor::{Cursor, Filter},
        event::{Change, Listener, ListenerId},
        store::SortedStore,
    },
    viewport::{Viewport, grid::GridSpacing},
};

/// Addresses one series of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesId {
    Raw,
    /// Index in registration order.
    Derived(usize),
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesId::Raw => f.write_str("raw"),
            SeriesId::Derived(i) => write!(f, "derived[{i}]"),
        }
    }
}

/// Receivers of raw changes, in subscription order.
enum Subscriber {
    External(ListenerId, Listener<Change>),
    Derived(usize),
}

// ================================================================================================
// Chart
// ================================================================================================

/// The engine facade: one raw source, any number of derived series and an optional
/// viewport bound to one of them.
///
/// Everything runs on the caller's thread. Provider completions enter through
/// [`Chart::complete`]; by the time it returns, every subscriber has seen the change and the
/// fetches it caused have been issued.
pub struct Chart<P> {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    raw: RawSource<P>,
    derived: Vec<Box<dyn DerivedSeries>>,
    subscribers: Vec<Subscriber>,
    next_listener: u64,
    viewport: Option<(SeriesId, Viewport)>,
}

impl<P: RawProvider> Chart<P> {
    pub fn new(provider: P, interval: Interval, config: EngineConfig) -> ChartflowResult<Self> {
        config.validate()?;
        let raw = RawSource::new(provider, interval, &config)?;
        Ok(Self {
            config,
            clock: Box::new(SystemClock),
            raw,
            derived: Vec::new(),
            subscribers: Vec::new(),
            next_listener: 0,
            viewport: None,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_extension(mut self, extension: Box<dyn CandleExtension>) -> Self {
        self.raw.add_extension(extension);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn interval(&self) -> Interval {
        self.raw.interval()
    }

    pub fn raw(&self) -> &RawSource<P> {
        &self.raw
    }

    pub fn provider_mut(&mut self) -> &mut P {
        self.raw.provider_mut()
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref().map(|(_, vp)| vp)
    }

    /// Registers a derived series. It receives raw changes after every earlier subscriber.
    pub fn add_derived<C: Compute + 'static>(
        &mut self,
        name: &str,
        compute: C,
    ) -> ChartflowResult<SeriesId> {
        let source = DerivedSource::new(name, compute, self.interval(), self.config.clone())?;
        let index = self.derived.len();
        self.derived.push(Box::new(source));
        self.subscribers.push(Subscriber::Derived(index));
        info!(series = name, index, "Derived series registered");
        Ok(SeriesId::Derived(index))
    }

    pub fn derived(&self, index: usize) -> ChartflowResult<&dyn DerivedSeries> {
        self.derived
            .get(index)
            .map(|d| d.as_ref())
            .ok_or_else(|| ComputeError::UnknownSeries(index).into())
    }

    pub fn subscribe(
        &mut self,
        series: SeriesId,
        listener: Listener<Change>,
    ) -> ChartflowResult<ListenerId> {
        match series {
            SeriesId::Raw => {
                let id = ListenerId(self.next_listener);
                self.next_listener += 1;
                self.subscribers.push(Subscriber::External(id, listener));
                Ok(id)
            }
            SeriesId::Derived(i) => Ok(derived_mut(&mut self.derived, i)?.subscribe(listener)),
        }
    }

    pub fn unsubscribe(&mut self, series: SeriesId, id: ListenerId) -> ChartflowResult<bool> {
        match series {
            SeriesId::Raw => {
                let before = self.subscribers.len();
                self.subscribers
                    .retain(|s| !matches!(s, Subscriber::External(lid, _) if *lid == id));
                Ok(self.subscribers.len() != before)
            }
            SeriesId::Derived(i) => Ok(derived_mut(&mut self.derived, i)?.unsubscribe(id)),
        }
    }

    // ============================================================================
    // Data flow
    // ============================================================================

    pub fn load(&mut self, series: SeriesId, from: Uid, count: i64) -> ChartflowResult<()> {
        if count == 0 {
            return Err(crate::error::RangeError::ZeroCount(from).into());
        }
        self.route(series, LoadRequest::counted(from, count))
    }

    pub fn load_range(&mut self, series: SeriesId, first: Uid, last: Uid) -> ChartflowResult<()> {
        self.route(series, LoadRequest::range(first, last))
    }

    pub fn lock(&mut self, first: Uid, last: Uid) {
        self.raw.lock(first, last);
    }

    fn route(&mut self, series: SeriesId, request: LoadRequest) -> ChartflowResult<()> {
        match series {
            SeriesId::Raw => {
                self.raw.request(request)?;
            }
            SeriesId::Derived(i) => {
                let now = self.clock.now();
                let fetches =
                    derived_mut(&mut self.derived, i)?.request(self.raw.store(), request.amount(), now)?;
                for fetch in fetches {
                    self.raw.request(fetch)?;
                }
            }
        }
        Ok(())
    }

    /// Hands a provider completion to the engine.
    ///
    /// The merged change is delivered to raw subscribers and derived series in subscription
    /// order; fetches the derived series still need are issued afterwards. A derived series
    /// that fails does not stop delivery to the ones after it: the first such error is
    /// returned once every subscriber has been served.
    #[tracing::instrument(skip_all, fields(id = %id))]
    pub fn complete(
        &mut self,
        id: RequestId,
        result: Result<Vec<Candle>, FetchError>,
    ) -> ChartflowResult<Option<Change>> {
        let Some(change) = self.raw.complete(id, result) else {
            return Ok(None);
        };
        let now = self.clock.now();

        let mut fetches = Vec::new();
        let mut failure: Option<ChartflowError> = None;
        for subscriber in self.subscribers.iter_mut() {
            match subscriber {
                Subscriber::External(_, listener) => listener(&change),
                Subscriber::Derived(i) => {
                    match self.derived[*i].on_raw_changed(self.raw.store(), &change, now) {
                        Ok(outcome) => fetches.extend(outcome.fetches),
                        Err(e) => {
                            let series = SeriesId::Derived(*i);
                            warn!(series = %series, error = %e, "Derived series failed");
                            failure.get_or_insert(e);
                        }
                    }
                }
            }
        }

        debug!(change = %change, fetches = fetches.len(), "Raw change delivered");
        for fetch in fetches {
            self.raw.request(fetch)?;
        }
        if let Some((series, vp)) = self.viewport.as_mut() {
            vp.rebase(series_store(&self.raw, &self.derived, *series)?);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(Some(change)),
        }
    }

    // ============================================================================
    // Rendering contract
    // ============================================================================

    pub fn store(&self, series: SeriesId) -> ChartflowResult<&SortedStore<Candle>> {
        series_store(&self.raw, &self.derived, series)
    }

    pub fn iterator(
        &self,
        series: SeriesId,
        filter: Option<Filter<Candle>>,
    ) -> ChartflowResult<Cursor<Candle>> {
        Ok(self.store(series)?.iterator(filter))
    }

    /// Binds a viewport to `series` and loads its first frame.
    pub fn bind_viewport(
        &mut self,
        series: SeriesId,
        frame_start: Uid,
        n: usize,
        width: u32,
    ) -> ChartflowResult<()> {
        self.store(series)?;
        let vp = Viewport::new(frame_start, n, width, self.interval(), self.config.clone())?;
        info!(series = %series, frame_start = %frame_start, n, width, "Viewport bound");
        self.viewport = Some((series, vp));
        self.route(series, LoadRequest::counted(frame_start, n as i64))
    }

    #[tracing::instrument(skip(self))]
    pub fn pan(&mut self, dx: f64) -> ChartflowResult<()> {
        let (series, vp) = self.viewport.as_mut().ok_or(ViewportError::NotBound)?;
        let series = *series;
        let store = series_store(&self.raw, &self.derived, series)?;
        if let Some(fetch) = vp.move_by(store, dx)? {
            self.route(series, fetch)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn zoom(&mut self, direction: i32) -> ChartflowResult<()> {
        let (series, vp) = self.viewport.as_mut().ok_or(ViewportError::NotBound)?;
        let series = *series;
        let store = series_store(&self.raw, &self.derived, series)?;
        if let Some(fetch) = vp.scale(store, direction)? {
            self.route(series, fetch)?;
        }
        Ok(())
    }

    pub fn to_x(&self, uid: Uid) -> ChartflowResult<f64> {
        let (vp, store) = self.bound()?;
        Ok(vp.to_x(store, uid))
    }

    pub fn to_value(&self, x: f64) -> ChartflowResult<Uid> {
        let (vp, store) = self.bound()?;
        Ok(vp.to_value(store, x))
    }

    pub fn range(&self) -> ChartflowResult<(Uid, Uid)> {
        let (vp, store) = self.bound()?;
        Ok(vp.range(store))
    }

    pub fn grid(&self, spacing: &dyn GridSpacing) -> ChartflowResult<Vec<Uid>> {
        let (vp, store) = self.bound()?;
        Ok(vp.grid(store, spacing))
    }

    pub fn resize(&mut self, width: u32) -> ChartflowResult<()> {
        let (_, vp) = self.viewport.as_mut().ok_or(ViewportError::NotBound)?;
        vp.resize(width)
    }

    /// Switches the chart resolution. All resident data and pending tasks are dropped and
    /// the visible frame is reloaded.
    #[tracing::instrument(skip_all, fields(interval = interval.millis()))]
    pub fn change_interval(&mut self, interval: Interval) -> ChartflowResult<()> {
        self.raw.reset(interval)?;
        for series in self.derived.iter_mut() {
            series.reset(interval)?;
        }
        let Some((series, vp)) = self.viewport.as_mut() else {
            return Ok(());
        };
        vp.set_interval(interval)?;
        let (series, frame_start, n) = (*series, vp.frame_start(), vp.n());
        info!(series = %series, "Interval changed, reloading frame");
        self.route(series, LoadRequest::counted(frame_start, n as i64))
    }

    fn bound(&self) -> ChartflowResult<(&Viewport, &SortedStore<Candle>)> {
        let (series, vp) = self.viewport.as_ref().ok_or(ViewportError::NotBound)?;
        Ok((vp, self.store(*series)?))
    }
}

fn series_store<'a, P>(
    raw: &'a RawSource<P>,
    derived: &'a [Box<dyn DerivedSeries>],
    series: SeriesId,
) -> ChartflowResult<&'a SortedStore<Candle>>
where
    P: RawProvider,
{
    match series {
        SeriesId::Raw => Ok(raw.store()),
        SeriesId::Derived(i) => derived
            .get(i)
            .map(|d| d.store())
            .ok_or_else(|| ComputeError::UnknownSeries(i).into()),
    }
}

fn derived_mut(
    derived: &mut [Box<dyn DerivedSeries>],
    index: usize,
) -> ChartflowResult<&mut Box<dyn DerivedSeries>> {
    derived
        .get_mut(index)
        .ok_or_else(|| ComputeError::UnknownSeries(index).into())
}
