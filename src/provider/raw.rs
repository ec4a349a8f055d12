use std::collections::{BTreeMap, HashSet};

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::{
    config::{EngineConfig, RetryPolicy},
    data::{
        candle::Candle,
        domain::Interval,
        extension::CandleExtension,
        range::{self, AmountRange, Narrowed, RangeOps},
        uid::Uid,
    },
    error::{ChartflowResult, RangeError},
    provider::request::{FetchError, LoadRequest, RequestId},
    storage::{event::Change, store::SortedStore},
};

/// Ids issued by one load call.
pub type Issued = SmallVec<[RequestId; 2]>;

/// Upstream market data provider.
///
/// Calls must return immediately. Results are handed back later through
/// [`RawSource::complete`] (or `Chart::complete`) with the same [`RequestId`], in any order.
pub trait RawProvider {
    /// `|count|` records starting at `from` (inclusive), backward when `count < 0`.
    fn load(&mut self, id: RequestId, from: Uid, count: i64);

    fn load_range(&mut self, id: RequestId, first: Uid, last: Uid);

    /// Keeps `[first, last]` from being evicted upstream.
    fn lock(&mut self, _first: Uid, _last: Uid) {}
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request: LoadRequest,
    retried: bool,
}

// ================================================================================================
// Raw Source
// ================================================================================================

/// Resident raw candles plus the bookkeeping of outstanding provider fetches.
///
/// Every load is narrowed against resident data and diffed against its bounds first, so
/// only true gaps go upstream. A request equal to one already in flight is not re-issued.
pub struct RawSource<P> {
    store: SortedStore<Candle>,
    provider: P,
    extensions: Vec<Box<dyn CandleExtension>>,
    in_flight: BTreeMap<RequestId, InFlight>,
    abandoned: HashSet<RequestId>,
    next_id: u64,
    ops: RangeOps,
    retry: RetryPolicy,
    /// Edges the provider could not extend: `(oldest, newest)`.
    exhausted: (Option<Uid>, Option<Uid>),
}

impl<P: RawProvider> RawSource<P> {
    pub fn new(provider: P, interval: Interval, config: &EngineConfig) -> ChartflowResult<Self> {
        Ok(Self {
            store: SortedStore::new(),
            provider,
            extensions: Vec::new(),
            in_flight: BTreeMap::new(),
            abandoned: HashSet::new(),
            next_id: 0,
            ops: RangeOps::new(interval)?,
            retry: config.retry,
            exhausted: (None, None),
        })
    }

    pub fn with_extension(mut self, extension: Box<dyn CandleExtension>) -> Self {
        self.add_extension(extension);
        self
    }

    pub fn add_extension(&mut self, extension: Box<dyn CandleExtension>) {
        debug!(fields = ?extension.fields(), "Extension injected");
        self.extensions.push(extension);
    }

    pub fn store(&self) -> &SortedStore<Candle> {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn interval(&self) -> Interval {
        self.ops.interval()
    }

    pub fn ops(&self) -> RangeOps {
        self.ops
    }

    /// Requests still waiting for a completion, oldest first.
    pub fn in_flight(&self) -> impl Iterator<Item = (RequestId, LoadRequest)> + '_ {
        self.in_flight.iter().map(|(id, f)| (*id, f.request))
    }

    pub fn is_in_flight(&self, request: &LoadRequest) -> bool {
        self.in_flight.values().any(|f| f.request == *request)
    }

    // ============================================================================
    // Loading
    // ============================================================================

    /// `|count|` records from `from`, forward or backward by sign.
    #[tracing::instrument(skip_all, fields(from = %from, count = count))]
    pub fn load(&mut self, from: Uid, count: i64) -> ChartflowResult<Issued> {
        if count == 0 {
            return Err(RangeError::ZeroCount(from).into());
        }
        self.request(LoadRequest::counted(from, count))
    }

    #[tracing::instrument(skip_all, fields(first = %first, last = %last))]
    pub fn load_range(&mut self, first: Uid, last: Uid) -> ChartflowResult<Issued> {
        self.request(LoadRequest::range(first, last))
    }

    /// Narrows `request` against resident data and issues the remaining gaps.
    pub fn request(&mut self, request: LoadRequest) -> ChartflowResult<Issued> {
        let residual = match range::narrow(request.amount(), &self.store) {
            Narrowed::Satisfied => {
                trace!(request = %request, "Request satisfied by resident data");
                return Ok(Issued::new());
            }
            Narrowed::Residual(r) => r,
        };

        let pieces = match self.store.bounds() {
            Some((first, last)) => self
                .ops
                .difference(residual, AmountRange::bounded(first, last))?
                .unwrap_or_default(),
            None => std::iter::once(residual).collect(),
        };

        Ok(pieces
            .into_iter()
            .filter_map(|piece| self.issue(LoadRequest::from(piece), false))
            .collect())
    }

    fn issue(&mut self, request: LoadRequest, retried: bool) -> Option<RequestId> {
        if self.is_in_flight(&request) {
            trace!(request = %request, "Request already in flight");
            return None;
        }
        if let AmountRange::Counted { start, count } = request.amount()
            && self.is_exhausted(start, count)
        {
            trace!(request = %request, "Provider has no data past this edge");
            return None;
        }
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.in_flight.insert(id, InFlight { request, retried });

        match request.amount() {
            AmountRange::Counted { start, count } => self.provider.load(id, start, count),
            AmountRange::Bounded { start, end } => self.provider.load_range(id, start, end),
        }
        debug!(id = %id, request = %request, retried, "Fetch issued");
        Some(id)
    }

    pub fn lock(&mut self, first: Uid, last: Uid) {
        self.provider.lock(first, last);
    }

    // ============================================================================
    // Completion
    // ============================================================================

    /// Merges a provider completion.
    ///
    /// Completions of requests this source no longer tracks are still merged, except for
    /// requests abandoned by [`RawSource::reset`]. A failure is logged and dropped, or
    /// re-issued once under [`RetryPolicy::Once`].
    #[tracing::instrument(skip_all, fields(id = %id))]
    pub fn complete(
        &mut self,
        id: RequestId,
        result: Result<Vec<Candle>, FetchError>,
    ) -> Option<Change> {
        if self.abandoned.remove(&id) {
            debug!("Dropping completion of an abandoned request");
            return None;
        }
        let entry = self.in_flight.remove(&id);

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, request = ?entry.map(|f| f.request), "Fetch failed");
                if let Some(f) = entry
                    && self.retry == RetryPolicy::Once
                    && !f.retried
                {
                    self.issue(f.request, true);
                }
                return None;
            }
        };

        let short = entry.and_then(|f| match f.request.amount() {
            AmountRange::Counted { count, .. } if (batch.len() as u64) < count.unsigned_abs() => {
                Some(count.signum())
            }
            _ => None,
        });
        let edges = self.store.bounds();
        let change = self.store.merge(batch);
        if let Some(c) = &change {
            self.forget_exhaustion(c);
        }
        if let Some(direction) = short
            && self.store.bounds() == edges
        {
            self.mark_exhausted(direction);
        }

        let change = change?;
        self.apply_extensions(&change);
        debug!(
            first = %change.first,
            last = %change.last,
            count = change.count,
            resident = self.store.len(),
            "Raw data merged"
        );
        Some(change)
    }

    /// Whether a counted fetch from `start` would only reach past a known end of history.
    pub fn is_exhausted(&self, start: Uid, count: i64) -> bool {
        match self.exhausted {
            (_, Some(newest)) if count > 0 => start >= newest,
            (Some(oldest), _) if count < 0 => start <= oldest,
            _ => false,
        }
    }

    fn mark_exhausted(&mut self, direction: i64) {
        let edge = if direction > 0 {
            self.store.last()
        } else {
            self.store.first()
        };
        let Some(edge) = edge.map(|c| c.uid) else {
            return;
        };
        debug!(edge = %edge, direction, "Provider has nothing past the edge, end of history");
        if direction > 0 {
            self.exhausted.1 = Some(edge);
        } else {
            self.exhausted.0 = Some(edge);
        }
    }

    /// Data that arrived past a mark proves the mark outdated.
    fn forget_exhaustion(&mut self, change: &Change) {
        if self.exhausted.1.is_some_and(|newest| change.last > newest) {
            self.exhausted.1 = None;
        }
        if self.exhausted.0.is_some_and(|oldest| change.first < oldest) {
            self.exhausted.0 = None;
        }
    }

    /// Re-applies every extension to the merged span and the record that follows it.
    fn apply_extensions(&mut self, change: &Change) {
        if self.extensions.is_empty() {
            return;
        }
        let start = self.store.lower_bound(change.first);
        let end = match self.store.position(change.last) {
            Ok(i) => i + 2,
            Err(i) => i + 1,
        };
        let extensions = &self.extensions;
        self.store.update_with_prev(start..end, |prev, current| {
            for ext in extensions {
                ext.extend(prev, current);
            }
        });
    }

    /// Drops resident data and forgets outstanding requests, e.g. after an interval change.
    pub fn reset(&mut self, interval: Interval) -> ChartflowResult<()> {
        self.ops = RangeOps::new(interval)?;
        self.store.clear();
        self.exhausted = (None, None);
        let pending = std::mem::take(&mut self.in_flight);
        self.abandoned.extend(pending.into_keys());
        debug!(interval = interval.millis(), "Raw source reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::extension::{TRUE_RANGE, TrueRange};

    const DAY: i64 = 86_400_000;

    fn day(n: i64) -> Uid {
        Uid::at(n * DAY)
    }

    fn bars(days: std::ops::RangeInclusive<i64>) -> Vec<Candle> {
        days.map(|d| {
            let p = 100.0 + d as f64;
            Candle::ohlc(day(d), p, p + 1.0, p - 1.0, p)
        })
        .collect()
    }

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<(RequestId, LoadRequest)>,
        locks: usize,
    }

    impl RawProvider for Recorder {
        fn load(&mut self, id: RequestId, from: Uid, count: i64) {
            self.calls.push((id, LoadRequest::counted(from, count)));
        }

        fn load_range(&mut self, id: RequestId, first: Uid, last: Uid) {
            self.calls.push((id, LoadRequest::range(first, last)));
        }

        fn lock(&mut self, _first: Uid, _last: Uid) {
            self.locks += 1;
        }
    }

    fn source(config: &EngineConfig) -> RawSource<Recorder> {
        RawSource::new(Recorder::default(), Interval(DAY), config).unwrap()
    }

    fn loaded(config: &EngineConfig) -> RawSource<Recorder> {
        let mut src = source(config);
        let id = src.load(day(1), 10).unwrap()[0];
        src.complete(id, Ok(bars(1..=10)));
        src
    }

    #[test]
    fn test_resident_request_issues_nothing() {
        let mut src = loaded(&EngineConfig::default());
        assert!(src.load(day(5), 3).unwrap().is_empty());
        assert!(src.load_range(day(2), day(9)).unwrap().is_empty());
        assert_eq!(src.provider().calls.len(), 1, "only the initial load");
    }

    #[test]
    fn test_only_the_gap_goes_upstream() {
        let mut src = loaded(&EngineConfig::default());
        src.load(day(8), 5).unwrap();

        let (_, last) = src.provider().calls.last().copied().unwrap();
        assert_eq!(last, LoadRequest::counted(day(10), 3));
    }

    #[test]
    fn test_equal_request_in_flight_is_deduplicated() {
        let mut src = source(&EngineConfig::default());
        assert_eq!(src.load(day(1), 10).unwrap().len(), 1);
        assert!(src.load(day(1), 10).unwrap().is_empty());
        assert_eq!(src.in_flight().count(), 1);
    }

    #[test]
    fn test_out_of_order_completions_merge() {
        let mut src = source(&EngineConfig::default());
        let a = src.load_range(day(1), day(5)).unwrap()[0];
        let b = src.load_range(day(6), day(10)).unwrap()[0];

        let cb = src.complete(b, Ok(bars(6..=10))).unwrap();
        let ca = src.complete(a, Ok(bars(1..=5))).unwrap();

        assert_eq!(cb, Change::new(day(6), day(10), 5));
        assert_eq!(ca, Change::new(day(1), day(5), 5));
        assert_eq!(src.store().bounds(), Some((day(1), day(10))));
        assert_eq!(src.in_flight().count(), 0);
    }

    #[test]
    fn test_failure_is_removed_from_in_flight() {
        let mut src = source(&EngineConfig::default());
        let id = src.load(day(1), 10).unwrap()[0];

        assert_eq!(src.complete(id, Err(FetchError::new("timeout"))), None);
        assert_eq!(src.in_flight().count(), 0);
        assert_eq!(src.load(day(1), 10).unwrap().len(), 1, "gap can be requested again");
    }

    #[test]
    fn test_retry_once_reissues_a_single_time() {
        let config = EngineConfig::default().with_retry(RetryPolicy::Once);
        let mut src = source(&config);
        let id = src.load(day(1), 10).unwrap()[0];

        src.complete(id, Err(FetchError::new("boom")));
        let (retry_id, req) = src.in_flight().next().expect("retry issued");
        assert_eq!(req, LoadRequest::counted(day(1), 10));

        src.complete(retry_id, Err(FetchError::new("boom")));
        assert_eq!(src.in_flight().count(), 0, "second failure is final");
        assert_eq!(src.provider().calls.len(), 2);
    }

    #[test]
    fn test_extensions_cover_merged_span_and_successor() {
        let mut src = source(&EngineConfig::default()).with_extension(Box::new(TrueRange));
        let late = src.load_range(day(3), day(5)).unwrap()[0];
        src.complete(late, Ok(bars(3..=5)));
        assert_eq!(
            src.store().find(day(3)).unwrap().extensions.get(TRUE_RANGE),
            None,
            "no predecessor yet"
        );

        let early = src.load_range(day(1), day(2)).unwrap()[0];
        src.complete(early, Ok(bars(1..=2)));
        assert_eq!(
            src.store().find(day(3)).unwrap().extensions.get(TRUE_RANGE),
            Some(2.0),
            "successor re-extended once its predecessor arrived"
        );
    }

    #[test]
    fn test_reset_abandons_pending_requests() {
        let mut src = source(&EngineConfig::default());
        let id = src.load(day(1), 10).unwrap()[0];
        src.reset(Interval(DAY / 24)).unwrap();

        assert_eq!(src.complete(id, Ok(bars(1..=10))), None);
        assert!(src.store().is_empty());
        assert_eq!(src.interval(), Interval(DAY / 24));

        src.lock(day(1), day(2));
        assert_eq!(src.provider().locks, 1);
    }

    #[test]
    fn test_answer_that_cannot_extend_the_edge_marks_end_of_history() {
        let mut src = source(&EngineConfig::default());
        let id = src.load(day(1), 20).unwrap()[0];
        src.complete(id, Ok(bars(1..=10)));
        assert!(!src.is_exhausted(day(10), 5), "a capped answer still moved the edge");

        let ask = src.load(day(8), 10).unwrap()[0];
        src.complete(ask, Ok(bars(10..=10)));
        assert!(src.is_exhausted(day(10), 5));
        assert!(!src.is_exhausted(day(1), -5), "backward edge is still open");
        assert!(src.load(day(8), 10).unwrap().is_empty(), "nothing past day 10");

        let live = src.load_range(day(11), day(12)).unwrap()[0];
        src.complete(live, Ok(bars(11..=12)));
        assert!(!src.is_exhausted(day(12), 5), "newer data lifts the mark");
    }

    #[test]
    fn test_capped_answers_keep_backfilling() {
        let mut src = source(&EngineConfig::default());
        let id = src.load(day(100), -50).unwrap()[0];
        src.complete(id, Ok(bars(71..=100)));
        assert!(!src.is_exhausted(day(71), -20));

        let more = src.load(day(71), -50).unwrap();
        assert_eq!(more.len(), 1, "older history is still requested");
        src.complete(more[0], Ok(bars(41..=70)));
        assert_eq!(src.store().bounds(), Some((day(41), day(100))));

        let dry = src.load(day(41), -10).unwrap()[0];
        src.complete(dry, Ok(Vec::new()));
        assert!(src.is_exhausted(day(41), -10));
        assert!(src.load(day(45), -20).unwrap().is_empty());
    }

    #[test]
    fn test_zero_count_is_rejected() {
        let mut src = source(&EngineConfig::default());
        assert!(src.load(day(1), 0).is_err());
    }
}
