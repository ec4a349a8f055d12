use std::time::Instant;

use tracing::{debug, trace};

use crate::{
    compute::{
        Compute,
        queue::TaskQueue,
        task::{ComputeTask, TaskEnv, TaskId},
    },
    config::EngineConfig,
    data::{
        candle::Candle,
        domain::Interval,
        range::{AmountRange, RangeOps},
        uid::Uid,
    },
    error::{ChartflowResult, RangeError},
    provider::request::LoadRequest,
    storage::{
        event::{Change, EventHub, Listener, ListenerId},
        store::SortedStore,
    },
};

/// Result of routing one raw change through a derived source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOutcome {
    /// The output span that changed, already delivered to listeners.
    pub change: Option<Change>,
    /// Upstream fetches the restarted tasks still need.
    pub fetches: Vec<LoadRequest>,
}

/// Object-safe face of a [`DerivedSource`], so a chart can hold heterogeneous series.
pub trait DerivedSeries {
    fn name(&self) -> &str;

    fn store(&self) -> &SortedStore<Candle>;

    fn pending_tasks(&self) -> usize;

    fn subscribe(&mut self, listener: Listener<Change>) -> ListenerId;

    fn unsubscribe(&mut self, id: ListenerId) -> bool;

    fn request(
        &mut self,
        raw: &SortedStore<Candle>,
        target: AmountRange,
        now: Instant,
    ) -> ChartflowResult<Vec<LoadRequest>>;

    fn on_raw_changed(
        &mut self,
        raw: &SortedStore<Candle>,
        change: &Change,
        now: Instant,
    ) -> ChartflowResult<SourceOutcome>;

    fn reset(&mut self, interval: Interval) -> ChartflowResult<()>;
}

// ================================================================================================
// Derived Source
// ================================================================================================

/// A series computed from raw candles, kept resident and recomputed incrementally.
///
/// Requests against it become [`ComputeTask`]s. Each raw change sweeps stale tasks, runs the
/// compute delegate once, splices its result into the output, notifies listeners and
/// restarts the tasks the change concerns.
pub struct DerivedSource<C> {
    name: String,
    store: SortedStore<Candle>,
    compute: C,
    tasks: TaskQueue,
    hub: EventHub<Change>,
    /// `false` while the output lags behind raw data it never saw.
    in_sync: bool,
    ops: RangeOps,
    config: EngineConfig,
    next_task: u64,
}

impl<C: Compute> DerivedSource<C> {
    pub fn new(
        name: impl Into<String>,
        compute: C,
        interval: Interval,
        config: EngineConfig,
    ) -> ChartflowResult<Self> {
        Ok(Self {
            name: name.into(),
            store: SortedStore::new(),
            compute,
            tasks: TaskQueue::new(),
            hub: EventHub::new(),
            in_sync: false,
            ops: RangeOps::new(interval)?,
            config,
            next_task: 0,
        })
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn load(
        &mut self,
        raw: &SortedStore<Candle>,
        from: Uid,
        count: i64,
        now: Instant,
    ) -> ChartflowResult<Vec<LoadRequest>> {
        if count == 0 {
            return Err(RangeError::ZeroCount(from).into());
        }
        self.submit(raw, AmountRange::counted(from, count), now)
    }

    pub fn load_range(
        &mut self,
        raw: &SortedStore<Candle>,
        first: Uid,
        last: Uid,
        now: Instant,
    ) -> ChartflowResult<Vec<LoadRequest>> {
        self.submit(raw, AmountRange::bounded(first, last), now)
    }

    #[tracing::instrument(skip_all, fields(series = %self.name, target = %target))]
    fn submit(
        &mut self,
        raw: &SortedStore<Candle>,
        target: AmountRange,
        now: Instant,
    ) -> ChartflowResult<Vec<LoadRequest>> {
        self.catch_up(raw)?;

        let id = TaskId(self.next_task);
        self.next_task += 1;
        let mut task = ComputeTask::new(id, target, now);
        let fetches = task.start(self.env(raw))?;

        if !task.is_finished() {
            self.tasks.push(task);
        }
        Ok(fetches.into_vec())
    }

    /// Rebuilds the output in full when raw data moved while this source was idle.
    fn catch_up(&mut self, raw: &SortedStore<Candle>) -> ChartflowResult<Option<Change>> {
        if self.in_sync {
            return Ok(None);
        }
        let Some((first, last)) = raw.bounds() else {
            return Ok(None);
        };
        debug!(series = %self.name, resident = raw.len(), "Catching up with raw data");
        let full = Change::new(first, last, raw.len());
        self.run(raw, Some(&full))
    }

    #[tracing::instrument(
        skip_all,
        fields(series = %self.name, first = %change.first, last = %change.last)
    )]
    pub fn on_raw_changed(
        &mut self,
        raw: &SortedStore<Candle>,
        change: &Change,
        now: Instant,
    ) -> ChartflowResult<SourceOutcome> {
        self.tasks.sweep(now, self.config.stale_after());

        let range = change.range();
        let relevant = self.tasks.any_relevant(range);
        if !relevant && self.store.is_empty() {
            trace!("No task concerned, output idle");
            self.in_sync = false;
            return Ok(SourceOutcome::default());
        }

        let notified = if self.in_sync {
            self.run(raw, Some(change))?
        } else {
            self.catch_up(raw)?
        };

        let env = TaskEnv {
            raw,
            output: &self.store,
            ops: self.ops,
            batch_size: self.config.fetch_batch_size,
        };
        let mut fetches = Vec::new();
        for task in self.tasks.relevant_mut(range) {
            task.release(range);
            let more = task.start(env)?;
            if !task.is_finished() {
                task.touch(now);
            }
            fetches.extend(more);
        }
        self.tasks.compact();

        Ok(SourceOutcome {
            change: notified,
            fetches,
        })
    }

    fn run(
        &mut self,
        raw: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<Option<Change>> {
        let batch = self.compute.compute(raw, &self.store, change)?;
        self.in_sync = true;

        let written = match batch.truncate_from {
            Some(from) => self.store.splice(from, batch.bars),
            None => self.store.merge(batch.bars),
        };
        if let Some(c) = &written {
            debug!(
                series = %self.name,
                first = %c.first,
                last = %c.last,
                count = c.count,
                resident = self.store.len(),
                "Derived output updated"
            );
            self.hub.notify(c);
        }
        Ok(written)
    }

    fn env<'a>(&'a self, raw: &'a SortedStore<Candle>) -> TaskEnv<'a> {
        TaskEnv {
            raw,
            output: &self.store,
            ops: self.ops,
            batch_size: self.config.fetch_batch_size,
        }
    }
}

impl<C: Compute> DerivedSeries for DerivedSource<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self) -> &SortedStore<Candle> {
        &self.store
    }

    fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn subscribe(&mut self, listener: Listener<Change>) -> ListenerId {
        self.hub.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.hub.unsubscribe(id)
    }

    fn request(
        &mut self,
        raw: &SortedStore<Candle>,
        target: AmountRange,
        now: Instant,
    ) -> ChartflowResult<Vec<LoadRequest>> {
        match target {
            AmountRange::Counted { start, count } => self.load(raw, start, count, now),
            AmountRange::Bounded { start, end } => self.load_range(raw, start, end, now),
        }
    }

    fn on_raw_changed(
        &mut self,
        raw: &SortedStore<Candle>,
        change: &Change,
        now: Instant,
    ) -> ChartflowResult<SourceOutcome> {
        DerivedSource::on_raw_changed(self, raw, change, now)
    }

    fn reset(&mut self, interval: Interval) -> ChartflowResult<()> {
        self.ops = RangeOps::new(interval)?;
        self.store.clear();
        self.tasks.clear();
        self.in_sync = false;
        Ok(())
    }
}
