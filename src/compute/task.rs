use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};
use tracing::trace;

use crate::{
    data::{
        candle::Candle,
        range::{self, AmountRange, Narrowed, RangeOps, is_intersected},
    },
    error::ChartflowResult,
    provider::request::LoadRequest,
    storage::store::SortedStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Created,
    Narrowing,
    RequestsSent,
    /// Nothing new to fetch; waiting for in-flight data or the next compute pass.
    Waiting,
    Finished,
}

/// What a task reads while (re)starting.
#[derive(Debug, Clone, Copy)]
pub struct TaskEnv<'a> {
    pub raw: &'a SortedStore<Candle>,
    pub output: &'a SortedStore<Candle>,
    pub ops: RangeOps,
    /// Magnitude of upstream `Counted` fetches.
    pub batch_size: i64,
}

/// Fetches produced by one start.
pub type Fetches = SmallVec<[LoadRequest; 2]>;

/// One attempt to make a range of a derived series resident.
#[derive(Debug, Clone)]
pub struct ComputeTask {
    id: TaskId,
    target: AmountRange,
    state: TaskState,
    started_at: Instant,
    in_flight: SmallVec<[AmountRange; 4]>,
}

impl ComputeTask {
    pub fn new(id: TaskId, target: AmountRange, now: Instant) -> Self {
        Self {
            id,
            target,
            state: TaskState::Created,
            started_at: now,
            in_flight: SmallVec::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn target(&self) -> AmountRange {
        self.target
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    pub fn in_flight(&self) -> &[AmountRange] {
        &self.in_flight
    }

    /// Restarts the staleness clock.
    pub fn touch(&mut self, now: Instant) {
        self.started_at = now;
    }

    /// Whether `range` concerns this task: its target or one of its pending pieces.
    pub fn intersects(&self, range: AmountRange) -> bool {
        is_intersected(self.target, range)
            || self.in_flight.iter().any(|p| is_intersected(*p, range))
    }

    /// Forgets pending pieces touched by `range`; their data has arrived.
    pub fn release(&mut self, range: AmountRange) {
        self.in_flight.retain(|p| !is_intersected(*p, range));
    }

    /// Narrows the target against the derived output, then diffs the residual against raw
    /// data and requests every gap piece not already pending.
    ///
    /// When raw data already covers a `Counted` residual, the output is short because the
    /// derived series is sparser than raw data; the task then reaches past the raw edge.
    pub fn start(&mut self, env: TaskEnv<'_>) -> ChartflowResult<Fetches> {
        self.state = TaskState::Narrowing;

        let residual = match range::narrow(self.target, env.output) {
            Narrowed::Satisfied => {
                self.finish();
                return Ok(Fetches::new());
            }
            Narrowed::Residual(r) => r,
        };

        let pieces = match env.raw.bounds() {
            None => std::iter::once(residual).collect(),
            Some((first, last)) => {
                match env
                    .ops
                    .difference(residual, AmountRange::bounded(first, last))?
                {
                    Some(pieces) => pieces,
                    None => match residual {
                        AmountRange::Counted { count, .. } => {
                            let edge = if count > 0 { last } else { first };
                            std::iter::once(AmountRange::counted(edge, count.signum())).collect()
                        }
                        AmountRange::Bounded { .. } => {
                            // Raw data covers it and the output is computed from raw.
                            self.finish();
                            return Ok(Fetches::new());
                        }
                    },
                }
            }
        };

        let mut fetches = Fetches::new();
        for piece in pieces {
            if self.in_flight.contains(&piece) {
                continue;
            }
            self.in_flight.push(piece);
            fetches.push(match piece {
                AmountRange::Counted { start, count } => {
                    LoadRequest::counted(start, env.batch_size * count.signum())
                }
                bounded => LoadRequest::from(bounded),
            });
        }

        self.state = if fetches.is_empty() {
            TaskState::Waiting
        } else {
            TaskState::RequestsSent
        };
        trace!(
            task = %self.id,
            target = %self.target,
            residual = %residual,
            fetches = fetches.len(),
            state = %self.state,
            "Task started"
        );
        Ok(fetches)
    }

    fn finish(&mut self) {
        self.state = TaskState::Finished;
        self.in_flight.clear();
        trace!(task = %self.id, target = %self.target, "Task finished");
    }
}
