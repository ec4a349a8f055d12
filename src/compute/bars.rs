use tracing::trace;

use crate::{
    compute::{Compute, ComputeBatch},
    data::{candle::Candle, uid::Uid},
    error::ChartflowResult,
    storage::{event::Change, store::SortedStore},
};

/// A stateful price-driven bar algorithm (Renko, range bars, line break).
///
/// The builder only decides prices. [`BarCompute`] assigns identities: bars take the
/// timestamp of the raw candle that completed them and number up from seq 0 across every
/// raw candle sharing that timestamp.
pub trait BarBuilder {
    fn reset(&mut self);

    /// Number of trailing emitted bars needed to restore the state after them.
    fn lookback(&self) -> usize;

    /// Restores the state right after `history` (oldest first) was emitted.
    fn restore(&mut self, history: &[Candle]);

    /// Consumes one raw candle and appends every bar it completes to `out`.
    fn push(&mut self, raw: &Candle, out: &mut Vec<Candle>);
}

/// Drives a [`BarBuilder`] incrementally over raw data.
///
/// On a raw change starting at `R`, derived bars sourced before `R.timestamp` are kept, the
/// builder is restored from the last `lookback()` of them and raw candles after the last kept
/// bar's [`Candle::source`] are replayed. Without a kept bar the series is rebuilt from
/// scratch.
#[derive(Debug, Clone)]
pub struct BarCompute<B> {
    builder: B,
}

impl<B: BarBuilder> BarCompute<B> {
    pub fn new(builder: B) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// The last kept bar and the restore history before `resume`.
    fn resume_point(&self, output: &SortedStore<Candle>, resume: Uid) -> Option<Resume> {
        let kept = output.lower_bound(Uid::at(resume.timestamp));
        if kept == 0 {
            return None;
        }

        let mut cursor = output.iterator(None);
        cursor.move_next(output);
        cursor.move_times(output, kept as i64 - 1).ok()?;
        let last = cursor.current(output)?;
        let (last, source) = (last.uid, last.source);

        let lookback = self.builder.lookback();
        let mut history = Vec::with_capacity(lookback);
        cursor.move_prev_while(output, |bar, back| {
            if back < lookback {
                history.push(bar.clone());
                true
            } else {
                false
            }
        });
        history.reverse();
        Some(Resume {
            last,
            source: source.unwrap_or(Uid::new(last.timestamp, u32::MAX)),
            history,
        })
    }
}

struct Resume {
    last: Uid,
    source: Uid,
    history: Vec<Candle>,
}

impl<B: BarBuilder> Compute for BarCompute<B> {
    fn compute(
        &mut self,
        input: &SortedStore<Candle>,
        output: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<ComputeBatch> {
        let resume = change.and_then(|c| self.resume_point(output, c.first));

        self.builder.reset();
        let (truncate_from, replay_from, mut prev) = match (&resume, change) {
            (Some(r), Some(c)) => {
                self.builder.restore(&r.history);
                let from = input.as_slice().partition_point(|raw| raw.uid <= r.source);
                (Uid::at(c.first.timestamp), from, Some(r.last))
            }
            _ => (Uid::MIN, 0, None),
        };
        trace!(
            truncate_from = %truncate_from,
            replay = input.len() - replay_from,
            resumed = resume.is_some(),
            "Rebuilding bars"
        );

        let mut bars = Vec::new();
        for raw in &input.as_slice()[replay_from..] {
            let before = bars.len();
            self.builder.push(raw, &mut bars);
            for bar in bars[before..].iter_mut() {
                let seq = match prev {
                    Some(p) if p.timestamp == raw.uid.timestamp => p.seq.saturating_add(1),
                    _ => 0,
                };
                bar.uid = Uid::new(raw.uid.timestamp, seq);
                bar.date = raw.date;
                bar.source = Some(raw.uid);
                prev = Some(bar.uid);
            }
        }
        Ok(ComputeBatch::replace_from(truncate_from, bars))
    }
}

/// A bar spanning `open` to `close` with high/low at the extremes.
pub(crate) fn brick(open: f64, close: f64) -> Candle {
    Candle::ohlc(Uid::MIN, open, open.max(close), open.min(close), close)
}
