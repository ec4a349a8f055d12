#![allow(dead_code)]

use chartflow::prelude::*;

pub const DAY: i64 = 86_400_000;

pub fn day(n: i64) -> Uid {
    Uid::at(n * DAY)
}

/// A daily candle closing at `close` with a one-point wick on both sides.
pub fn candle(d: i64, close: f64) -> Candle {
    Candle::ohlc(day(d), close, close + 0.5, close - 0.5, close).with_volume(10.0)
}

/// Daily candles from day 1, one per close.
pub fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .zip(1..)
        .map(|(c, d)| candle(d, *c))
        .collect()
}

/// A zig-zag walk that crosses many renko boxes in both directions.
pub fn zigzag(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let leg = (i / 6) % 2;
            let step = (i % 6) as f64 * 0.8;
            if leg == 0 { 100.0 + step } else { 104.8 - step }
        })
        .collect()
}

// ================================================================================================
// Provider
// ================================================================================================

/// Records provider calls; tests answer them from a [`Market`].
#[derive(Debug, Default)]
pub struct Feed {
    pub pending: Vec<(RequestId, LoadRequest)>,
    pub locks: Vec<(Uid, Uid)>,
}

impl RawProvider for Feed {
    fn load(&mut self, id: RequestId, from: Uid, count: i64) {
        self.pending.push((id, LoadRequest::counted(from, count)));
    }

    fn load_range(&mut self, id: RequestId, first: Uid, last: Uid) {
        self.pending.push((id, LoadRequest::range(first, last)));
    }

    fn lock(&mut self, first: Uid, last: Uid) {
        self.locks.push((first, last));
    }
}

/// Everything the upstream knows.
#[derive(Debug, Clone)]
pub struct Market {
    candles: Vec<Candle>,
}

impl Market {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.uid);
        Self { candles }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn answer(&self, request: &LoadRequest) -> Vec<Candle> {
        match request.amount() {
            AmountRange::Bounded { start, end } => self
                .candles
                .iter()
                .filter(|c| c.uid >= start && c.uid <= end)
                .cloned()
                .collect(),
            AmountRange::Counted { start, count } if count > 0 => self
                .candles
                .iter()
                .filter(|c| c.uid >= start)
                .take(count as usize)
                .cloned()
                .collect(),
            AmountRange::Counted { start, count } => {
                let older: Vec<_> = self.candles.iter().filter(|c| c.uid <= start).collect();
                let skip = older.len().saturating_sub(count.unsigned_abs() as usize);
                older[skip..].iter().map(|c| (*c).clone()).collect()
            }
        }
    }
}

pub fn chart() -> Chart<Feed> {
    Chart::new(Feed::default(), Interval(DAY), EngineConfig::default()).unwrap()
}

/// Answers every pending request until the chart stops asking. Returns the number of
/// completions delivered.
pub fn pump(chart: &mut Chart<Feed>, market: &Market) -> usize {
    let mut delivered = 0;
    for _ in 0..100 {
        let batch = std::mem::take(&mut chart.provider_mut().pending);
        if batch.is_empty() {
            return delivered;
        }
        for (id, request) in batch {
            chart
                .complete(id, Ok(market.answer(&request)))
                .expect("completion accepted");
            delivered += 1;
        }
    }
    panic!("chart kept requesting data after 100 rounds");
}
