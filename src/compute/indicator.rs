use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    compute::{Compute, ComputeBatch},
    data::{candle::Candle, domain::Price, domain::SourceField, uid::Uid},
    error::{ChartflowResult, ComputeError},
    storage::{event::Change, store::SortedStore},
};

/// An incremental indicator fed one scalar at a time.
pub trait StreamingIndicator: std::fmt::Debug {
    /// Feeds the next value. Returns `Some` once enough values were seen.
    fn update(&mut self, value: f64) -> Option<f64>;

    fn reset(&mut self);
}

fn check_window(window: u16) -> ChartflowResult<usize> {
    if window == 0 {
        return Err(ComputeError::InvalidParameter("indicator window must be positive".into()).into());
    }
    Ok(window as usize)
}

// ================================================================================================
// SMA
// ================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sma {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(window: u16) -> ChartflowResult<Self> {
        let window = check_window(window)?;
        Ok(Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
        })
    }
}

impl StreamingIndicator for Sma {
    fn update(&mut self, value: f64) -> Option<f64> {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window
            && let Some(old) = self.values.pop_front()
        {
            self.sum -= old;
        }
        (self.values.len() == self.window).then(|| self.sum / self.window as f64)
    }

    fn reset(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

// ================================================================================================
// Exponential smoothing
// ================================================================================================

/// `y = alpha * x + (1 - alpha) * y_prev`, seeded with the first value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Smoother {
    alpha: f64,
    warmup: usize,
    seen: usize,
    mean: f64,
}

impl Smoother {
    fn new(alpha: f64, warmup: usize) -> Self {
        Self {
            alpha,
            warmup,
            seen: 0,
            mean: 0.0,
        }
    }

    fn update(&mut self, value: f64) -> Option<f64> {
        self.mean = if self.seen == 0 {
            value
        } else {
            self.alpha * value + (1.0 - self.alpha) * self.mean
        };
        self.seen += 1;
        (self.seen >= self.warmup).then_some(self.mean)
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.mean = 0.0;
    }
}

/// Exponential moving average with `alpha = 2 / (window + 1)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    smoother: Smoother,
}

impl Ema {
    pub fn new(window: u16) -> ChartflowResult<Self> {
        let window = check_window(window)?;
        Ok(Self {
            smoother: Smoother::new(2.0 / (window as f64 + 1.0), window),
        })
    }
}

impl StreamingIndicator for Ema {
    fn update(&mut self, value: f64) -> Option<f64> {
        self.smoother.update(value)
    }

    fn reset(&mut self) {
        self.smoother.reset();
    }
}

/// Relative strength index with Wilder smoothing (`alpha = 1 / window`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsi {
    prev: Option<f64>,
    gains: Smoother,
    losses: Smoother,
}

impl Rsi {
    pub fn new(window: u16) -> ChartflowResult<Self> {
        let window = check_window(window)?;
        let alpha = 1.0 / window as f64;
        Ok(Self {
            prev: None,
            gains: Smoother::new(alpha, window),
            losses: Smoother::new(alpha, window),
        })
    }
}

impl StreamingIndicator for Rsi {
    fn update(&mut self, value: f64) -> Option<f64> {
        let prev = self.prev.replace(value)?;
        let delta = value - prev;

        let gain = self.gains.update(delta.max(0.0));
        let loss = self.losses.update((-delta).max(0.0));
        let (gain, loss) = (gain?, loss?);

        Some(match (gain, loss) {
            (g, l) if l == 0.0 && g == 0.0 => 50.0,
            (_, l) if l == 0.0 => 100.0,
            (g, l) => 100.0 - 100.0 / (1.0 + g / l),
        })
    }

    fn reset(&mut self) {
        self.prev = None;
        self.gains.reset();
        self.losses.reset();
    }
}

// ================================================================================================
// Compute delegate
// ================================================================================================

/// Runs a [`StreamingIndicator`] over one field of the raw candles.
///
/// The indicator replays from the start of raw data (its state depends on all history) but
/// only bars from the change onward are emitted. Each output bar carries the value in
/// `close` and shares the raw candle's Uid.
#[derive(Debug, Clone)]
pub struct IndicatorCompute<I> {
    indicator: I,
    field: SourceField,
}

impl<I: StreamingIndicator> IndicatorCompute<I> {
    pub fn new(indicator: I, field: SourceField) -> Self {
        Self { indicator, field }
    }

    pub fn field(&self) -> &SourceField {
        &self.field
    }
}

impl<I: StreamingIndicator> Compute for IndicatorCompute<I> {
    fn compute(
        &mut self,
        input: &SortedStore<Candle>,
        _output: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<ComputeBatch> {
        let emit_from = change.map_or(Uid::MIN, |c| c.first);
        self.indicator.reset();

        let mut bars = Vec::new();
        for raw in input.iter() {
            let Some(value) = raw.value(&self.field) else {
                continue;
            };
            let Some(y) = self.indicator.update(value) else {
                continue;
            };
            if raw.uid >= emit_from {
                bars.push(Candle {
                    close: Some(Price(y)),
                    ..Candle::empty(raw.uid)
                });
            }
        }
        Ok(ComputeBatch::replace_from(emit_from, bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_warms_up_then_slides() {
        let mut sma = Sma::new(3).unwrap();
        assert_eq!(sma.update(1.0), None);
        assert_eq!(sma.update(2.0), None);
        assert_eq!(sma.update(3.0), Some(2.0));
        assert_eq!(sma.update(6.0), Some(11.0 / 3.0));
        sma.reset();
        assert_eq!(sma.update(1.0), None);
    }

    #[test]
    fn test_ema_seeds_with_first_value() {
        let mut ema = Ema::new(3).unwrap();
        assert_eq!(ema.update(10.0), None);
        assert_eq!(ema.update(10.0), None);
        assert_eq!(ema.update(10.0), Some(10.0));
        assert_eq!(ema.update(14.0), Some(12.0), "alpha = 0.5");
    }

    #[test]
    fn test_rsi_extremes() {
        let mut up = Rsi::new(2).unwrap();
        let last = [1.0, 2.0, 3.0, 4.0].map(|v| up.update(v));
        assert_eq!(last[3], Some(100.0), "monotonic rise");

        let mut flat = Rsi::new(2).unwrap();
        let last = [1.0, 1.0, 1.0].map(|v| flat.update(v));
        assert_eq!(last[2], Some(50.0));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        assert!(Sma::new(0).is_err());
        assert!(Ema::new(0).is_err());
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn test_indicator_emits_from_change_only() {
        let input = SortedStore::from_batch(
            (0..5)
                .map(|i| Candle::ohlc(Uid::at(i), 0.0, 0.0, 0.0, i as f64))
                .collect(),
        );
        let mut compute = IndicatorCompute::new(Sma::new(2).unwrap(), SourceField::Close);

        let full = compute.compute(&input, &SortedStore::new(), None).unwrap();
        assert_eq!(full.bars.len(), 4);
        assert_eq!(full.bars[0].close, Some(Price(0.5)));

        let change = Change::new(Uid::at(3), Uid::at(4), 2);
        let partial = compute
            .compute(&input, &SortedStore::new(), Some(&change))
            .unwrap();
        assert_eq!(partial.truncate_from, Some(Uid::at(3)));
        assert_eq!(partial.bars.len(), 2);
        assert_eq!(partial.bars[0].close, Some(Price(2.5)));
    }
}
