use crate::{
    compute::bars::BarBuilder,
    data::{
        candle::Candle,
        domain::{Price, Volume},
        uid::Uid,
    },
    error::{ChartflowResult, ComputeError},
};

#[derive(Debug, Clone, Copy)]
struct Forming {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: Option<f64>,
}

/// Range bars: a bar closes once its high-low span reaches `range`.
///
/// Raw candles are folded into the forming bar. The candle that completes a bar belongs to
/// it; the next raw candle opens the following bar, so bars never overlap and no price is
/// synthesised. The forming bar is not emitted.
#[derive(Debug, Clone)]
pub struct RangeBars {
    range: f64,
    forming: Option<Forming>,
}

impl RangeBars {
    pub fn new(range: f64) -> ChartflowResult<Self> {
        if !(range.is_finite() && range > 0.0) {
            return Err(ComputeError::InvalidParameter(format!(
                "bar range must be positive, got {range}"
            ))
            .into());
        }
        Ok(Self {
            range,
            forming: None,
        })
    }
}

impl BarBuilder for RangeBars {
    fn reset(&mut self) {
        self.forming = None;
    }

    fn lookback(&self) -> usize {
        0
    }

    /// A completed bar leaves nothing forming.
    fn restore(&mut self, _history: &[Candle]) {
        self.forming = None;
    }

    fn push(&mut self, raw: &Candle, out: &mut Vec<Candle>) {
        let (Some(o), Some(h), Some(l), Some(c)) = (raw.open, raw.high, raw.low, raw.close) else {
            return;
        };
        let volume = raw.volume.map(f64::from);

        let done = match self.forming {
            None => Forming {
                open: o.0,
                high: h.0,
                low: l.0,
                close: c.0,
                volume,
            },
            Some(bar) => Forming {
                high: bar.high.max(h.0),
                low: bar.low.min(l.0),
                close: c.0,
                volume: match (bar.volume, volume) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                },
                ..bar
            },
        };
        self.forming = Some(done);

        if done.high - done.low >= self.range {
            self.forming = None;
            out.push(Candle {
                open: Some(Price(done.open)),
                high: Some(Price(done.high)),
                low: Some(Price(done.low)),
                close: Some(Price(done.close)),
                volume: done.volume.map(Volume),
                ..Candle::empty(Uid::MIN)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compute::{Compute, bars::BarCompute},
        storage::store::SortedStore,
    };

    fn candles(rows: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        rows.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Candle::ohlc(Uid::at(i as i64), o, h, l, c).with_volume(1.0))
            .collect()
    }

    #[test]
    fn test_bar_closes_when_span_reaches_range() {
        let input = SortedStore::from_batch(candles(&[
            (10.0, 10.5, 9.8, 10.2),
            (10.2, 11.0, 10.1, 10.9),
            (10.9, 11.1, 10.8, 11.0),
        ]));
        let mut bars = BarCompute::new(RangeBars::new(1.0).unwrap());
        let batch = bars.compute(&input, &SortedStore::new(), None).unwrap();

        assert_eq!(batch.bars.len(), 1, "third candle only opens the next bar");
        let bar = &batch.bars[0];
        assert_eq!(bar.uid, Uid::new(1, 0));
        assert_eq!(bar.open, Some(Price(10.0)));
        assert_eq!(bar.high, Some(Price(11.0)));
        assert_eq!(bar.low, Some(Price(9.8)));
        assert_eq!(bar.close, Some(Price(10.9)));
        assert_eq!(bar.volume, Some(Volume(2.0)));
    }

    #[test]
    fn test_resume_matches_full_rebuild() {
        let rows = [
            (10.0, 10.6, 9.9, 10.5),
            (10.5, 11.2, 10.4, 11.1),
            (11.1, 11.3, 10.9, 11.0),
            (11.0, 11.1, 10.2, 10.3),
            (10.3, 10.4, 9.1, 9.2),
            (9.2, 9.9, 9.1, 9.8),
            (9.8, 11.0, 9.7, 10.9),
        ];
        let all = candles(&rows);

        let mut full = BarCompute::new(RangeBars::new(1.0).unwrap());
        let expected = full
            .compute(&SortedStore::from_batch(all.clone()), &SortedStore::new(), None)
            .unwrap();

        let mut inc = BarCompute::new(RangeBars::new(1.0).unwrap());
        let mut input = SortedStore::from_batch(all[..4].to_vec());
        let mut output = SortedStore::new();
        let first = inc.compute(&input, &output, None).unwrap();
        output.splice(Uid::MIN, first.bars);

        let change = input.merge(all[4..].to_vec()).unwrap();
        let next = inc.compute(&input, &output, Some(&change)).unwrap();
        output.splice(next.truncate_from.unwrap(), next.bars);

        assert_eq!(output.as_slice(), expected.bars.as_slice());
    }

    #[test]
    fn test_resume_replays_siblings_after_last_source() {
        let raw =
            |ts, seq, o, h, l, c| Candle::ohlc(Uid::new(ts, seq), o, h, l, c).with_volume(1.0);
        let all = vec![
            raw(0, 0, 10.0, 10.0, 10.0, 10.0),
            raw(1_000, 0, 10.0, 11.0, 10.0, 11.0),
            raw(1_000, 1, 11.0, 11.5, 11.0, 11.5),
            raw(2_000, 0, 11.5, 12.2, 11.5, 12.2),
        ];

        let mut full = BarCompute::new(RangeBars::new(1.0).unwrap());
        let expected = full
            .compute(&SortedStore::from_batch(all.clone()), &SortedStore::new(), None)
            .unwrap();
        assert_eq!(expected.bars.len(), 2);
        assert_eq!(expected.bars[1].open, Some(Price(11.0)), "opened by the sibling");

        let mut inc = BarCompute::new(RangeBars::new(1.0).unwrap());
        let mut input = SortedStore::from_batch(all[..3].to_vec());
        let mut output = SortedStore::new();
        let first = inc.compute(&input, &output, None).unwrap();
        output.splice(Uid::MIN, first.bars);
        assert_eq!(output.as_slice()[0].source, Some(Uid::new(1_000, 0)));

        let change = input.merge(all[3..].to_vec()).unwrap();
        let next = inc.compute(&input, &output, Some(&change)).unwrap();
        output.splice(next.truncate_from.unwrap(), next.bars);

        assert_eq!(output.as_slice(), expected.bars.as_slice());
    }
}
