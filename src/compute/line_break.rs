use std::collections::VecDeque;

use crate::{
    compute::bars::{BarBuilder, brick},
    data::candle::Candle,
    error::{ChartflowResult, ComputeError},
};

pub const DEFAULT_LINES: usize = 3;

/// N-line break chart on closing prices.
///
/// A close beyond the last line in its direction extends the trend with a new line. A
/// reversal line only forms when the close breaks the extreme of the last `lines` lines.
#[derive(Debug, Clone)]
pub struct LineBreak {
    lines: usize,
    /// `(open, close)` of the most recent lines, oldest first.
    recent: VecDeque<(f64, f64)>,
    base: Option<f64>,
}

impl Default for LineBreak {
    fn default() -> Self {
        Self {
            lines: DEFAULT_LINES,
            recent: VecDeque::with_capacity(DEFAULT_LINES),
            base: None,
        }
    }
}

impl LineBreak {
    pub fn new(lines: usize) -> ChartflowResult<Self> {
        if lines == 0 {
            return Err(ComputeError::InvalidParameter(
                "line break needs at least one line".to_string(),
            )
            .into());
        }
        Ok(Self {
            lines,
            recent: VecDeque::with_capacity(lines),
            base: None,
        })
    }

    fn emit(&mut self, open: f64, close: f64, out: &mut Vec<Candle>) {
        if self.recent.len() == self.lines {
            self.recent.pop_front();
        }
        self.recent.push_back((open, close));
        out.push(brick(open, close));
    }
}

impl BarBuilder for LineBreak {
    fn reset(&mut self) {
        self.recent.clear();
        self.base = None;
    }

    fn lookback(&self) -> usize {
        self.lines
    }

    fn restore(&mut self, history: &[Candle]) {
        self.reset();
        let skip = history.len().saturating_sub(self.lines);
        for bar in &history[skip..] {
            if let (Some(o), Some(c)) = (bar.open, bar.close) {
                self.recent.push_back((o.0, c.0));
            }
        }
        self.base = self.recent.front().map(|(o, _)| *o);
    }

    fn push(&mut self, raw: &Candle, out: &mut Vec<Candle>) {
        let Some(close) = raw.close.map(f64::from) else {
            return;
        };

        let Some(&(open, last_close)) = self.recent.back() else {
            match self.base {
                None => self.base = Some(close),
                Some(base) if close != base => self.emit(base, close, out),
                Some(_) => {}
            }
            return;
        };

        let rising = last_close > open;
        let highest = self
            .recent
            .iter()
            .map(|(o, c)| o.max(*c))
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = self
            .recent
            .iter()
            .map(|(o, c)| o.min(*c))
            .fold(f64::INFINITY, f64::min);

        if rising {
            if close > last_close {
                self.emit(last_close, close, out);
            } else if close < lowest {
                self.emit(open, close, out);
            }
        } else if close < last_close {
            self.emit(last_close, close, out);
        } else if close > highest {
            self.emit(open, close, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compute::{Compute, bars::BarCompute},
        data::uid::Uid,
        storage::store::SortedStore,
    };

    fn closes(values: &[f64]) -> Vec<Candle> {
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::ohlc(Uid::at(i as i64), c, c, c, c))
            .collect()
    }

    fn lines(values: &[f64]) -> Vec<(f64, f64)> {
        let mut lb = BarCompute::new(LineBreak::default());
        lb.compute(&SortedStore::from_batch(closes(values)), &SortedStore::new(), None)
            .unwrap()
            .bars
            .iter()
            .map(|b| (b.open.unwrap().0, b.close.unwrap().0))
            .collect()
    }

    #[test]
    fn test_trend_extends_and_small_pullbacks_are_ignored() {
        assert_eq!(
            lines(&[10.0, 11.0, 12.0, 11.5, 13.0]),
            vec![(10.0, 11.0), (11.0, 12.0), (12.0, 13.0)]
        );
    }

    #[test]
    fn test_reversal_must_break_three_lines() {
        // Lines: 10-11, 11-12, 12-13. 11.5 stays above the 3-line low of 10.
        assert_eq!(
            lines(&[10.0, 11.0, 12.0, 13.0, 11.5, 9.5]),
            vec![(10.0, 11.0), (11.0, 12.0), (12.0, 13.0), (12.0, 9.5)]
        );
    }

    #[test]
    fn test_resume_matches_full_rebuild() {
        let values = [10.0, 11.0, 10.5, 12.0, 13.0, 9.0, 8.0, 8.5, 12.5, 14.0, 13.5];
        let all = closes(&values);

        let mut full = BarCompute::new(LineBreak::default());
        let expected = full
            .compute(&SortedStore::from_batch(all.clone()), &SortedStore::new(), None)
            .unwrap();

        let mut inc = BarCompute::new(LineBreak::default());
        let mut input = SortedStore::from_batch(all[..7].to_vec());
        let mut output = SortedStore::new();
        let first = inc.compute(&input, &output, None).unwrap();
        output.splice(Uid::MIN, first.bars);

        let change = input.merge(all[7..].to_vec()).unwrap();
        let next = inc.compute(&input, &output, Some(&change)).unwrap();
        output.splice(next.truncate_from.unwrap(), next.bars);

        assert_eq!(output.as_slice(), expected.bars.as_slice());
        assert!(LineBreak::new(0).is_err());
    }
}
