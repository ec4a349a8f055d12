use crate::{
    data::{candle::Candle, uid::Uid},
    error::ChartflowResult,
    storage::{event::Change, store::SortedStore},
};

pub mod bars;
pub mod indicator;
pub mod line_break;
pub mod queue;
pub mod range_bar;
pub mod renko;
pub mod source;
pub mod task;

/// Output of one compute pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeBatch {
    /// When set, every output record with key `>= truncate_from` is dropped before `bars`
    /// are merged.
    pub truncate_from: Option<Uid>,
    pub bars: Vec<Candle>,
}

impl ComputeBatch {
    pub fn merge(bars: Vec<Candle>) -> Self {
        Self {
            truncate_from: None,
            bars,
        }
    }

    pub fn replace_from(from: Uid, bars: Vec<Candle>) -> Self {
        Self {
            truncate_from: Some(from),
            bars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.truncate_from.is_none() && self.bars.is_empty()
    }
}

/// Derives one series from raw candles.
///
/// `change` is the raw span that moved since the last call; `None` asks for a full
/// rebuild. Implementations read `output` to resume instead of starting over, but the
/// result must equal a full rebuild.
pub trait Compute {
    fn compute(
        &mut self,
        input: &SortedStore<Candle>,
        output: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<ComputeBatch>;
}

impl<F> Compute for F
where
    F: FnMut(
        &SortedStore<Candle>,
        &SortedStore<Candle>,
        Option<&Change>,
    ) -> ChartflowResult<ComputeBatch>,
{
    fn compute(
        &mut self,
        input: &SortedStore<Candle>,
        output: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<ComputeBatch> {
        self(input, output, change)
    }
}

/// Mirrors the raw series. Handy for overlays that only need their own task bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Compute for Passthrough {
    fn compute(
        &mut self,
        input: &SortedStore<Candle>,
        _output: &SortedStore<Candle>,
        change: Option<&Change>,
    ) -> ChartflowResult<ComputeBatch> {
        let bars = match change {
            Some(c) => {
                let from = input.lower_bound(c.first);
                let to = input.lower_bound(c.last).saturating_add(1).min(input.len());
                input.as_slice()[from..to].to_vec()
            }
            None => input.as_slice().to_vec(),
        };
        Ok(ComputeBatch::merge(bars))
    }
}
