use crate::{
    compute::bars::{BarBuilder, brick},
    data::candle::Candle,
    error::{ChartflowResult, ComputeError},
};

/// Fixed box-size Renko bricks on closing prices.
///
/// The first close sets the base. A new up brick forms each time the close reaches one box
/// above the last brick's top, a down brick each time it reaches one box below its bottom.
/// A single raw candle may form several bricks.
#[derive(Debug, Clone)]
pub struct Renko {
    box_size: f64,
    /// `(top, bottom)` of the last brick, or the base twice before the first brick.
    edges: Option<(f64, f64)>,
}

impl Renko {
    pub fn new(box_size: f64) -> ChartflowResult<Self> {
        if !(box_size.is_finite() && box_size > 0.0) {
            return Err(ComputeError::InvalidParameter(format!(
                "renko box size must be positive, got {box_size}"
            ))
            .into());
        }
        Ok(Self {
            box_size,
            edges: None,
        })
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }
}

impl BarBuilder for Renko {
    fn reset(&mut self) {
        self.edges = None;
    }

    fn lookback(&self) -> usize {
        1
    }

    fn restore(&mut self, history: &[Candle]) {
        self.edges = history.last().and_then(|b| {
            let (open, close) = (b.open?.0, b.close?.0);
            Some((open.max(close), open.min(close)))
        });
    }

    fn push(&mut self, raw: &Candle, out: &mut Vec<Candle>) {
        let Some(close) = raw.close.map(f64::from) else {
            return;
        };
        let Some((mut top, mut bottom)) = self.edges else {
            self.edges = Some((close, close));
            return;
        };

        loop {
            if close >= top + self.box_size {
                out.push(brick(top, top + self.box_size));
                bottom = top;
                top += self.box_size;
            } else if close <= bottom - self.box_size {
                out.push(brick(bottom, bottom - self.box_size));
                top = bottom;
                bottom -= self.box_size;
            } else {
                break;
            }
        }
        self.edges = Some((top, bottom));
    }
}
