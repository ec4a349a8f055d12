use std::fmt::Debug;

use crate::data::candle::Candle;

/// Attaches named auxiliary fields to a candle from its predecessor.
///
/// Extensions are injected into the raw source at construction and re-applied whenever a
/// candle or its predecessor changes. A candle without a predecessor stays without the
/// field.
pub trait CandleExtension: Debug {
    /// Names of the fields this extension writes.
    fn fields(&self) -> &'static [&'static str];

    fn extend(&self, prev: Option<&Candle>, current: &mut Candle);
}

pub const TRUE_RANGE: &str = "tr";
pub const PLUS_DM: &str = "+dm";
pub const MINUS_DM: &str = "-dm";
pub const GAIN: &str = "gain";
pub const LOSS: &str = "loss";

/// Wilder's true range: `max(high, prev_close) - min(low, prev_close)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueRange;

impl CandleExtension for TrueRange {
    fn fields(&self) -> &'static [&'static str] {
        &[TRUE_RANGE]
    }

    fn extend(&self, prev: Option<&Candle>, current: &mut Candle) {
        let (Some(prev_close), Some(high), Some(low)) =
            (prev.and_then(|p| p.close), current.high, current.low)
        else {
            current.extensions.remove(TRUE_RANGE);
            return;
        };
        let tr = high.max(prev_close).0 - low.min(prev_close).0;
        current.extensions.insert(TRUE_RANGE, tr);
    }
}

/// Directional movement (`+dm` / `-dm`) as used by ADX.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionalMovement;

impl CandleExtension for DirectionalMovement {
    fn fields(&self) -> &'static [&'static str] {
        &[PLUS_DM, MINUS_DM]
    }

    fn extend(&self, prev: Option<&Candle>, current: &mut Candle) {
        let (Some(prev), Some(high), Some(low)) = (prev, current.high, current.low) else {
            current.extensions.remove(PLUS_DM);
            current.extensions.remove(MINUS_DM);
            return;
        };
        let (Some(prev_high), Some(prev_low)) = (prev.high, prev.low) else {
            current.extensions.remove(PLUS_DM);
            current.extensions.remove(MINUS_DM);
            return;
        };
        let up = high.0 - prev_high.0;
        let down = prev_low.0 - low.0;
        let plus = if up > down && up > 0.0 { up } else { 0.0 };
        let minus = if down > up && down > 0.0 { down } else { 0.0 };
        current.extensions.insert(PLUS_DM, plus);
        current.extensions.insert(MINUS_DM, minus);
    }
}

/// Close-to-close gain and loss, both non-negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct GainLoss;

impl CandleExtension for GainLoss {
    fn fields(&self) -> &'static [&'static str] {
        &[GAIN, LOSS]
    }

    fn extend(&self, prev: Option<&Candle>, current: &mut Candle) {
        let (Some(prev_close), Some(close)) = (prev.and_then(|p| p.close), current.close) else {
            current.extensions.remove(GAIN);
            current.extensions.remove(LOSS);
            return;
        };
        let delta = close.0 - prev_close.0;
        current.extensions.insert(GAIN, delta.max(0.0));
        current.extensions.insert(LOSS, (-delta).max(0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::uid::Uid;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::ohlc(Uid::at(ts), o, h, l, c)
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let prev = bar(0, 10.0, 11.0, 9.0, 10.0);
        let mut cur = bar(1, 12.0, 13.0, 12.0, 12.5);

        TrueRange.extend(Some(&prev), &mut cur);
        assert_eq!(cur.extensions.get(TRUE_RANGE), Some(3.0), "gap up: 13 - 10");

        let mut first = bar(0, 10.0, 11.0, 9.0, 10.0);
        TrueRange.extend(None, &mut first);
        assert_eq!(first.extensions.get(TRUE_RANGE), None);
    }

    #[test]
    fn test_directional_movement_picks_dominant_side() {
        let prev = bar(0, 10.0, 11.0, 9.0, 10.0);
        let mut cur = bar(1, 10.0, 13.0, 8.5, 12.0);

        DirectionalMovement.extend(Some(&prev), &mut cur);
        assert_eq!(cur.extensions.get(PLUS_DM), Some(2.0));
        assert_eq!(cur.extensions.get(MINUS_DM), Some(0.0));
    }

    #[test]
    fn test_gain_loss() {
        let prev = bar(0, 10.0, 11.0, 9.0, 10.0);
        let mut cur = bar(1, 10.0, 11.0, 8.0, 8.5);

        GainLoss.extend(Some(&prev), &mut cur);
        assert_eq!(cur.extensions.get(GAIN), Some(0.0));
        assert_eq!(cur.extensions.get(LOSS), Some(1.5));
    }
}
