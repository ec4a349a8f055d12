use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::{
    data::{
        domain::Interval,
        uid::{Keyed, Uid},
    },
    error::{ChartflowResult, RangeError},
    storage::store::SortedStore,
};

/// Result pieces of [`RangeOps::difference`]. Never more than two.
pub type RangePieces = SmallVec<[AmountRange; 2]>;

// ================================================================================================
// AmountRange
// ================================================================================================

/// A span of identities.
///
/// - `Bounded`: the closed interval `[start, end]`.
/// - `Counted`: `|count|` items beginning at `start` (inclusive), forward when `count > 0`
///   and backward when `count < 0`. This is the "N items from here" request shape.
///
/// Pieces produced by [`RangeOps::difference`] reuse the subtrahend's edge Uid as their own
/// bound. That edge is already resident, so in meaning it is an open edge: the gap
/// `[day1, day3)` is represented as `Bounded { day1, day3 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmountRange {
    Bounded { start: Uid, end: Uid },
    Counted { start: Uid, count: i64 },
}

impl AmountRange {
    /// Builds a bounded range, swapping the bounds if they are reversed.
    pub fn bounded(a: Uid, b: Uid) -> Self {
        if a <= b {
            AmountRange::Bounded { start: a, end: b }
        } else {
            AmountRange::Bounded { start: b, end: a }
        }
    }

    pub fn counted(start: Uid, count: i64) -> Self {
        AmountRange::Counted { start, count }
    }

    pub fn start(&self) -> Uid {
        match *self {
            AmountRange::Bounded { start, .. } | AmountRange::Counted { start, .. } => start,
        }
    }

    pub fn end(&self) -> Option<Uid> {
        match *self {
            AmountRange::Bounded { end, .. } => Some(end),
            AmountRange::Counted { .. } => None,
        }
    }

    pub fn count(&self) -> Option<i64> {
        match *self {
            AmountRange::Bounded { .. } => None,
            AmountRange::Counted { count, .. } => Some(count),
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, AmountRange::Bounded { .. })
    }

    fn normalized(self) -> Self {
        match self {
            AmountRange::Bounded { start, end } => AmountRange::bounded(start, end),
            counted => counted,
        }
    }

    fn check(self) -> Result<Self, RangeError> {
        match self {
            AmountRange::Counted { start, count: 0 } => Err(RangeError::ZeroCount(start)),
            other => Ok(other.normalized()),
        }
    }
}

impl fmt::Display for AmountRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountRange::Bounded { start, end } => write!(f, "[{start}, {end}]"),
            AmountRange::Counted { start, count } => write!(f, "({start}, {count:+})"),
        }
    }
}

// ================================================================================================
// Range Algebra
// ================================================================================================

/// Set operations over [`AmountRange`]s.
///
/// Item counts outside of resident data are unknown; they are estimated on the interval
/// lattice, the same extrapolation the viewport uses for virtual bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeOps {
    interval: Interval,
}

impl RangeOps {
    pub fn new(interval: Interval) -> ChartflowResult<Self> {
        if !interval.is_positive() {
            return Err(RangeError::NonPositiveInterval(interval.millis()).into());
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The part of `minuend` not covered by `subtrahend`.
    ///
    /// Returns `None` when the subtrahend covers the minuend completely. Two unbounded
    /// operands are rejected: at least one side must carry an explicit end.
    pub fn difference(
        &self,
        minuend: AmountRange,
        subtrahend: AmountRange,
    ) -> ChartflowResult<Option<RangePieces>> {
        let a = minuend.check()?;
        let b = subtrahend.check()?;

        let pieces = match (a, b) {
            (AmountRange::Counted { .. }, AmountRange::Counted { .. }) => {
                return Err(RangeError::Unbounded { a, b }.into());
            }
            (
                AmountRange::Bounded { start: a1, end: a2 },
                AmountRange::Bounded { start: b1, end: b2 },
            ) => bounded_difference(a1, a2, b1, b2),
            (AmountRange::Bounded { start: a1, end: a2 }, AmountRange::Counted { start, count }) => {
                let (b1, b2) = self.resolve(start, count);
                bounded_difference(a1, a2, b1, b2)
            }
            (AmountRange::Counted { start, count }, AmountRange::Bounded { start: b1, end: b2 }) => {
                self.counted_difference(start, count, b1, b2)
            }
        };
        Ok(pieces)
    }

    /// `true` unless the two ranges provably share no identity.
    ///
    /// A `Counted` range only reaches one way, so it misses a bounded range only when it
    /// starts strictly beyond the far edge in its own direction.
    pub fn is_intersected(&self, a: AmountRange, b: AmountRange) -> bool {
        is_intersected(a, b)
    }

    /// Number of lattice items in `[from, to)`, at least one when `from < to`.
    pub fn steps_between(&self, from: Uid, to: Uid) -> i64 {
        if from >= to {
            return 0;
        }
        let span = to.timestamp.saturating_sub(from.timestamp);
        let iv = self.interval.millis();
        let steps = span / iv + i64::from(span % iv != 0);
        steps.max(1)
    }

    /// Resolves a counted range to its lattice span `(low, high)`.
    pub fn resolve(&self, start: Uid, count: i64) -> (Uid, Uid) {
        let steps = i64::try_from(count.unsigned_abs().saturating_sub(1)).unwrap_or(i64::MAX);
        let reach = steps.saturating_mul(self.interval.millis());
        if count > 0 {
            (start, start.shifted(reach).max(start))
        } else {
            (start.shifted(-reach).min(start), start)
        }
    }

    fn counted_difference(&self, s: Uid, c: i64, b1: Uid, b2: Uid) -> Option<RangePieces> {
        let whole = AmountRange::Counted { start: s, count: c };
        if c > 0 {
            if s > b2 {
                // Reaches away from the subtrahend.
                return Some(smallvec![whole]);
            }
            if s >= b1 {
                let covered = self.steps_between(s, b2) + 1;
                let rem = c - covered;
                return (rem > 0).then(|| smallvec![AmountRange::counted(b2, rem + 1)]);
            }
            let outside = self.steps_between(s, b1);
            if c <= outside {
                return Some(smallvec![whole]);
            }
            let inside = self.steps_between(b1, b2) + 1;
            let rem = c - outside - inside;
            let mut pieces: RangePieces = smallvec![AmountRange::bounded(s, b1)];
            if rem > 0 {
                pieces.push(AmountRange::counted(b2, rem + 1));
            }
            Some(pieces)
        } else {
            let m = c.saturating_neg();
            if s < b1 {
                return Some(smallvec![whole]);
            }
            if s <= b2 {
                let covered = self.steps_between(b1, s) + 1;
                let rem = m - covered;
                return (rem > 0).then(|| smallvec![AmountRange::counted(b1, -(rem + 1))]);
            }
            let outside = self.steps_between(b2, s);
            if m <= outside {
                return Some(smallvec![whole]);
            }
            let inside = self.steps_between(b1, b2) + 1;
            let rem = m - outside - inside;
            let mut pieces: RangePieces = SmallVec::new();
            if rem > 0 {
                pieces.push(AmountRange::counted(b1, -(rem + 1)));
            }
            pieces.push(AmountRange::bounded(b2, s));
            Some(pieces)
        }
    }
}

fn bounded_difference(a1: Uid, a2: Uid, b1: Uid, b2: Uid) -> Option<RangePieces> {
    let whole = AmountRange::Bounded { start: a1, end: a2 };
    if a2 < b1 || a1 > b2 {
        // Disjoint before or after.
        return Some(smallvec![whole]);
    }
    match (a1 < b1, a2 > b2) {
        (false, false) => None,
        (true, true) => Some(smallvec![
            AmountRange::bounded(a1, b1),
            AmountRange::bounded(b2, a2)
        ]),
        (true, false) => Some(smallvec![AmountRange::bounded(a1, b1)]),
        (false, true) => Some(smallvec![AmountRange::bounded(b2, a2)]),
    }
}

/// Free-standing intersection test; needs no lattice.
pub fn is_intersected(a: AmountRange, b: AmountRange) -> bool {
    use AmountRange::{Bounded, Counted};

    match (a.normalized(), b.normalized()) {
        (Bounded { start: a1, end: a2 }, Bounded { start: b1, end: b2 }) => !(a2 < b1 || a1 > b2),
        (Counted { start, count }, Bounded { start: b1, end: b2 })
        | (Bounded { start: b1, end: b2 }, Counted { start, count }) => {
            if count > 0 {
                start <= b2
            } else if count < 0 {
                start >= b1
            } else {
                false
            }
        }
        (Counted { start: s1, count: c1 }, Counted { start: s2, count: c2 }) => {
            if c1 == 0 || c2 == 0 {
                false
            } else if c1.signum() == c2.signum() {
                true
            } else if c1 > 0 {
                s1 <= s2
            } else {
                s2 <= s1
            }
        }
    }
}

// ================================================================================================
// Narrowing
// ================================================================================================

/// Outcome of narrowing a request against resident data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Narrowed {
    /// Resident data already answers the request.
    Satisfied,
    /// What is left to obtain. Unchanged when the store does not bracket the anchor.
    Residual(AmountRange),
}

/// Subtracts resident records from `target`.
///
/// A `Counted` target whose anchor lies within the store consumes the records from the
/// anchor (inclusive) toward its direction. The residual is re-anchored on the store edge,
/// which counts as its first item. A `Bounded` target is satisfied only when fully covered.
pub fn narrow<T: Keyed>(target: AmountRange, store: &SortedStore<T>) -> Narrowed {
    let Some((first, last)) = store.bounds() else {
        return Narrowed::Residual(target);
    };

    match target.normalized() {
        AmountRange::Bounded { start, end } => {
            if first <= start && end <= last {
                Narrowed::Satisfied
            } else {
                Narrowed::Residual(target)
            }
        }
        AmountRange::Counted { start, count } => {
            if start < first || start > last || count == 0 {
                return Narrowed::Residual(target);
            }
            if count > 0 {
                let available = (store.len() - store.lower_bound(start)) as i64;
                if available >= count {
                    Narrowed::Satisfied
                } else {
                    Narrowed::Residual(AmountRange::counted(last, count - available + 1))
                }
            } else {
                let available = store
                    .as_slice()
                    .partition_point(|item| item.uid() <= start) as i64;
                let wanted = count.saturating_neg();
                if available >= wanted {
                    Narrowed::Satisfied
                } else {
                    Narrowed::Residual(AmountRange::counted(first, -(wanted - available + 1)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChartflowError;

    const DAY: i64 = 86_400_000;

    fn day(n: i64) -> Uid {
        Uid::at(n * DAY)
    }

    fn ops() -> RangeOps {
        RangeOps::new(Interval(DAY)).unwrap()
    }

    // ============================================================================
    // Bounded vs Bounded
    // ============================================================================

    #[test]
    fn test_gap_on_both_sides_returns_two_pieces() {
        let pieces = ops()
            .difference(
                AmountRange::bounded(day(1), day(7)),
                AmountRange::bounded(day(3), day(5)),
            )
            .unwrap()
            .expect("minuend is not covered");

        assert_eq!(
            pieces.as_slice(),
            &[
                AmountRange::bounded(day(1), day(3)),
                AmountRange::bounded(day(5), day(7))
            ]
        );
    }

    #[test]
    fn test_bounded_sub_cases() {
        let o = ops();
        let b = AmountRange::bounded(day(3), day(5));

        let before = AmountRange::bounded(day(0), day(2));
        assert_eq!(o.difference(before, b).unwrap().unwrap().as_slice(), &[before]);

        let after = AmountRange::bounded(day(6), day(9));
        assert_eq!(o.difference(after, b).unwrap().unwrap().as_slice(), &[after]);

        let covered = AmountRange::bounded(day(3), day(4));
        assert_eq!(o.difference(covered, b).unwrap(), None);

        let left = AmountRange::bounded(day(1), day(4));
        assert_eq!(
            o.difference(left, b).unwrap().unwrap().as_slice(),
            &[AmountRange::bounded(day(1), day(3))]
        );

        let right = AmountRange::bounded(day(4), day(8));
        assert_eq!(
            o.difference(right, b).unwrap().unwrap().as_slice(),
            &[AmountRange::bounded(day(5), day(8))]
        );
    }

    #[test]
    fn test_reversed_bounds_are_normalized() {
        let reversed = AmountRange::Bounded {
            start: day(7),
            end: day(1),
        };
        let pieces = ops()
            .difference(reversed, AmountRange::bounded(day(5), day(3)))
            .unwrap()
            .unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], AmountRange::bounded(day(1), day(3)));
    }

    // ============================================================================
    // Counted vs Bounded
    // ============================================================================

    #[test]
    fn test_counted_reaching_away_is_untouched() {
        let b = AmountRange::bounded(day(1), day(10));
        let fwd = AmountRange::counted(day(11), 13);
        let back = AmountRange::counted(day(0), -5);

        assert_eq!(ops().difference(fwd, b).unwrap().unwrap().as_slice(), &[fwd]);
        assert_eq!(ops().difference(back, b).unwrap().unwrap().as_slice(), &[back]);
    }

    #[test]
    fn test_counted_inside_yields_residual_on_far_edge() {
        let b = AmountRange::bounded(day(1), day(10));

        // day5..day10 is 6 items, 4 more are needed past day10.
        let pieces = ops()
            .difference(AmountRange::counted(day(5), 10), b)
            .unwrap()
            .unwrap();
        assert_eq!(pieces.as_slice(), &[AmountRange::counted(day(10), 5)]);

        // day1..day5 backward is 5 items, covered.
        assert_eq!(
            ops()
                .difference(AmountRange::counted(day(5), -5), b)
                .unwrap(),
            None
        );

        let back = ops()
            .difference(AmountRange::counted(day(5), -8), b)
            .unwrap()
            .unwrap();
        assert_eq!(back.as_slice(), &[AmountRange::counted(day(1), -4)]);
    }

    #[test]
    fn test_counted_reaching_toward_short_request_stays_single_piece() {
        let b = AmountRange::bounded(day(10), day(12));
        let req = AmountRange::counted(day(1), 4);

        let pieces = ops().difference(req, b).unwrap().unwrap();
        assert_eq!(pieces.as_slice(), &[req], "day1..day4 never reaches day10");
    }

    #[test]
    fn test_counted_reaching_toward_long_request_splits() {
        let b = AmountRange::bounded(day(10), day(12));

        // day1..day9 outside (9), day10..day12 inside (3), 3 more past day12.
        let pieces = ops()
            .difference(AmountRange::counted(day(1), 15), b)
            .unwrap()
            .unwrap();
        assert_eq!(
            pieces.as_slice(),
            &[
                AmountRange::bounded(day(1), day(10)),
                AmountRange::counted(day(12), 4)
            ]
        );

        // Mirror: day20 back to day13 outside (8), inside 3, 2 more before day10.
        let pieces = ops()
            .difference(AmountRange::counted(day(20), -13), b)
            .unwrap()
            .unwrap();
        assert_eq!(
            pieces.as_slice(),
            &[
                AmountRange::counted(day(10), -3),
                AmountRange::bounded(day(12), day(20))
            ]
        );
    }

    #[test]
    fn test_bounded_minus_counted_resolves_on_lattice() {
        let pieces = ops()
            .difference(
                AmountRange::bounded(day(1), day(10)),
                AmountRange::counted(day(3), 3),
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            pieces.as_slice(),
            &[
                AmountRange::bounded(day(1), day(3)),
                AmountRange::bounded(day(5), day(10))
            ]
        );
    }

    // ============================================================================
    // Preconditions
    // ============================================================================

    #[test]
    fn test_unbounded_vs_unbounded_is_rejected() {
        let err = ops()
            .difference(
                AmountRange::counted(day(1), 5),
                AmountRange::counted(day(3), -2),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ChartflowError::Range(RangeError::Unbounded { .. })
        ));
    }

    #[test]
    fn test_zero_count_and_zero_interval_are_rejected() {
        let err = ops()
            .difference(
                AmountRange::counted(day(1), 0),
                AmountRange::bounded(day(0), day(2)),
            )
            .unwrap_err();
        assert!(matches!(err, ChartflowError::Range(RangeError::ZeroCount(_))));
        assert!(RangeOps::new(Interval(0)).is_err());
    }

    // ============================================================================
    // Intersection
    // ============================================================================

    #[test]
    fn test_is_intersected() {
        let b = AmountRange::bounded(day(3), day(5));

        assert!(is_intersected(AmountRange::bounded(day(5), day(9)), b));
        assert!(!is_intersected(AmountRange::bounded(day(6), day(9)), b));

        assert!(is_intersected(AmountRange::counted(day(1), 2), b), "reaches toward");
        assert!(!is_intersected(AmountRange::counted(day(6), 2), b), "ahead of b");
        assert!(!is_intersected(AmountRange::counted(day(2), -2), b), "behind b");
        assert!(is_intersected(b, AmountRange::counted(day(9), -1)));

        assert!(is_intersected(
            AmountRange::counted(day(1), 3),
            AmountRange::counted(day(4), -3)
        ));
        assert!(!is_intersected(
            AmountRange::counted(day(5), 3),
            AmountRange::counted(day(4), -3)
        ));
    }

    #[test]
    fn test_steps_between_rounds_up_off_lattice() {
        let o = ops();
        assert_eq!(o.steps_between(day(1), day(4)), 3);
        assert_eq!(o.steps_between(day(1), day(1)), 0);
        assert_eq!(o.steps_between(day(1), Uid::new(DAY, 1)), 1);
        assert_eq!(o.steps_between(day(1), Uid::at(DAY * 2 + 1)), 2);
    }

    // ============================================================================
    // Narrowing
    // ============================================================================

    fn days(range: std::ops::RangeInclusive<i64>) -> SortedStore<Uid> {
        SortedStore::from_batch(range.map(day).collect())
    }

    #[test]
    fn test_narrow_inside_resident_data_is_satisfied() {
        let store = days(1..=10);
        assert_eq!(
            narrow(AmountRange::counted(day(5), 3), &store),
            Narrowed::Satisfied
        );
        assert_eq!(
            narrow(AmountRange::counted(day(5), -5), &store),
            Narrowed::Satisfied
        );
        assert_eq!(
            narrow(AmountRange::bounded(day(2), day(9)), &store),
            Narrowed::Satisfied
        );
    }

    #[test]
    fn test_narrow_leaves_residual_on_store_edge() {
        let store = days(1..=10);
        assert_eq!(
            narrow(AmountRange::counted(day(8), 5), &store),
            Narrowed::Residual(AmountRange::counted(day(10), 3))
        );
        assert_eq!(
            narrow(AmountRange::counted(day(2), -4), &store),
            Narrowed::Residual(AmountRange::counted(day(1), -3))
        );
    }

    #[test]
    fn test_extreme_backward_count_saturates() {
        let store = days(1..=10);
        let req = AmountRange::counted(day(5), i64::MIN);
        let expected = AmountRange::counted(day(1), -(i64::MAX - 4));

        assert_eq!(narrow(req, &store), Narrowed::Residual(expected));
        let pieces = ops()
            .difference(req, AmountRange::bounded(day(1), day(10)))
            .unwrap()
            .unwrap();
        assert_eq!(pieces.as_slice(), &[expected]);

        let (low, high) = ops().resolve(day(5), i64::MIN);
        assert_eq!(high, day(5));
        assert!(low < day(1));
    }

    #[test]
    fn test_narrow_outside_or_empty_is_unchanged() {
        let req = AmountRange::counted(day(11), 13);
        assert_eq!(narrow(req, &days(1..=10)), Narrowed::Residual(req));
        assert_eq!(
            narrow(req, &SortedStore::<Uid>::new()),
            Narrowed::Residual(req)
        );
    }
}
