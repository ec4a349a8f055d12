use crate::data::{domain::Interval, uid::Uid};

/// Decides which visible slots carry a grid line and label.
pub trait GridSpacing {
    /// `prev` is the identity of the slot before `uid`, if any is visible.
    fn is_line(&self, uid: Uid, prev: Option<Uid>, interval: Interval) -> bool;
}

/// A line on every n-th slot of the interval lattice.
///
/// Anchored on absolute time, so lines stay put while panning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryNth(pub u32);

impl GridSpacing for EveryNth {
    fn is_line(&self, uid: Uid, _prev: Option<Uid>, interval: Interval) -> bool {
        let n = i64::from(self.0.max(1));
        uid.timestamp
            .div_euclid(interval.millis().max(1))
            .rem_euclid(n)
            == 0
    }
}

/// A line wherever the UTC calendar day changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayBoundary;

impl GridSpacing for DayBoundary {
    fn is_line(&self, uid: Uid, prev: Option<Uid>, _interval: Interval) -> bool {
        prev.is_some_and(|p| p.date().date_naive() != uid.date().date_naive())
    }
}
