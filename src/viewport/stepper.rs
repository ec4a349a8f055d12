use crate::{
    data::{
        domain::Interval,
        uid::{Keyed, Uid},
    },
    storage::store::SortedStore,
};

/// Walks the timeline in whole steps across resident and virtual regions alike.
///
/// Resident records are addressed by their index. Past either edge the timeline continues
/// on the interval lattice anchored at that edge: index `-k` is `first - k * interval`,
/// index `len - 1 + k` is `last + k * interval`. Callers never see the seam.
///
/// Resident records and those two lattices are the positions the stepper can land on.
/// Any other identity takes the slot of the next position at or after it (see
/// [`Stepper::snap`]), so `step(step(u, k), -k) == snap(u)` for every `u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stepper {
    interval: Interval,
}

impl Stepper {
    pub fn new(interval: Interval) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The identity `n` steps away from `from`.
    pub fn step<T: Keyed>(&self, store: &SortedStore<T>, from: Uid, n: i64) -> Uid {
        if n == 0 {
            return from;
        }
        match self.index_of(store, from) {
            Some(index) => self.uid_at(store, index.saturating_add(n)),
            None => from.shifted(n.saturating_mul(self.interval.millis())),
        }
    }

    /// The position `uid` occupies: itself when resident or on an edge lattice, otherwise
    /// the next position after it.
    pub fn snap<T: Keyed>(&self, store: &SortedStore<T>, uid: Uid) -> Uid {
        match self.index_of(store, uid) {
            Some(index) => self.uid_at(store, index),
            None => uid,
        }
    }

    /// Signed number of steps from `from` to `to`. Inverse of [`Stepper::step`].
    pub fn distance<T: Keyed>(&self, store: &SortedStore<T>, from: Uid, to: Uid) -> i64 {
        match (self.index_of(store, from), self.index_of(store, to)) {
            (Some(a), Some(b)) => b - a,
            _ => (to.timestamp - from.timestamp).div_euclid(self.interval.millis()),
        }
    }

    /// Virtual index of `uid`; `None` for an empty store.
    ///
    /// Identities between positions round forward: a gap inside the resident span maps to
    /// its successor, an off-lattice point past an edge to the next lattice point.
    pub fn index_of<T: Keyed>(&self, store: &SortedStore<T>, uid: Uid) -> Option<i64> {
        let (first, last) = store.bounds()?;
        let iv = self.interval.millis();
        let index = if uid < first {
            -(first.timestamp - uid.timestamp).div_euclid(iv)
        } else if uid > last {
            store.len() as i64 - 1 + ceil_div(uid.timestamp - last.timestamp, iv).max(1)
        } else {
            match store.position(uid) {
                Ok(i) | Err(i) => i as i64,
            }
        };
        Some(index)
    }

    fn uid_at<T: Keyed>(&self, store: &SortedStore<T>, index: i64) -> Uid {
        let iv = self.interval.millis();
        let last_index = store.len() as i64 - 1;
        match (store.first(), store.last()) {
            (Some(first), _) if index < 0 => first.uid().shifted(index.saturating_mul(iv)),
            (_, Some(last)) if index > last_index => {
                last.uid().shifted((index - last_index).saturating_mul(iv))
            }
            _ => store
                .get(index as usize)
                .map(Keyed::uid)
                .unwrap_or_default(),
        }
    }
}

fn ceil_div(num: i64, den: i64) -> i64 {
    num / den + i64::from(num % den != 0)
}
