use std::fmt;

use tracing::trace;

use crate::{
    data::uid::{Keyed, Uid},
    error::{ChartflowResult, CursorError},
    storage::store::SortedStore,
};

/// Predicate applied transparently to every cursor movement.
pub type Filter<T> = Box<dyn Fn(&T) -> bool>;

/// Stateful position over a [`SortedStore`].
///
/// The cursor only holds indices; the store is passed into every call. It remembers the
/// generation it was last synchronised with and the key it sits on. When the store has
/// been mutated in between, the cursor rebases itself by re-seeking that key. If the key
/// is gone, it lands on the closest preceding record so that `move_next` continues with
/// the first record after the old key.
pub struct Cursor<T> {
    position: Option<usize>,
    generation: u64,
    key: Option<Uid>,
    filter: Option<Filter<T>>,
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .field("generation", &self.generation)
            .field("key", &self.key)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<T: Keyed> Cursor<T> {
    pub fn new(store: &SortedStore<T>, filter: Option<Filter<T>>) -> Self {
        Self {
            position: None,
            generation: store.generation(),
            key: None,
            filter,
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn is_unset(&self) -> bool {
        self.position.is_none()
    }

    /// Index into the store, `None` while unset.
    pub fn position(&mut self, store: &SortedStore<T>) -> Option<usize> {
        self.sync(store);
        self.position
    }

    pub fn reset(&mut self) {
        self.position = None;
        self.key = None;
    }

    pub fn current<'a>(&mut self, store: &'a SortedStore<T>) -> Option<&'a T> {
        self.sync(store);
        self.position.and_then(|i| store.get(i))
    }

    /// Steps to the next matching record. Returns `false` at the end without moving.
    pub fn move_next(&mut self, store: &SortedStore<T>) -> bool {
        self.sync(store);
        let from = self.position.map_or(0, |p| p + 1);
        match self.scan_forward(store, from, |_| true) {
            Some(i) => {
                self.place(store, i);
                true
            }
            None => false,
        }
    }

    /// Steps to the previous matching record. Returns `false` at the start or when unset.
    pub fn move_prev(&mut self, store: &SortedStore<T>) -> bool {
        self.sync(store);
        let Some(p) = self.position else {
            return false;
        };
        match self.scan_backward(store, p) {
            Some(i) => {
                self.place(store, i);
                true
            }
            None => false,
        }
    }

    /// Resets and scans from the start for the first record matching `pred`.
    pub fn go_to<P>(&mut self, store: &SortedStore<T>, pred: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.sync(store);
        self.reset();
        match self.scan_forward(store, 0, pred) {
            Some(i) => {
                self.place(store, i);
                true
            }
            None => false,
        }
    }

    /// Resets and advances from the start while `pred` holds, stopping on the last match.
    pub fn go_while<P>(&mut self, store: &SortedStore<T>, pred: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.sync(store);
        self.reset();
        let mut last = None;
        let mut from = 0;
        while let Some(i) = self.scan_forward(store, from, |_| true) {
            if !pred(&store.as_slice()[i]) {
                break;
            }
            last = Some(i);
            from = i + 1;
        }
        match last {
            Some(i) => {
                self.place(store, i);
                true
            }
            None => false,
        }
    }

    /// Scans forward from the current record (inclusive) for `pred`.
    ///
    /// Returns the number of records moved over, or `None` (position kept) if no record
    /// matches.
    pub fn move_to<P>(&mut self, store: &SortedStore<T>, pred: P) -> Option<usize>
    where
        P: Fn(&T) -> bool,
    {
        self.sync(store);
        let from = self.position.unwrap_or(0);
        let start = self.position;
        let found = self.scan_forward(store, from, pred)?;
        self.place(store, found);

        let moved = match start {
            Some(s) => found - s,
            None => found + 1,
        };
        Some(moved)
    }

    /// Jumps `n` records, clamped to the store ends. Returns the signed distance moved.
    pub fn move_times(&mut self, store: &SortedStore<T>, n: i64) -> ChartflowResult<i64> {
        if self.filter.is_some() {
            return Err(CursorError::UnsupportedOnFiltered("move_times").into());
        }
        self.sync(store);
        let Some(p) = self.position else {
            return Err(CursorError::Unset.into());
        };
        let max = store.len().saturating_sub(1) as i64;
        let target = (p as i64).saturating_add(n).clamp(0, max);
        self.place(store, target as usize);
        Ok(target - p as i64)
    }

    /// Walks backward from the current record, calling `callback(item, steps_back)` until it
    /// returns `false` or the start is reached. The cursor stays on the last accepted record.
    ///
    /// Returns the number of steps taken.
    pub fn move_prev_while<F>(&mut self, store: &SortedStore<T>, mut callback: F) -> usize
    where
        F: FnMut(&T, usize) -> bool,
    {
        self.sync(store);
        let Some(mut p) = self.position else {
            return 0;
        };
        let mut steps = 0;
        if !callback(&store.as_slice()[p], steps) {
            return 0;
        }
        while let Some(prev) = self.scan_backward(store, p) {
            if !callback(&store.as_slice()[prev], steps + 1) {
                break;
            }
            steps += 1;
            p = prev;
        }
        self.place(store, p);
        steps
    }

    /// Number of resident records.
    pub fn count(&self, store: &SortedStore<T>) -> ChartflowResult<usize> {
        if self.filter.is_some() {
            return Err(CursorError::UnsupportedOnFiltered("count").into());
        }
        Ok(store.len())
    }

    // ============================================================================
    // Internals
    // ============================================================================

    fn matches(&self, item: &T) -> bool {
        self.filter.as_ref().is_none_or(|f| f(item))
    }

    fn scan_forward<P>(&self, store: &SortedStore<T>, from: usize, pred: P) -> Option<usize>
    where
        P: Fn(&T) -> bool,
    {
        store
            .as_slice()
            .get(from..)?
            .iter()
            .position(|item| self.matches(item) && pred(item))
            .map(|offset| from + offset)
    }

    fn scan_backward(&self, store: &SortedStore<T>, before: usize) -> Option<usize> {
        store.as_slice()[..before.min(store.len())]
            .iter()
            .rposition(|item| self.matches(item))
    }

    fn place(&mut self, store: &SortedStore<T>, index: usize) {
        self.position = Some(index);
        self.key = store.get(index).map(Keyed::uid);
        self.generation = store.generation();
    }

    fn sync(&mut self, store: &SortedStore<T>) {
        if self.generation == store.generation() {
            return;
        }
        let stale = self.generation;
        self.generation = store.generation();

        let Some(key) = self.key else {
            self.position = None;
            return;
        };
        self.position = match store.position(key) {
            Ok(i) => Some(i),
            Err(i) => i.checked_sub(1),
        };
        self.key = self.position.and_then(|i| store.get(i)).map(Keyed::uid);
        trace!(
            key = %key,
            stale_generation = stale,
            generation = self.generation,
            position = ?self.position,
            "Cursor rebased"
        );
    }
}
