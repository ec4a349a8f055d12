use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{
    data::uid::{Keyed, Uid},
    storage::{
        cursor::{Cursor, Filter},
        event::Change,
    },
};

/// Ordered container of keyed records with a generation stamp.
///
/// # Invariants
///
/// - Records are strictly increasing by [`Uid`]; no two share a key.
/// - `generation` increments on every mutation. Cursors compare it to detect that the
///   container moved underneath them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortedStore<T> {
    items: Vec<T>,
    generation: u64,
}

impl<T> Default for SortedStore<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
        }
    }
}

impl<T: Keyed> SortedStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from an unordered batch.
    pub fn from_batch(batch: Vec<T>) -> Self {
        let mut store = Self::new();
        store.merge(batch);
        store
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// `(first, last)` identities of resident data.
    pub fn bounds(&self) -> Option<(Uid, Uid)> {
        Some((self.first()?.uid(), self.last()?.uid()))
    }

    /// Binary search by key: `Ok(index)` when resident, `Err(insertion point)` otherwise.
    pub fn position(&self, uid: Uid) -> Result<usize, usize> {
        self.items.binary_search_by_key(&uid, Keyed::uid)
    }

    pub fn find(&self, uid: Uid) -> Option<&T> {
        self.position(uid).ok().map(|i| &self.items[i])
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.position(uid).is_ok()
    }

    /// Index of the first record with key `>= uid`.
    pub fn lower_bound(&self, uid: Uid) -> usize {
        self.items.partition_point(|item| item.uid() < uid)
    }

    /// A fresh cursor with independent position state.
    pub fn iterator(&self, filter: Option<Filter<T>>) -> Cursor<T> {
        Cursor::new(self, filter)
    }

    // ============================================================================
    // Mutation
    // ============================================================================

    /// Merges a batch by key. Equal keys are replaced (last write wins), new keys are
    /// inserted in order. Merging the same batch twice leaves the store unchanged.
    ///
    /// Returns the touched span, or `None` for an empty batch.
    pub fn merge(&mut self, mut batch: Vec<T>) -> Option<Change> {
        if batch.is_empty() {
            return None;
        }
        sort_dedup(&mut batch);
        let change = Change::new(batch[0].uid(), batch[batch.len() - 1].uid(), batch.len());

        let appends = self
            .items
            .last()
            .is_none_or(|last| last.uid() < change.first);
        if appends {
            self.items.extend(batch);
        } else {
            let old = std::mem::take(&mut self.items);
            self.items = merge_sorted(old, batch);
        }

        self.generation += 1;
        Some(change)
    }

    /// Drops every record with key `>= from`, then merges `batch`.
    ///
    /// Used by derived series that replay from a midpoint. The returned change spans both
    /// the removed and the written records.
    pub fn splice(&mut self, from: Uid, batch: Vec<T>) -> Option<Change> {
        let cut = self.lower_bound(from);
        let removed = (cut < self.items.len()).then(|| {
            Change::new(
                self.items[cut].uid(),
                self.items[self.items.len() - 1].uid(),
                0,
            )
        });
        if removed.is_some() {
            self.items.truncate(cut);
            self.generation += 1;
        }

        match (removed, self.merge(batch)) {
            (Some(r), Some(w)) => Some(r.union(w)),
            (r, w) => r.or(w),
        }
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.generation += 1;
        }
    }

    /// Runs `f` over `range` with each record's predecessor, for in-place field updates.
    ///
    /// `f` must not change keys.
    pub fn update_with_prev<F>(&mut self, range: Range<usize>, mut f: F)
    where
        F: FnMut(Option<&T>, &mut T),
    {
        let end = range.end.min(self.items.len());
        for i in range.start..end {
            let (head, tail) = self.items.split_at_mut(i);
            let current = &mut tail[0];
            let key = current.uid();
            f(head.last(), current);
            debug_assert_eq!(key, current.uid(), "update_with_prev changed a key");
        }
        self.generation += 1;
    }
}

/// Stable sort by key, keeping the last of equal keys.
fn sort_dedup<T: Keyed>(batch: &mut Vec<T>) {
    batch.sort_by_key(Keyed::uid);
    let mut out: Vec<T> = Vec::with_capacity(batch.len());
    for item in batch.drain(..) {
        match out.last_mut() {
            Some(last) if last.uid() == item.uid() => *last = item,
            _ => out.push(item),
        }
    }
    *batch = out;
}

fn merge_sorted<T: Keyed>(old: Vec<T>, batch: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(old.len() + batch.len());
    let mut old = old.into_iter().peekable();
    let mut new = batch.into_iter().peekable();

    loop {
        match (old.peek(), new.peek()) {
            (Some(a), Some(b)) => match a.uid().cmp(&b.uid()) {
                std::cmp::Ordering::Less => out.extend(old.next()),
                std::cmp::Ordering::Greater => out.extend(new.next()),
                std::cmp::Ordering::Equal => {
                    old.next();
                    out.extend(new.next());
                }
            },
            (Some(_), None) => {
                out.extend(old);
                break;
            }
            (None, _) => {
                out.extend(new);
                break;
            }
        }
    }
    out
}
