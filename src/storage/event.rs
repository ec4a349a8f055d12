use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{range::AmountRange, uid::Uid};

/// Span of identities touched by one storage mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    pub first: Uid,
    pub last: Uid,
    /// Number of records written. Zero when the mutation only removed records.
    pub count: usize,
}

impl Change {
    pub fn new(first: Uid, last: Uid, count: usize) -> Self {
        Self { first, last, count }
    }

    pub fn range(&self) -> AmountRange {
        AmountRange::bounded(self.first, self.last)
    }

    /// Smallest change covering both.
    pub fn union(self, other: Change) -> Change {
        Change {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
            count: self.count + other.count,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] x{}", self.first, self.last, self.count)
    }
}

// ================================================================================================
// Listener Hub
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

pub type Listener<E> = Box<dyn FnMut(&E)>;

/// Ordered set of listeners. Delivery is synchronous and follows subscription order.
pub struct EventHub<E> {
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: u64,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&mut self, event: &E) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[test]
    fn test_delivery_follows_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut hub: EventHub<u32> = EventHub::new();

        let a = Rc::clone(&log);
        hub.subscribe(Box::new(move |e| a.borrow_mut().push(("a", *e))));
        let b = Rc::clone(&log);
        let id_b = hub.subscribe(Box::new(move |e| b.borrow_mut().push(("b", *e))));

        hub.notify(&1);
        assert!(hub.unsubscribe(id_b));
        hub.notify(&2);

        assert_eq!(*log.borrow(), vec![("a", 1), ("b", 1), ("a", 2)]);
        assert!(!hub.unsubscribe(id_b), "already removed");
    }

    #[test]
    fn test_change_union_and_range() {
        let c = Change::new(Uid::at(5), Uid::at(7), 3).union(Change::new(Uid::at(2), Uid::at(6), 1));
        assert_eq!(c, Change::new(Uid::at(2), Uid::at(7), 4));
        assert_eq!(c.range(), AmountRange::bounded(Uid::at(2), Uid::at(7)));
    }
}
