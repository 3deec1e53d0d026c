use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Ordering key of a queued item: highest priority first, then in order of arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// A priority queue that is FIFO within one priority.
///
/// Entries are never reordered once enqueued. Arrival order is tracked with a sequence number
/// rather than a timestamp so that two entries can never tie.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    entries: BTreeMap<QueueKey, T>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> PriorityQueue<T> {
    pub fn push(&mut self, priority: i32, item: T) {
        let key = QueueKey {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, item);
    }

    /// Removes the highest-priority, oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_first().map(|(_, item)| item)
    }

    /// The lowest priority currently waiting.
    pub fn lowest_priority(&self) -> Option<i32> {
        self.entries
            .last_key_value()
            .map(|(key, _)| key.priority.0)
    }

    /// Removes the oldest item among those with the lowest priority.
    pub fn shed_lowest(&mut self) -> Option<(i32, T)> {
        let lowest = self.lowest_priority()?;
        let start = QueueKey {
            priority: Reverse(lowest),
            seq: 0,
        };
        let key = *self.entries.range(start..).next()?.0;
        self.entries.remove(&key).map(|item| (lowest, item))
    }

    /// Removes the first item matching `predicate`, in queue order.
    pub fn remove_first(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let key = *self
            .entries
            .iter()
            .find(|(_, item)| predicate(item))?
            .0;
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
