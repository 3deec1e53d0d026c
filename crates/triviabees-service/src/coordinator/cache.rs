use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::RequestDigest;

/// A successful result held in memory.
#[derive(Clone, Debug)]
struct CachedItem<V> {
    value: V,
    /// The item is visible strictly before this instant.
    expires_at: Instant,
    /// Distinguishes this insertion from earlier ones of the same digest in `order`.
    insert_id: u64,
}

/// An in-memory cache of successful generation results.
///
/// Items expire after a fixed TTL and are purged lazily when looked up. Once the cache is full, the
/// oldest *inserted* item is evicted, no matter how often it was read.
#[derive(Debug)]
pub struct ResultCache<V> {
    ttl: Duration,
    capacity: usize,
    items: HashMap<RequestDigest, CachedItem<V>>,
    /// Insertion order. May contain records of items that were purged or replaced since.
    order: VecDeque<(RequestDigest, u64)>,
    next_insert_id: u64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            items: HashMap::new(),
            order: VecDeque::new(),
            next_insert_id: 0,
        }
    }

    /// Returns a clone of the unexpired item for `digest`, purging it if it expired.
    pub fn get(&mut self, digest: &RequestDigest, now: Instant) -> Option<V> {
        let item = self.items.get(digest)?;
        if now < item.expires_at {
            return Some(item.value.clone());
        }

        self.items.remove(digest);
        self.compact();
        None
    }

    /// Inserts a fresh item, evicting the oldest one if the cache is full.
    pub fn insert(&mut self, digest: RequestDigest, value: V, now: Instant) {
        if self.capacity == 0 {
            return;
        }

        // a stale item for the same digest is replaced, never refreshed in place
        self.items.remove(&digest);
        while self.items.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        let insert_id = self.next_insert_id;
        self.next_insert_id += 1;
        self.order.push_back((digest, insert_id));
        self.items.insert(
            digest,
            CachedItem {
                value,
                expires_at: now + self.ttl,
                insert_id,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some((digest, insert_id)) = self.order.pop_front() {
            let is_current = self
                .items
                .get(&digest)
                .is_some_and(|item| item.insert_id == insert_id);
            if is_current {
                self.items.remove(&digest);
                tracing::trace!(%digest, "Evicted oldest cached result");
                return true;
            }
        }
        false
    }

    /// Drops records of purged items once they dominate the insertion order.
    fn compact(&mut self) {
        if self.order.len() > 2 * self.items.len().max(self.capacity) {
            let items = &self.items;
            self.order.retain(|(digest, insert_id)| {
                items
                    .get(digest)
                    .is_some_and(|item| item.insert_id == *insert_id)
            });
        }
    }
}
