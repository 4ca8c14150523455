//! Keys that are forgotten after a fixed delay.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A set whose entries expire `ttl` after they were first inserted.
///
/// Expiry is driven by the owner: it calls [`ExpiringSet::expire`] at
/// [`ExpiringSet::next_deadline`].
#[derive(Debug, Clone)]
pub struct ExpiringSet<K> {
    ttl: Duration,
    entries: BTreeMap<K, Instant>,
}

impl<K: Ord + Clone> ExpiringSet<K> {
    /// Create an empty set.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: BTreeMap::new(),
        }
    }

    /// Add a key. Re-inserting a present key keeps its original deadline.
    /// Returns whether the key was new.
    pub fn insert(&mut self, key: K, now: Instant) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, now + self.ttl);
        true
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove and return every key whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        self.take_where(|_, deadline| deadline <= now)
    }

    /// Remove and return every key matching `predicate`, in key order.
    pub fn take_matching(&mut self, mut predicate: impl FnMut(&K) -> bool) -> Vec<K> {
        self.take_where(|key, _| predicate(key))
    }

    /// Earliest deadline of any key.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().min().copied()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_where(&mut self, mut predicate: impl FnMut(&K, Instant) -> bool) -> Vec<K> {
        let taken: Vec<K> = self
            .entries
            .iter()
            .filter(|(key, deadline)| predicate(*key, **deadline))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &taken {
            self.entries.remove(key);
        }
        taken
    }
}
