//! Time-windowed coalescing of per-key events.
//!
//! Each key keeps only the time of its most recent event; a key becomes
//! ready once it has been quiet for the whole window.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

pub struct Debouncer<K> {
    window: Duration,
    pending: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event, restarting the key's quiet period.
    pub fn push(&mut self, key: K, now: Instant) {
        self.pending.insert(key, now);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every key quiet for at least the window.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<K> {
        let window = self.window;
        let ready: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            self.pending.remove(key);
        }
        ready
    }

    /// When the earliest pending key becomes ready
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|last| *last + self.window)
    }

    /// Drop everything pending
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
