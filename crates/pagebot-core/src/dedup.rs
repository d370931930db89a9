//! Delivery deduplication
//!
//! The platform retries webhook deliveries it thinks failed, so the same
//! message id can arrive more than once. Ids are remembered in insertion
//! order and the oldest are forgotten once the cap is exceeded.

use indexmap::IndexSet;
use std::sync::Mutex;
use tracing::debug;

pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

pub struct DeliveryDeduplicator {
    capacity: usize,
    seen: Mutex<IndexSet<String>>,
}

impl DeliveryDeduplicator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(IndexSet::new()),
        }
    }

    /// Returns true the first time a message id is seen.
    ///
    /// Events without a message id (referrals, postbacks) always pass.
    pub fn should_process(&self, message_id: Option<&str>) -> bool {
        let Some(id) = message_id else {
            return true;
        };

        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !seen.insert(id.to_string()) {
            debug!("Skipping duplicate delivery {}", id);
            return false;
        }

        if seen.len() > self.capacity {
            let excess = seen.len() - self.capacity;
            seen.drain(..excess);
        }

        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeliveryDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
