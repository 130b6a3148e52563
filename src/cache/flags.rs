//! Per-consumer configuration change flags.
//!
//! A single version counter is bumped on every configuration change; each
//! consumer remembers the last version it handled. A consumer's flag is set
//! while the two differ.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct UpdateFlags {
    version: AtomicU64,
    seen: Vec<AtomicU64>,
}

impl UpdateFlags {
    pub fn new(consumers: usize) -> Self {
        Self {
            version: AtomicU64::new(0),
            seen: (0..consumers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn consumers(&self) -> usize {
        self.seen.len()
    }

    /// Mark the configuration changed for every consumer.
    pub fn set_update_flags(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// True when `consumer` has not handled the latest change.
    ///
    /// Unknown consumers never have a pending flag.
    pub fn check_update_flag(&self, consumer: usize) -> bool {
        match self.seen.get(consumer) {
            Some(seen) => seen.load(Ordering::Acquire) != self.version.load(Ordering::Acquire),
            None => false,
        }
    }

    /// Acknowledge the latest change for `consumer` only.
    pub fn reset_update_flag(&self, consumer: usize) {
        if let Some(seen) = self.seen.get(consumer) {
            seen.store(self.version.load(Ordering::Acquire), Ordering::Release);
        }
    }

    /// True when any consumer has a pending change.
    pub fn check_update_flags(&self) -> bool {
        let version = self.version.load(Ordering::Acquire);
        self.seen
            .iter()
            .any(|seen| seen.load(Ordering::Acquire) != version)
    }
}
