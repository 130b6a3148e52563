//! Previous-value history used by delta preprocessing steps.

use super::variant::Variant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Collection timestamp with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub ns: i32,
}

impl Timespec {
    pub fn new(sec: i64, ns: i32) -> Self {
        Self { sec, ns }
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            sec: now.timestamp(),
            ns: now.timestamp_subsec_nanos() as i32,
        }
    }

    /// Seconds elapsed since `earlier`, as a float.
    pub fn seconds_since(&self, earlier: &Timespec) -> f64 {
        (self.sec - earlier.sec) as f64 + (self.ns - earlier.ns) as f64 / 1_000_000_000.0
    }
}

impl PartialOrd for Timespec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timespec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sec.cmp(&other.sec).then(self.ns.cmp(&other.ns))
    }
}

/// Last value seen by an item's delta step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryValue {
    pub timestamp: Timespec,
    pub value: Variant,
}

impl HistoryValue {
    /// True until the first observation has been recorded.
    pub fn is_empty(&self) -> bool {
        self.timestamp.sec == 0
    }
}

/// One history entry per item, overwritten in place.
#[derive(Debug, Default)]
pub struct HistoryStore {
    values: HashMap<u64, HistoryValue>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, itemid: u64) -> Option<&HistoryValue> {
        self.values.get(&itemid)
    }

    /// Entry for the item, created empty on first use.
    pub fn entry(&mut self, itemid: u64) -> &mut HistoryValue {
        self.values.entry(itemid).or_default()
    }

    pub fn remove(&mut self, itemid: u64) -> Option<HistoryValue> {
        self.values.remove(&itemid)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_ordering() {
        let a = Timespec::new(10, 500);
        let b = Timespec::new(10, 600);
        let c = Timespec::new(11, 0);
        assert!(a < b);
        assert!(b < c);
        assert!((c.seconds_since(&a) - 0.9999995).abs() < 1e-9);
    }

    #[test]
    fn test_history_store_entry() {
        let mut store = HistoryStore::new();
        assert!(store.entry(1).is_empty());

        let entry = store.entry(1);
        entry.timestamp = Timespec::new(100, 0);
        entry.value = Variant::Ui64(5);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().value, Variant::Ui64(5));
        assert!(store.remove(1).is_some());
        assert!(store.is_empty());
    }
}
