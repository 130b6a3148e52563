//! Process-wide configuration cache.
//!
//! All cached objects live in one `CacheState` behind a reader/writer lock.
//! Callers reach it only through `ConfigCache::with_read` and
//! `ConfigCache::with_write`, so a lock can never outlive its scope.

mod feed;
mod flags;
mod models;
mod registry;
mod sync;

pub use feed::*;
pub use flags::*;
pub use models::*;
pub use registry::*;
pub use sync::*;

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Cached configuration objects. Cross references are ids.
#[derive(Debug, Default)]
pub struct CacheState {
    pub maintenances: Registry<u64, Maintenance>,
    pub maintenance_tags: Registry<u64, MaintenanceTag>,
    pub maintenance_periods: Registry<u64, MaintenancePeriod>,
    pub hosts: Registry<u64, Host>,
    pub items: Registry<u64, Item>,
    pub functions: Registry<u64, Function>,
    groups: Registry<u64, HostGroup>,
    /// Group name to ids, ordered so subgroups form a contiguous range.
    /// Names are not unique.
    group_names: BTreeMap<String, Vec<u64>>,
    revision: u64,
    evaluated_revision: u64,
}

impl CacheState {
    // --- Configuration revision ---

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Revision last seen by the maintenance evaluation.
    pub fn evaluated_revision(&self) -> u64 {
        self.evaluated_revision
    }

    pub(crate) fn mark_evaluated(&mut self, revision: u64) {
        self.evaluated_revision = self.evaluated_revision.max(revision);
    }

    // --- Host groups ---

    pub fn group(&self, groupid: u64) -> Option<&HostGroup> {
        self.groups.get(&groupid)
    }

    pub fn groups(&self) -> impl Iterator<Item = &HostGroup> {
        self.groups.values()
    }

    pub(crate) fn upsert_group(&mut self, groupid: u64, name: String) {
        let (group, _) = self.groups.find_or_create(groupid, |id| HostGroup {
            groupid: id,
            name: String::new(),
            hostids: Vec::new(),
            nested_groupids: None,
        });

        if group.name != name {
            let old = std::mem::replace(&mut group.name, name.clone());
            unindex_group_name(&mut self.group_names, &old, groupid);
            insert_sorted(self.group_names.entry(name).or_default(), groupid);
        }

        self.invalidate_nested_groups();
    }

    pub(crate) fn remove_group(&mut self, groupid: u64) -> bool {
        let Some(group) = self.groups.remove(&groupid) else {
            return false;
        };
        unindex_group_name(&mut self.group_names, &group.name, groupid);
        self.invalidate_nested_groups();
        true
    }

    /// Returns false when the group is not cached.
    pub(crate) fn add_group_member(&mut self, groupid: u64, hostid: u64) -> bool {
        match self.groups.get_mut(&groupid) {
            Some(group) => {
                insert_sorted(&mut group.hostids, hostid);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_group_member(&mut self, groupid: u64, hostid: u64) -> bool {
        self.groups
            .get_mut(&groupid)
            .map(|g| remove_sorted(&mut g.hostids, hostid))
            .unwrap_or(false)
    }

    pub(crate) fn remove_host_from_groups(&mut self, hostid: u64) {
        for group in self.groups.values_mut() {
            remove_sorted(&mut group.hostids, hostid);
        }
    }

    /// Ids of a group and all groups nested under it, sorted.
    ///
    /// Uses the memoized result when one was cached.
    pub fn nested_groupids(&self, groupid: u64) -> Vec<u64> {
        match self.groups.get(&groupid) {
            Some(group) => match &group.nested_groupids {
                Some(ids) => ids.clone(),
                None => self.resolve_nested_groups(group),
            },
            None => Vec::new(),
        }
    }

    /// Memoize the nested group ids of `groupid`.
    pub fn precache_nested_groups(&mut self, groupid: u64) {
        let ids = match self.groups.get(&groupid) {
            Some(group) if group.nested_groupids.is_none() => self.resolve_nested_groups(group),
            _ => return,
        };
        if let Some(group) = self.groups.get_mut(&groupid) {
            group.nested_groupids = Some(ids);
        }
    }

    fn invalidate_nested_groups(&mut self) {
        for group in self.groups.values_mut() {
            group.nested_groupids = None;
        }
    }

    fn resolve_nested_groups(&self, group: &HostGroup) -> Vec<u64> {
        let prefix = format!("{}/", group.name);
        let mut ids = vec![group.groupid];

        for (name, groupids) in self.group_names.range(prefix.clone()..) {
            if !name.starts_with(&prefix) {
                break;
            }
            ids.extend_from_slice(groupids);
        }

        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Hosts covered by a maintenance: direct links plus members of its
    /// groups and their nested groups. Sorted, unique.
    pub fn maintenance_hostids(&self, maintenance: &Maintenance) -> Vec<u64> {
        let mut hostids = maintenance.hostids.clone();

        for groupid in &maintenance.groupids {
            for nested in self.nested_groupids(*groupid) {
                if let Some(group) = self.groups.get(&nested) {
                    hostids.extend_from_slice(&group.hostids);
                }
            }
        }

        hostids.sort_unstable();
        hostids.dedup();
        hostids
    }

    /// Host of a trigger function, through its item.
    pub fn function_hostid(&self, functionid: u64) -> Option<u64> {
        let function = self.functions.get(&functionid)?;
        self.items.get(&function.itemid).map(|item| item.hostid)
    }
}

fn unindex_group_name(group_names: &mut BTreeMap<String, Vec<u64>>, name: &str, groupid: u64) {
    if let Some(groupids) = group_names.get_mut(name) {
        remove_sorted(groupids, groupid);
        if groupids.is_empty() {
            group_names.remove(name);
        }
    }
}

/// Shared configuration cache with per-consumer update flags.
#[derive(Debug)]
pub struct ConfigCache {
    state: RwLock<CacheState>,
    flags: UpdateFlags,
}

impl ConfigCache {
    pub fn new(consumers: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            flags: UpdateFlags::new(consumers),
        }
    }

    /// Run `f` with shared access to the cached state.
    pub fn with_read<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        let state = self.state.read();
        f(&state)
    }

    /// Run `f` with exclusive access to the cached state.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self.state.write();
        f(&mut state)
    }

    pub fn flags(&self) -> &UpdateFlags {
        &self.flags
    }

    /// Apply a synchronization batch under one write lock.
    ///
    /// Raises the update flags of all consumers when any row changed the cache.
    pub fn apply_sync(&self, batch: &SyncBatch, now: i64) -> SyncReport {
        let report = self.with_write(|state| apply_batch(state, batch, now));

        if report.applied > 0 {
            self.flags.set_update_flags();
        }

        tracing::info!(
            "ConfigCache: sync applied {} rows, {} unchanged, {} skipped",
            report.applied,
            report.unchanged,
            report.skipped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_batch() -> SyncBatch {
        SyncBatch {
            hosts: vec![
                ChangeRow::insert(1, &["1", "0"]),
                ChangeRow::insert(2, &["2", "0"]),
                ChangeRow::insert(3, &["3", "0"]),
            ],
            host_groups: vec![
                ChangeRow::insert(10, &["10", "Linux"]),
                ChangeRow::insert(11, &["11", "Linux/DB"]),
                ChangeRow::insert(12, &["12", "Linux/DB/Replica"]),
                ChangeRow::insert(13, &["13", "LinuxOther"]),
            ],
            host_group_members: vec![
                ChangeRow::insert(0, &["10", "1"]),
                ChangeRow::insert(0, &["12", "2"]),
                ChangeRow::insert(0, &["13", "3"]),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_nested_groups_by_name() {
        let cache = ConfigCache::new(1);
        cache.apply_sync(&group_batch(), 0);

        cache.with_read(|state| {
            assert_eq!(state.nested_groupids(10), vec![10, 11, 12]);
            assert_eq!(state.nested_groupids(11), vec![11, 12]);
            assert_eq!(state.nested_groupids(13), vec![13]);
            assert!(state.nested_groupids(99).is_empty());
        });
    }

    #[test]
    fn test_nested_cache_invalidated_on_group_rows() {
        let cache = ConfigCache::new(1);
        cache.apply_sync(&group_batch(), 0);

        cache.with_write(|state| state.precache_nested_groups(10));
        cache.with_read(|state| {
            assert_eq!(state.group(10).unwrap().nested_groupids, Some(vec![10, 11, 12]));
        });

        cache.apply_sync(
            &SyncBatch {
                host_groups: vec![ChangeRow::update(13, &["13", "Linux/Other"])],
                ..Default::default()
            },
            0,
        );

        cache.with_read(|state| {
            assert_eq!(state.group(10).unwrap().nested_groupids, None);
            assert_eq!(state.nested_groupids(10), vec![10, 11, 12, 13]);
        });
    }

    #[test]
    fn test_duplicate_group_names() {
        let cache = ConfigCache::new(1);
        let mut batch = group_batch();
        batch.host_groups[2] = ChangeRow::insert(12, &["12", "Linux/DB"]);
        cache.apply_sync(&batch, 0);

        cache.with_read(|state| {
            assert_eq!(state.nested_groupids(10), vec![10, 11, 12]);
        });

        // Deleting one of the two keeps the other indexed
        cache.apply_sync(
            &SyncBatch {
                host_groups: vec![ChangeRow::delete(12, &[])],
                ..Default::default()
            },
            0,
        );
        cache.with_read(|state| {
            assert_eq!(state.nested_groupids(10), vec![10, 11]);
        });

        // So does renaming
        cache.apply_sync(
            &SyncBatch {
                host_groups: vec![ChangeRow::insert(12, &["12", "Linux/DB"])],
                ..Default::default()
            },
            0,
        );
        cache.apply_sync(
            &SyncBatch {
                host_groups: vec![ChangeRow::update(11, &["11", "Windows/DB"])],
                ..Default::default()
            },
            0,
        );
        cache.with_read(|state| {
            assert_eq!(state.nested_groupids(10), vec![10, 12]);
        });
    }

    #[test]
    fn test_maintenance_hostids() {
        let cache = ConfigCache::new(1);
        let mut batch = group_batch();
        batch.maintenances = vec![ChangeRow::insert(1, &["1", "0", "0", "100", "0"])];
        batch.maintenance_groups = vec![ChangeRow::insert(0, &["1", "11"])];
        batch.maintenance_hosts = vec![ChangeRow::insert(0, &["1", "3"])];
        cache.apply_sync(&batch, 0);

        cache.with_read(|state| {
            let m = state.maintenances.get(&1).unwrap();
            assert_eq!(state.maintenance_hostids(m), vec![2, 3]);
        });
    }

    #[test]
    fn test_apply_sync_sets_flags() {
        let cache = ConfigCache::new(2);
        cache.apply_sync(&SyncBatch::default(), 0);
        assert!(!cache.flags().check_update_flags());

        let report = cache.apply_sync(&group_batch(), 0);
        assert_eq!(report.applied, 10);
        assert!(cache.flags().check_update_flag(0));
        assert!(cache.flags().check_update_flag(1));
    }

    #[test]
    fn test_function_hostid() {
        let cache = ConfigCache::new(1);
        cache.apply_sync(
            &SyncBatch {
                items: vec![ChangeRow::insert(5, &["5", "1"])],
                functions: vec![ChangeRow::insert(7, &["7", "5"]), ChangeRow::insert(8, &["8", "6"])],
                ..Default::default()
            },
            0,
        );

        cache.with_read(|state| {
            assert_eq!(state.function_hostid(7), Some(1));
            assert_eq!(state.function_hostid(8), None);
        });
    }
}
