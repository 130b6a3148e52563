//! Host maintenance propagation.

use crate::cache::{ConfigCache, HostMaintenanceStatus, Maintenance, MaintenanceType};

use serde::Serialize;
use std::collections::HashMap;
use std::ops::BitOr;

/// Host maintenance fields changed by a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangedFields(u32);

impl ChangedFields {
    pub const MAINTENANCEID: Self = Self(0x01);
    pub const STATUS: Self = Self(0x02);
    pub const FROM: Self = Self(0x04);
    pub const TYPE: Self = Self(0x08);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangedFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// New maintenance fields of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostMaintenanceDiff {
    pub hostid: u64,
    pub flags: ChangedFields,
    pub maintenanceid: u64,
    pub maintenance_status: HostMaintenanceStatus,
    pub maintenance_type: MaintenanceType,
    pub maintenance_from: i64,
}

/// Maintenance chosen for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAssignment {
    pub maintenanceid: u64,
    pub maintenance_type: MaintenanceType,
    pub running_since: i64,
}

/// Record `maintenance` for `hostid`. The first assignment is kept unless a
/// no-data maintenance replaces a normal one.
pub fn assign_maintenance_to_host(
    assignments: &mut HashMap<u64, HostAssignment>,
    hostid: u64,
    maintenance: &Maintenance,
) {
    let candidate = HostAssignment {
        maintenanceid: maintenance.id,
        maintenance_type: maintenance.maintenance_type,
        running_since: maintenance.running_since,
    };

    match assignments.get_mut(&hostid) {
        None => {
            assignments.insert(hostid, candidate);
        }
        Some(current) => {
            if current.maintenance_type == MaintenanceType::Normal
                && candidate.maintenance_type == MaintenanceType::NoData
            {
                *current = candidate;
            }
        }
    }
}

/// Compute the host diffs implied by the given running maintenances.
///
/// Proxies are never put into maintenance. Diffs are ordered by host id.
pub fn get_host_maintenance_updates(
    cache: &ConfigCache,
    maintenanceids: &[u64],
) -> Vec<HostMaintenanceDiff> {
    cache.with_read(|state| {
        let mut assignments = HashMap::new();

        for id in maintenanceids {
            let Some(maintenance) = state.maintenances.get(id) else {
                continue;
            };
            if !maintenance.is_running() {
                continue;
            }
            for hostid in state.maintenance_hostids(maintenance) {
                assign_maintenance_to_host(&mut assignments, hostid, maintenance);
            }
        }

        let mut diffs: Vec<HostMaintenanceDiff> = state
            .hosts
            .values()
            .filter(|host| !host.status.is_proxy())
            .filter_map(|host| {
                let (maintenanceid, status, maintenance_type, from) =
                    match assignments.get(&host.hostid) {
                        Some(a) => (
                            a.maintenanceid,
                            HostMaintenanceStatus::On,
                            a.maintenance_type,
                            a.running_since,
                        ),
                        None => (0, HostMaintenanceStatus::Off, MaintenanceType::Normal, 0),
                    };

                let mut flags = ChangedFields::default();
                if host.maintenanceid != maintenanceid {
                    flags = flags | ChangedFields::MAINTENANCEID;
                }
                if host.maintenance_status != status {
                    flags = flags | ChangedFields::STATUS;
                }
                if host.maintenance_from != from {
                    flags = flags | ChangedFields::FROM;
                }
                if host.maintenance_type != maintenance_type {
                    flags = flags | ChangedFields::TYPE;
                }

                (!flags.is_empty()).then(|| HostMaintenanceDiff {
                    hostid: host.hostid,
                    flags,
                    maintenanceid,
                    maintenance_status: status,
                    maintenance_type,
                    maintenance_from: from,
                })
            })
            .collect();

        diffs.sort_by_key(|diff| diff.hostid);
        diffs
    })
}

/// Apply host diffs to the cache. Returns the number of hosts updated.
///
/// A host leaving a no-data maintenance expects data again from `now`.
pub fn flush_host_maintenance_updates(
    cache: &ConfigCache,
    diffs: &[HostMaintenanceDiff],
    now: i64,
) -> usize {
    if diffs.is_empty() {
        return 0;
    }

    let updated = cache.with_write(|state| {
        let mut updated = 0;

        for diff in diffs {
            let Some(host) = state.hosts.get_mut(&diff.hostid) else {
                continue;
            };

            let leaves_nodata = host.maintenance_status == HostMaintenanceStatus::On
                && host.maintenance_type == MaintenanceType::NoData
                && (diff.maintenance_status == HostMaintenanceStatus::Off
                    || diff.maintenance_type == MaintenanceType::Normal);

            if diff.flags.contains(ChangedFields::MAINTENANCEID) {
                host.maintenanceid = diff.maintenanceid;
            }
            if diff.flags.contains(ChangedFields::STATUS) {
                host.maintenance_status = diff.maintenance_status;
            }
            if diff.flags.contains(ChangedFields::FROM) {
                host.maintenance_from = diff.maintenance_from;
            }
            if diff.flags.contains(ChangedFields::TYPE) {
                host.maintenance_type = diff.maintenance_type;
            }
            if leaves_nodata {
                host.data_expected_from = now;
            }

            updated += 1;
        }

        updated
    });

    tracing::debug!("Maintenance: updated maintenance fields of {} hosts", updated);
    updated
}
