//! Maintenance evaluation and propagation.
//!
//! `update_maintenances` moves cached maintenances between idle and running
//! on every tick. Host and event propagation then derive which hosts and
//! problems are covered by the running ones.

mod events;
mod hosts;
mod period;

pub use events::*;
pub use hosts::*;
pub use period::*;

use crate::cache::{ConfigCache, Maintenance, MaintenancePeriod, MaintenanceState};

use chrono::TimeZone;

/// Current window of a maintenance, or `None` if it should not be running.
///
/// When several periods match, the one ending last wins.
pub fn evaluate_maintenance<Tz: TimeZone>(
    maintenance: &Maintenance,
    periods: &[MaintenancePeriod],
    now: i64,
    tz: &Tz,
) -> Option<Window> {
    if now < maintenance.active_since || now >= maintenance.active_until {
        return None;
    }

    periods
        .iter()
        .filter_map(|period| check_period(maintenance, period, now, tz))
        .max_by_key(|window| window.until)
}

/// Re-evaluate every cached maintenance at `now`.
///
/// Windows are computed from a snapshot taken under the read lock; the
/// transitions are applied under the write lock. Returns true when a
/// maintenance started, stopped or changed its window, or when the
/// configuration changed since the previous evaluation.
pub fn update_maintenances<Tz: TimeZone>(cache: &ConfigCache, now: i64, tz: &Tz) -> bool {
    let (revision, config_changed, snapshot) = cache.with_read(|state| {
        let snapshot: Vec<(Maintenance, Vec<MaintenancePeriod>)> = state
            .maintenances
            .values()
            .map(|m| {
                let periods = m
                    .periodids
                    .iter()
                    .filter_map(|id| state.maintenance_periods.get(id).cloned())
                    .collect();
                (m.clone(), periods)
            })
            .collect();

        (
            state.revision(),
            state.revision() != state.evaluated_revision(),
            snapshot,
        )
    });

    let windows: Vec<(u64, Option<Window>)> = snapshot
        .iter()
        .map(|(m, periods)| (m.id, evaluate_maintenance(m, periods, now, tz)))
        .collect();

    let (started, stopped, modified) = cache.with_write(|state| {
        let (mut started, mut stopped, mut modified) = (0, 0, 0);
        let mut precache = Vec::new();

        for (id, window) in windows {
            // Deleted since the snapshot
            let Some(maintenance) = state.maintenances.get_mut(&id) else {
                continue;
            };

            match (maintenance.state, window) {
                (MaintenanceState::Idle, Some(w)) => {
                    maintenance.state = MaintenanceState::Running;
                    maintenance.running_since = w.since;
                    maintenance.running_until = w.until;
                    precache.extend_from_slice(&maintenance.groupids);
                    started += 1;
                    tracing::debug!("Maintenance: {} started, running until {}", id, w.until);
                }
                (MaintenanceState::Running, None) => {
                    maintenance.state = MaintenanceState::Idle;
                    maintenance.running_since = 0;
                    maintenance.running_until = 0;
                    stopped += 1;
                    tracing::debug!("Maintenance: {} stopped", id);
                }
                (MaintenanceState::Running, Some(w)) => {
                    if maintenance.running_since != w.since || maintenance.running_until != w.until {
                        maintenance.running_since = w.since;
                        maintenance.running_until = w.until;
                        modified += 1;
                    }
                }
                (MaintenanceState::Idle, None) => {}
            }
        }

        for groupid in precache {
            state.precache_nested_groups(groupid);
        }
        state.mark_evaluated(revision);

        (started, stopped, modified)
    });

    if started + stopped + modified > 0 {
        tracing::info!(
            "Maintenance: {} started, {} stopped, {} modified",
            started,
            stopped,
            modified
        );
    }

    config_changed || started + stopped + modified > 0
}

/// Ids of running maintenances, sorted.
pub fn running_maintenance_ids(cache: &ConfigCache) -> Vec<u64> {
    let mut ids: Vec<u64> = cache.with_read(|state| {
        state
            .maintenances
            .values()
            .filter(|m| m.is_running())
            .map(|m| m.id)
            .collect()
    });
    ids.sort_unstable();
    ids
}
