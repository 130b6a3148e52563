//! Incremental synchronization of cached configuration from change rows.
//!
//! Each entity arrives as an ordered stream of rows with all deletes at the
//! end. Rows are applied one at a time; a row that fails to parse is logged
//! and skipped, leaving the cached object as it was.

use super::models::*;
use super::CacheState;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTag {
    Insert,
    Update,
    Delete,
}

/// One change of a configuration row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub rowid: u64,
    #[serde(default)]
    pub columns: Vec<String>,
    pub tag: ChangeTag,
}

impl ChangeRow {
    pub fn insert(rowid: u64, columns: &[&str]) -> Self {
        Self::new(rowid, columns, ChangeTag::Insert)
    }

    pub fn update(rowid: u64, columns: &[&str]) -> Self {
        Self::new(rowid, columns, ChangeTag::Update)
    }

    pub fn delete(rowid: u64, columns: &[&str]) -> Self {
        Self::new(rowid, columns, ChangeTag::Delete)
    }

    fn new(rowid: u64, columns: &[&str], tag: ChangeTag) -> Self {
        Self {
            rowid,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            tag,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("expected {expected} columns, got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error("column {index}: cannot parse \"{value}\"")]
    InvalidValue { index: usize, value: String },
    #[error("column {index}: unknown code {code}")]
    UnknownCode { index: usize, code: i64 },
    #[error("invalid period: {0}")]
    InvalidPeriod(&'static str),
    #[error("maintenance {0} not found")]
    UnknownMaintenance(u64),
    #[error("host group {0} not found")]
    UnknownGroup(u64),
    #[error("non-delete row after delete rows")]
    AfterDelete,
}

/// Outcome counters of a synchronization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Rows that changed the cache.
    pub applied: usize,
    /// Deletes of objects that were not cached.
    pub unchanged: usize,
    /// Malformed or out-of-order rows.
    pub skipped: usize,
}

/// Change rows of every cached entity, applied in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncBatch {
    pub hosts: Vec<ChangeRow>,
    pub host_groups: Vec<ChangeRow>,
    pub host_group_members: Vec<ChangeRow>,
    pub items: Vec<ChangeRow>,
    pub functions: Vec<ChangeRow>,
    pub maintenances: Vec<ChangeRow>,
    pub maintenance_tags: Vec<ChangeRow>,
    pub maintenance_periods: Vec<ChangeRow>,
    pub maintenance_groups: Vec<ChangeRow>,
    pub maintenance_hosts: Vec<ChangeRow>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.host_groups.is_empty()
            && self.host_group_members.is_empty()
            && self.items.is_empty()
            && self.functions.is_empty()
            && self.maintenances.is_empty()
            && self.maintenance_tags.is_empty()
            && self.maintenance_periods.is_empty()
            && self.maintenance_groups.is_empty()
            && self.maintenance_hosts.is_empty()
    }
}

/// Apply a whole batch. `now` initializes newly created hosts.
pub fn apply_batch(state: &mut CacheState, batch: &SyncBatch, now: i64) -> SyncReport {
    let mut report = SyncReport::default();

    apply_rows(state, "host", &batch.hosts, &mut report, |s, r| sync_host(s, r, now));
    apply_rows(state, "host group", &batch.host_groups, &mut report, sync_host_group);
    apply_rows(state, "host group member", &batch.host_group_members, &mut report, sync_host_group_member);
    apply_rows(state, "item", &batch.items, &mut report, sync_item);
    apply_rows(state, "function", &batch.functions, &mut report, sync_function);
    apply_rows(state, "maintenance", &batch.maintenances, &mut report, sync_maintenance);
    apply_rows(state, "maintenance tag", &batch.maintenance_tags, &mut report, sync_maintenance_tag);
    apply_rows(state, "maintenance period", &batch.maintenance_periods, &mut report, sync_maintenance_period);
    apply_rows(state, "maintenance group", &batch.maintenance_groups, &mut report, sync_maintenance_group);
    apply_rows(state, "maintenance host", &batch.maintenance_hosts, &mut report, sync_maintenance_host);

    report
}

/// Apply one entity's row stream. Every row that changed the cache bumps the
/// configuration revision.
pub fn apply_rows<F>(
    state: &mut CacheState,
    entity: &str,
    rows: &[ChangeRow],
    report: &mut SyncReport,
    mut apply: F,
) where
    F: FnMut(&mut CacheState, &ChangeRow) -> Result<bool, SyncError>,
{
    let mut deleting = false;

    for row in rows {
        let result = if row.tag == ChangeTag::Delete {
            deleting = true;
            apply(state, row)
        } else if deleting {
            Err(SyncError::AfterDelete)
        } else {
            apply(state, row)
        };

        match result {
            Ok(true) => {
                state.bump_revision();
                report.applied += 1;
            }
            Ok(false) => report.unchanged += 1,
            Err(e) => {
                tracing::warn!("Sync: skipping {} row {}: {}", entity, row.rowid, e);
                report.skipped += 1;
            }
        }
    }
}

// --- Column parsing ---

fn columns(row: &ChangeRow, expected: usize) -> Result<&[String], SyncError> {
    if row.columns.len() < expected {
        return Err(SyncError::ColumnCount {
            expected,
            got: row.columns.len(),
        });
    }
    Ok(&row.columns)
}

fn parse<T: FromStr>(cols: &[String], index: usize) -> Result<T, SyncError> {
    cols[index]
        .trim()
        .parse()
        .map_err(|_| SyncError::InvalidValue {
            index,
            value: cols[index].clone(),
        })
}

fn parse_code<T>(
    cols: &[String],
    index: usize,
    from_code: impl FnOnce(i64) -> Option<T>,
) -> Result<T, SyncError> {
    let code: i64 = parse(cols, index)?;
    from_code(code).ok_or(SyncError::UnknownCode { index, code })
}

// --- Maintenances ---

/// `[id, type, active_since, active_until, tags_evaltype]`
pub fn sync_maintenance(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        return Ok(remove_maintenance(state, row.rowid));
    }

    let cols = columns(row, 5)?;
    let id: u64 = parse(cols, 0)?;
    let maintenance_type = parse_code(cols, 1, MaintenanceType::from_code)?;
    let active_since: i64 = parse(cols, 2)?;
    let active_until: i64 = parse(cols, 3)?;
    let tags_evaltype = parse_code(cols, 4, TagEvalType::from_code)?;

    let (maintenance, _) = state.maintenances.find_or_create(id, Maintenance::new);
    maintenance.maintenance_type = maintenance_type;
    maintenance.active_since = active_since;
    maintenance.active_until = active_until;
    maintenance.tags_evaltype = tags_evaltype;

    Ok(true)
}

fn remove_maintenance(state: &mut CacheState, id: u64) -> bool {
    let Some(maintenance) = state.maintenances.remove(&id) else {
        return false;
    };

    for tagid in &maintenance.tagids {
        state.maintenance_tags.remove(tagid);
    }
    for periodid in &maintenance.periodids {
        state.maintenance_periods.remove(periodid);
    }

    tracing::debug!(
        "Sync: removed maintenance {} with {} tags and {} periods",
        id,
        maintenance.tagids.len(),
        maintenance.periodids.len()
    );
    true
}

/// `[tagid, maintenanceid, operator, tag, value]`
pub fn sync_maintenance_tag(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        let Some(tag) = state.maintenance_tags.remove(&row.rowid) else {
            return Ok(false);
        };
        if let Some(maintenance) = state.maintenances.get_mut(&tag.maintenanceid) {
            maintenance.tagids.retain(|id| *id != tag.id);
        }
        return Ok(true);
    }

    let cols = columns(row, 5)?;
    let id: u64 = parse(cols, 0)?;
    let maintenanceid: u64 = parse(cols, 1)?;
    let operator = parse_code(cols, 2, TagOperator::from_code)?;

    if !state.maintenances.contains(&maintenanceid) {
        return Err(SyncError::UnknownMaintenance(maintenanceid));
    }

    let tag = MaintenanceTag {
        id,
        maintenanceid,
        operator,
        tag: cols[3].clone(),
        value: cols[4].clone(),
    };

    // Unlink first: the tag may have moved or its name may have changed.
    if let Some(previous) = state.maintenance_tags.insert(id, tag) {
        if let Some(owner) = state.maintenances.get_mut(&previous.maintenanceid) {
            owner.tagids.retain(|t| *t != id);
        }
    }

    let tags = &state.maintenance_tags;
    if let Some(maintenance) = state.maintenances.get_mut(&maintenanceid) {
        let key = tags.get(&id).map(|t| (t.tag.as_str(), t.id));
        let pos = maintenance
            .tagids
            .partition_point(|other| tags.get(other).map(|t| (t.tag.as_str(), t.id)) < key);
        maintenance.tagids.insert(pos, id);
    }

    Ok(true)
}

/// `[periodid, type, every, month, dayofweek, day, start_time, period, start_date, maintenanceid]`
pub fn sync_maintenance_period(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        let Some(period) = state.maintenance_periods.remove(&row.rowid) else {
            return Ok(false);
        };
        if let Some(maintenance) = state.maintenances.get_mut(&period.maintenanceid) {
            maintenance.periodids.retain(|id| *id != period.id);
        }
        return Ok(true);
    }

    let cols = columns(row, 10)?;
    let period = MaintenancePeriod {
        id: parse(cols, 0)?,
        period_type: parse_code(cols, 1, PeriodType::from_code)?,
        every: parse(cols, 2)?,
        month: parse(cols, 3)?,
        dayofweek: parse(cols, 4)?,
        day: parse(cols, 5)?,
        start_time: parse(cols, 6)?,
        period: parse(cols, 7)?,
        start_date: parse(cols, 8)?,
        maintenanceid: parse(cols, 9)?,
    };
    validate_period(&period)?;

    if !state.maintenances.contains(&period.maintenanceid) {
        return Err(SyncError::UnknownMaintenance(period.maintenanceid));
    }

    let (id, maintenanceid) = (period.id, period.maintenanceid);
    if let Some(previous) = state.maintenance_periods.insert(id, period) {
        if previous.maintenanceid != maintenanceid {
            if let Some(owner) = state.maintenances.get_mut(&previous.maintenanceid) {
                owner.periodids.retain(|p| *p != id);
            }
        }
    }

    if let Some(maintenance) = state.maintenances.get_mut(&maintenanceid) {
        if !maintenance.periodids.contains(&id) {
            maintenance.periodids.push(id);
        }
    }

    Ok(true)
}

fn validate_period(period: &MaintenancePeriod) -> Result<(), SyncError> {
    match period.period_type {
        PeriodType::OneTime => {}
        PeriodType::Daily => {
            if period.every == 0 {
                return Err(SyncError::InvalidPeriod("daily period with zero interval"));
            }
        }
        PeriodType::Weekly => {
            if period.every == 0 {
                return Err(SyncError::InvalidPeriod("weekly period with zero interval"));
            }
            if period.dayofweek & 0x7f == 0 {
                return Err(SyncError::InvalidPeriod("weekly period without week days"));
            }
        }
        PeriodType::Monthly => {
            if period.month & 0xfff == 0 {
                return Err(SyncError::InvalidPeriod("monthly period without months"));
            }
            if period.day == 0 {
                if period.week_of_month().is_none() {
                    return Err(SyncError::InvalidPeriod("week of month out of range"));
                }
                if period.dayofweek & 0x7f == 0 {
                    return Err(SyncError::InvalidPeriod("monthly period without week days"));
                }
            } else if period.day > 31 {
                return Err(SyncError::InvalidPeriod("day of month out of range"));
            }
        }
    }
    Ok(())
}

/// `[maintenanceid, groupid]`
pub fn sync_maintenance_group(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    let cols = columns(row, 2)?;
    let maintenanceid: u64 = parse(cols, 0)?;
    let groupid: u64 = parse(cols, 1)?;

    if row.tag == ChangeTag::Delete {
        return Ok(state
            .maintenances
            .get_mut(&maintenanceid)
            .map(|m| remove_sorted(&mut m.groupids, groupid))
            .unwrap_or(false));
    }

    let maintenance = state
        .maintenances
        .get_mut(&maintenanceid)
        .ok_or(SyncError::UnknownMaintenance(maintenanceid))?;
    insert_sorted(&mut maintenance.groupids, groupid);
    Ok(true)
}

/// `[maintenanceid, hostid]`
pub fn sync_maintenance_host(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    let cols = columns(row, 2)?;
    let maintenanceid: u64 = parse(cols, 0)?;
    let hostid: u64 = parse(cols, 1)?;

    if row.tag == ChangeTag::Delete {
        return Ok(state
            .maintenances
            .get_mut(&maintenanceid)
            .map(|m| remove_sorted(&mut m.hostids, hostid))
            .unwrap_or(false));
    }

    let maintenance = state
        .maintenances
        .get_mut(&maintenanceid)
        .ok_or(SyncError::UnknownMaintenance(maintenanceid))?;
    insert_sorted(&mut maintenance.hostids, hostid);
    Ok(true)
}

// --- Hosts, groups, items, functions ---

/// `[hostid, status]`, optionally followed by
/// `[maintenanceid, maintenance_status, maintenance_type, maintenance_from]`
/// which only seed a newly created host. A partial seed is rejected.
pub fn sync_host(state: &mut CacheState, row: &ChangeRow, now: i64) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        if state.hosts.remove(&row.rowid).is_none() {
            return Ok(false);
        }
        state.remove_host_from_groups(row.rowid);
        return Ok(true);
    }

    let cols = columns(row, 2)?;
    if cols.len() > 2 && cols.len() < 6 {
        return Err(SyncError::ColumnCount {
            expected: 6,
            got: cols.len(),
        });
    }
    let hostid: u64 = parse(cols, 0)?;
    let status = parse_code(cols, 1, HostStatus::from_code)?;

    let seed = if cols.len() >= 6 {
        Some((
            parse::<u64>(cols, 2)?,
            parse_code(cols, 3, HostMaintenanceStatus::from_code)?,
            parse_code(cols, 4, MaintenanceType::from_code)?,
            parse::<i64>(cols, 5)?,
        ))
    } else {
        None
    };

    let (host, found) = state
        .hosts
        .find_or_create(hostid, |id| Host::new(id, status, now));
    host.status = status;

    if !found {
        if let Some((maintenanceid, maintenance_status, maintenance_type, maintenance_from)) = seed {
            host.maintenanceid = maintenanceid;
            host.maintenance_status = maintenance_status;
            host.maintenance_type = maintenance_type;
            host.maintenance_from = maintenance_from;
        }
    }

    Ok(true)
}

/// `[groupid, name]`
pub fn sync_host_group(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        return Ok(state.remove_group(row.rowid));
    }

    let cols = columns(row, 2)?;
    let groupid: u64 = parse(cols, 0)?;
    let name = cols[1].trim().to_string();
    if name.is_empty() {
        return Err(SyncError::InvalidValue {
            index: 1,
            value: cols[1].clone(),
        });
    }

    state.upsert_group(groupid, name);
    Ok(true)
}

/// `[groupid, hostid]`
pub fn sync_host_group_member(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    let cols = columns(row, 2)?;
    let groupid: u64 = parse(cols, 0)?;
    let hostid: u64 = parse(cols, 1)?;

    if row.tag == ChangeTag::Delete {
        return Ok(state.remove_group_member(groupid, hostid));
    }

    if state.add_group_member(groupid, hostid) {
        Ok(true)
    } else {
        Err(SyncError::UnknownGroup(groupid))
    }
}

/// `[itemid, hostid]`
pub fn sync_item(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        return Ok(state.items.remove(&row.rowid).is_some());
    }

    let cols = columns(row, 2)?;
    let itemid: u64 = parse(cols, 0)?;
    let hostid: u64 = parse(cols, 1)?;
    state.items.insert(itemid, Item { itemid, hostid });
    Ok(true)
}

/// `[functionid, itemid]`
pub fn sync_function(state: &mut CacheState, row: &ChangeRow) -> Result<bool, SyncError> {
    if row.tag == ChangeTag::Delete {
        return Ok(state.functions.remove(&row.rowid).is_some());
    }

    let cols = columns(row, 2)?;
    let functionid: u64 = parse(cols, 0)?;
    let itemid: u64 = parse(cols, 1)?;
    state.functions.insert(functionid, Function { functionid, itemid });
    Ok(true)
}
