//! Cached configuration entities.

use serde::Serialize;

/// How a running maintenance treats its hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum MaintenanceType {
    /// Data is collected, problems are suppressed.
    #[default]
    Normal,
    /// No data is expected while the maintenance runs.
    NoData,
}

impl MaintenanceType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MaintenanceType::Normal),
            1 => Some(MaintenanceType::NoData),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum TagEvalType {
    /// Different tag names are AND-ed, equal tag names OR-ed.
    #[default]
    AndOr,
    /// Any matching tag is enough.
    Or,
}

impl TagEvalType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TagEvalType::AndOr),
            2 => Some(TagEvalType::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum MaintenanceState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TagOperator {
    /// Event tag value must equal the maintenance tag value.
    Equal,
    /// Event tag value must contain the maintenance tag value.
    Like,
}

impl TagOperator {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TagOperator::Equal),
            2 => Some(TagOperator::Like),
            _ => None,
        }
    }

    pub fn matches(self, pattern: &str, value: &str) -> bool {
        match self {
            TagOperator::Equal => value == pattern,
            TagOperator::Like => value.contains(pattern),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodType {
    OneTime,
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PeriodType::OneTime),
            2 => Some(PeriodType::Daily),
            3 => Some(PeriodType::Weekly),
            4 => Some(PeriodType::Monthly),
            _ => None,
        }
    }
}

/// Which occurrence of a weekday in the month a monthly period selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeekOfMonth {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl WeekOfMonth {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(WeekOfMonth::First),
            2 => Some(WeekOfMonth::Second),
            3 => Some(WeekOfMonth::Third),
            4 => Some(WeekOfMonth::Fourth),
            5 => Some(WeekOfMonth::Last),
            _ => None,
        }
    }

    /// Ordinal (1-based) for the fixed occurrences, `None` for `Last`.
    pub fn ordinal(self) -> Option<u32> {
        match self {
            WeekOfMonth::First => Some(1),
            WeekOfMonth::Second => Some(2),
            WeekOfMonth::Third => Some(3),
            WeekOfMonth::Fourth => Some(4),
            WeekOfMonth::Last => None,
        }
    }
}

/// A maintenance definition and its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Maintenance {
    pub id: u64,
    pub maintenance_type: MaintenanceType,
    pub active_since: i64,
    pub active_until: i64,
    pub tags_evaltype: TagEvalType,
    pub state: MaintenanceState,
    pub running_since: i64,
    pub running_until: i64,
    /// Sorted, unique.
    pub groupids: Vec<u64>,
    /// Sorted, unique.
    pub hostids: Vec<u64>,
    /// Ordered by tag name, then tag id.
    pub tagids: Vec<u64>,
    pub periodids: Vec<u64>,
}

impl Maintenance {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            maintenance_type: MaintenanceType::Normal,
            active_since: 0,
            active_until: 0,
            tags_evaltype: TagEvalType::AndOr,
            state: MaintenanceState::Idle,
            running_since: 0,
            running_until: 0,
            groupids: Vec::new(),
            hostids: Vec::new(),
            tagids: Vec::new(),
            periodids: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == MaintenanceState::Running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceTag {
    pub id: u64,
    pub maintenanceid: u64,
    pub operator: TagOperator,
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenancePeriod {
    pub id: u64,
    pub maintenanceid: u64,
    pub period_type: PeriodType,
    pub every: u32,
    /// Bit 0 is January.
    pub month: u32,
    /// Bit 0 is Monday.
    pub dayofweek: u32,
    pub day: u32,
    /// Seconds after local midnight.
    pub start_time: u32,
    /// Duration in seconds.
    pub period: u32,
    pub start_date: i64,
}

impl MaintenancePeriod {
    /// Week-of-month selector for monthly periods keyed by weekday.
    pub fn week_of_month(&self) -> Option<WeekOfMonth> {
        WeekOfMonth::from_code(self.every)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostStatus {
    Monitored,
    NotMonitored,
    ProxyActive,
    ProxyPassive,
}

impl HostStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HostStatus::Monitored),
            1 => Some(HostStatus::NotMonitored),
            5 => Some(HostStatus::ProxyActive),
            6 => Some(HostStatus::ProxyPassive),
            _ => None,
        }
    }

    pub fn is_proxy(self) -> bool {
        matches!(self, HostStatus::ProxyActive | HostStatus::ProxyPassive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum HostMaintenanceStatus {
    #[default]
    Off,
    On,
}

impl HostMaintenanceStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HostMaintenanceStatus::Off),
            1 => Some(HostMaintenanceStatus::On),
            _ => None,
        }
    }
}

/// A monitored host with its maintenance fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Host {
    pub hostid: u64,
    pub status: HostStatus,
    pub maintenanceid: u64,
    pub maintenance_status: HostMaintenanceStatus,
    pub maintenance_type: MaintenanceType,
    pub maintenance_from: i64,
    /// Start of the interval in which missing data is a problem again.
    pub data_expected_from: i64,
}

impl Host {
    pub fn new(hostid: u64, status: HostStatus, now: i64) -> Self {
        Self {
            hostid,
            status,
            maintenanceid: 0,
            maintenance_status: HostMaintenanceStatus::Off,
            maintenance_type: MaintenanceType::Normal,
            maintenance_from: 0,
            data_expected_from: now,
        }
    }
}

/// Host group; `A/B` is nested under `A`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostGroup {
    pub groupid: u64,
    pub name: String,
    /// Sorted, unique.
    pub hostids: Vec<u64>,
    /// Memoized ids of this group and all nested groups.
    #[serde(skip)]
    pub nested_groupids: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Item {
    pub itemid: u64,
    pub hostid: u64,
}

/// Function of a trigger expression referencing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Function {
    pub functionid: u64,
    pub itemid: u64,
}

/// Insert into a sorted id list, keeping it unique. Returns false if present.
pub fn insert_sorted(ids: &mut Vec<u64>, id: u64) -> bool {
    match ids.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            ids.insert(pos, id);
            true
        }
    }
}

/// Remove from a sorted id list. Returns false if absent.
pub fn remove_sorted(ids: &mut Vec<u64>, id: u64) -> bool {
    match ids.binary_search(&id) {
        Ok(pos) => {
            ids.remove(pos);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_id_lists() {
        let mut ids = Vec::new();
        assert!(insert_sorted(&mut ids, 5));
        assert!(insert_sorted(&mut ids, 1));
        assert!(!insert_sorted(&mut ids, 5));
        assert_eq!(ids, vec![1, 5]);
        assert!(remove_sorted(&mut ids, 1));
        assert!(!remove_sorted(&mut ids, 1));
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_tag_operator() {
        assert!(TagOperator::Like.matches("prod", "eu-prod-1"));
        assert!(!TagOperator::Equal.matches("prod", "eu-prod-1"));
        assert!(TagOperator::Equal.matches("", ""));
    }

    #[test]
    fn test_codes() {
        assert_eq!(PeriodType::from_code(1), None);
        assert_eq!(TagEvalType::from_code(2), Some(TagEvalType::Or));
        assert_eq!(WeekOfMonth::from_code(5), Some(WeekOfMonth::Last));
        assert_eq!(WeekOfMonth::Last.ordinal(), None);
        assert!(HostStatus::from_code(6).unwrap().is_proxy());
    }
}
