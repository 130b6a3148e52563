//! Event maintenance propagation.
//!
//! Maintenances covering an event's hosts are collected under the read lock;
//! tag filtering runs on private copies after the lock is released.

use crate::cache::{ConfigCache, MaintenanceTag, TagEvalType};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTag {
    pub tag: String,
    pub value: String,
}

impl EventTag {
    pub fn new(tag: &str, value: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: value.to_string(),
        }
    }
}

/// Suppression query of one problem event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    pub eventid: u64,
    /// Trigger functions of the event's expression.
    pub functionids: Vec<u64>,
    pub tags: Vec<EventTag>,
    /// Matched `(maintenanceid, running_until)` pairs.
    #[serde(default)]
    pub maintenances: Vec<(u64, i64)>,
}

/// Lock-free copy of a running maintenance.
#[derive(Debug)]
struct EventMaintenance {
    maintenanceid: u64,
    running_until: i64,
    tags_evaltype: TagEvalType,
    /// Ordered by tag name.
    tags: Vec<MaintenanceTag>,
}

/// Match event tags against maintenance tags. Both lists must be ordered by
/// tag name.
///
/// Same-named tags form a range in each list; a range matches when any
/// maintenance tag accepts any event tag value. With `AndOr` every
/// maintenance tag name needs a matching range, with `Or` one is enough.
/// A maintenance without tags matches every event.
pub fn match_tags(evaltype: TagEvalType, maintenance_tags: &[MaintenanceTag], event_tags: &[EventTag]) -> bool {
    if maintenance_tags.is_empty() {
        return true;
    }

    let (mut i, mut j) = (0, 0);

    while i < maintenance_tags.len() {
        let name = maintenance_tags[i].tag.as_str();
        let i_end = i + maintenance_tags[i..].iter().take_while(|t| t.tag == name).count();

        while j < event_tags.len() && event_tags[j].tag.as_str() < name {
            j += 1;
        }
        let j_end = j + event_tags[j..].iter().take_while(|t| t.tag == name).count();

        let matched = maintenance_tags[i..i_end].iter().any(|m| {
            event_tags[j..j_end]
                .iter()
                .any(|e| m.operator.matches(&m.value, &e.value))
        });

        match evaltype {
            TagEvalType::AndOr if !matched => return false,
            TagEvalType::Or if matched => return true,
            _ => {}
        }

        i = i_end;
        j = j_end;
    }

    evaltype == TagEvalType::AndOr
}

/// Add running maintenances covering each query's hosts and accepting its
/// tags to `query.maintenances`.
///
/// Maintenances already recorded for a query are not added again. Returns
/// true if any query gained a maintenance.
pub fn get_event_maintenances(
    cache: &ConfigCache,
    queries: &mut [EventQuery],
    maintenanceids: &[u64],
) -> bool {
    let (by_host, query_hosts) = cache.with_read(|state| {
        let mut by_host: HashMap<u64, Vec<Arc<EventMaintenance>>> = HashMap::new();

        for id in maintenanceids {
            let Some(maintenance) = state.maintenances.get(id) else {
                continue;
            };
            if !maintenance.is_running() {
                continue;
            }

            let snapshot = Arc::new(EventMaintenance {
                maintenanceid: maintenance.id,
                running_until: maintenance.running_until,
                tags_evaltype: maintenance.tags_evaltype,
                tags: maintenance
                    .tagids
                    .iter()
                    .filter_map(|tagid| state.maintenance_tags.get(tagid).cloned())
                    .collect(),
            });

            for hostid in state.maintenance_hostids(maintenance) {
                by_host.entry(hostid).or_default().push(Arc::clone(&snapshot));
            }
        }

        let query_hosts: Vec<Vec<u64>> = queries
            .iter()
            .map(|query| {
                let mut hostids: Vec<u64> = query
                    .functionids
                    .iter()
                    .filter_map(|functionid| state.function_hostid(*functionid))
                    .collect();
                hostids.sort_unstable();
                hostids.dedup();
                hostids
            })
            .collect();

        (by_host, query_hosts)
    });

    let mut matched = false;

    for (query, hostids) in queries.iter_mut().zip(query_hosts) {
        query
            .tags
            .sort_by(|a, b| a.tag.cmp(&b.tag).then_with(|| a.value.cmp(&b.value)));

        for hostid in hostids {
            let Some(candidates) = by_host.get(&hostid) else {
                continue;
            };

            for candidate in candidates {
                if query
                    .maintenances
                    .iter()
                    .any(|(id, _)| *id == candidate.maintenanceid)
                {
                    continue;
                }
                if match_tags(candidate.tags_evaltype, &candidate.tags, &query.tags) {
                    query
                        .maintenances
                        .push((candidate.maintenanceid, candidate.running_until));
                    matched = true;
                }
            }
        }
    }

    matched
}
