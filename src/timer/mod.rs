//! Maintenance timer.
//!
//! One timer runs per consumer. Consumer 0 coordinates: it re-evaluates
//! maintenances and raises the update flags when something changed. Every
//! consumer with a pending flag then propagates the running maintenances.

use crate::cache::ConfigCache;
use crate::maintenance::{
    flush_host_maintenance_updates, get_event_maintenances, get_host_maintenance_updates,
    running_maintenance_ids, update_maintenances, EventQuery,
};

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Source of open problems whose suppression follows maintenances.
pub trait ProblemSource: Send + Sync {
    /// Suppression queries handled by `consumer`.
    fn event_queries(&self, consumer: usize) -> Vec<EventQuery>;

    /// Receive the queries with their matched maintenances filled in.
    fn apply_suppression(&self, consumer: usize, queries: &[EventQuery]);
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Maintenances were evaluated and reported a change.
    pub changed: bool,
    /// This consumer handled a pending update flag.
    pub handled: bool,
    pub host_updates: usize,
    pub suppressed_events: usize,
}

pub struct MaintenanceTimer<Tz: TimeZone> {
    consumer: usize,
    cache: Arc<ConfigCache>,
    tz: Tz,
    interval: Duration,
    problems: Option<Arc<dyn ProblemSource>>,
}

impl<Tz> MaintenanceTimer<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
{
    pub fn new(consumer: usize, cache: Arc<ConfigCache>, tz: Tz, interval: Duration) -> Self {
        Self {
            consumer,
            cache,
            tz,
            interval,
            problems: None,
        }
    }

    pub fn with_problems(mut self, problems: Arc<dyn ProblemSource>) -> Self {
        self.problems = Some(problems);
        self
    }

    pub fn consumer(&self) -> usize {
        self.consumer
    }

    /// Run one timer pass at `now`.
    pub fn tick(&self, now: i64) -> TickOutcome {
        let flags = self.cache.flags();
        let mut outcome = TickOutcome::default();

        // Re-evaluate only once every consumer caught up
        if self.consumer == 0 && !flags.check_update_flags() {
            if update_maintenances(&self.cache, now, &self.tz) {
                flags.set_update_flags();
                outcome.changed = true;
            }
        }

        if !flags.check_update_flag(self.consumer) {
            return outcome;
        }
        flags.reset_update_flag(self.consumer);
        outcome.handled = true;

        let maintenanceids = running_maintenance_ids(&self.cache);

        if self.consumer == 0 {
            let diffs = get_host_maintenance_updates(&self.cache, &maintenanceids);
            outcome.host_updates = flush_host_maintenance_updates(&self.cache, &diffs, now);
        }

        if let Some(problems) = &self.problems {
            let mut queries = problems.event_queries(self.consumer);
            if !queries.is_empty() {
                get_event_maintenances(&self.cache, &mut queries, &maintenanceids);
                outcome.suppressed_events =
                    queries.iter().filter(|q| !q.maintenances.is_empty()).count();
                problems.apply_suppression(self.consumer, &queries);
            }
        }

        tracing::debug!(
            "MaintenanceTimer: consumer {} handled update, {} running maintenances",
            self.consumer,
            maintenanceids.len()
        );
        outcome
    }

    /// Start the timer background task.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            tracing::info!(
                "MaintenanceTimer: consumer {} started, interval {:?}",
                self.consumer,
                self.interval
            );

            loop {
                interval.tick().await;
                let outcome = self.tick(Utc::now().timestamp());

                if outcome.host_updates > 0 || outcome.suppressed_events > 0 {
                    tracing::info!(
                        "MaintenanceTimer: consumer {} updated {} hosts, {} events in maintenance",
                        self.consumer,
                        outcome.host_updates,
                        outcome.suppressed_events
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ChangeRow, HostMaintenanceStatus, SyncBatch};
    use crate::maintenance::testing::*;
    use crate::maintenance::EventTag;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProblems {
        applied: Mutex<Vec<(usize, Vec<EventQuery>)>>,
    }

    impl ProblemSource for RecordingProblems {
        fn event_queries(&self, _consumer: usize) -> Vec<EventQuery> {
            vec![EventQuery {
                eventid: 7,
                functionids: vec![10],
                tags: vec![EventTag::new("env", "prod")],
                ..Default::default()
            }]
        }

        fn apply_suppression(&self, consumer: usize, queries: &[EventQuery]) {
            self.applied.lock().unwrap().push((consumer, queries.to_vec()));
        }
    }

    fn cache() -> Arc<ConfigCache> {
        let cache = Arc::new(ConfigCache::new(2));
        cache.apply_sync(
            &SyncBatch {
                hosts: vec![ChangeRow::insert(1, &["1", "0"])],
                items: vec![ChangeRow::insert(100, &["100", "1"])],
                functions: vec![ChangeRow::insert(10, &["10", "100"])],
                maintenances: vec![maintenance_row(1, 0, 0, 100_000, 0)],
                maintenance_periods: vec![onetime_period_row(1, 1, 1000, 1000)],
                maintenance_hosts: vec![ChangeRow::insert(0, &["1", "1"])],
                ..Default::default()
            },
            0,
        );
        cache
    }

    #[test]
    fn test_tick_end_to_end() {
        let cache = cache();
        let problems = Arc::new(RecordingProblems::default());
        let coordinator = MaintenanceTimer::new(0, cache.clone(), Utc, Duration::from_secs(1))
            .with_problems(problems.clone());
        let worker = MaintenanceTimer::new(1, cache.clone(), Utc, Duration::from_secs(1))
            .with_problems(problems.clone());

        // Sync raised both flags; the coordinator waits for the worker
        let outcome = coordinator.tick(500);
        assert!(outcome.handled);
        assert!(!outcome.changed);
        assert!(cache.flags().check_update_flag(1));
        assert!(worker.tick(500).handled);

        // Picks up the revision synchronized before the first evaluation
        assert!(coordinator.tick(600).changed);
        worker.tick(600);
        assert!(!coordinator.tick(700).changed);

        let outcome = coordinator.tick(1500);
        assert!(outcome.changed);
        assert_eq!(outcome.host_updates, 1);
        assert_eq!(outcome.suppressed_events, 1);
        cache.with_read(|state| {
            assert_eq!(
                state.hosts.get(&1).unwrap().maintenance_status,
                HostMaintenanceStatus::On
            );
        });

        let outcome = worker.tick(1500);
        assert!(outcome.handled);
        assert_eq!(outcome.host_updates, 0);

        let applied = problems.applied.lock().unwrap();
        let (consumer, queries) = applied.last().unwrap();
        assert_eq!(*consumer, 1);
        assert_eq!(queries[0].maintenances, vec![(1, 2000)]);
    }

    #[test]
    fn test_idle_consumer_does_nothing() {
        let cache = cache();
        cache.flags().reset_update_flag(1);
        let worker = MaintenanceTimer::new(1, cache.clone(), Utc, Duration::from_secs(1));
        assert_eq!(worker.tick(1500), TickOutcome::default());
        assert_eq!(worker.consumer(), 1);
    }

    #[test]
    fn test_aborted_timer_stops() {
        tokio_test::block_on(async {
            let handle = MaintenanceTimer::new(1, cache(), Utc, Duration::from_secs(3600)).start();
            handle.abort();
            let err = handle.await.unwrap_err();
            assert!(err.is_cancelled());
        });
    }

    #[tokio::test]
    async fn test_started_timer_applies_maintenance() {
        let cache = Arc::new(ConfigCache::new(1));
        let now = Utc::now().timestamp();
        cache.apply_sync(
            &SyncBatch {
                hosts: vec![ChangeRow::insert(1, &["1", "0"])],
                maintenances: vec![maintenance_row(1, 1, now - 60, now + 3600, 0)],
                maintenance_periods: vec![onetime_period_row(1, 1, now - 60, 3600)],
                maintenance_hosts: vec![ChangeRow::insert(0, &["1", "1"])],
                ..Default::default()
            },
            now,
        );

        let handle = MaintenanceTimer::new(0, cache.clone(), Utc, Duration::from_millis(10)).start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        cache.with_read(|state| {
            let host = state.hosts.get(&1).unwrap();
            assert_eq!(host.maintenance_status, HostMaintenanceStatus::On);
            assert_eq!(host.maintenanceid, 1);
        });
    }
}
