//! Vigil daemon
//!
//! Seeds the configuration cache from a change feed and runs the maintenance
//! timers until interrupted.

use vigil::cache::{load_sync_file, ConfigCache};
use vigil::config::{Config, TimeZoneSetting};
use vigil::timer::MaintenanceTimer;

use chrono::{Local, TimeZone, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn spawn_timers<Tz>(cfg: &Config, cache: &Arc<ConfigCache>, tz: Tz) -> Vec<JoinHandle<()>>
where
    Tz: TimeZone + Send + Sync + 'static,
{
    (0..cfg.timer_consumers)
        .map(|consumer| {
            MaintenanceTimer::new(consumer, cache.clone(), tz.clone(), cfg.timer_interval).start()
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("vigil=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!(
        "Starting Vigil with {} timer consumers every {:?}...",
        cfg.timer_consumers,
        cfg.timer_interval
    );

    let cache = Arc::new(ConfigCache::new(cfg.timer_consumers));

    if let Some(path) = &cfg.sync_file {
        let batch = load_sync_file(path)?;
        let report = cache.apply_sync(&batch, Utc::now().timestamp());
        tracing::info!(
            "Loaded change feed {} ({} rows applied)",
            path.display(),
            report.applied
        );
    }

    let timers = match cfg.timezone {
        TimeZoneSetting::Local => spawn_timers(&cfg, &cache, Local),
        TimeZoneSetting::Utc => spawn_timers(&cfg, &cache, Utc),
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for timer in timers {
        timer.abort();
    }

    Ok(())
}
