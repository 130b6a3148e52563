//! Configuration module for Vigil.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Time zone used for maintenance period calendar math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneSetting {
    Local,
    Utc,
}

impl TimeZoneSetting {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(TimeZoneSetting::Local),
            "utc" => Some(TimeZoneSetting::Utc),
            _ => None,
        }
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between maintenance timer passes (default: 60s)
    pub timer_interval: Duration,
    /// Number of timer consumers; consumer 0 coordinates (default: 1)
    pub timer_consumers: usize,
    /// JSON change feed applied at start-up (default: none)
    pub sync_file: Option<PathBuf>,
    /// Time zone of maintenance periods (default: local)
    pub timezone: TimeZoneSetting,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_interval: Duration::from_secs(60),
            timer_consumers: 1,
            sync_file: None,
            timezone: TimeZoneSetting::Local,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_TIMER_INTERVAL`: timer interval in seconds (default: 60)
    /// - `VIGIL_TIMER_CONSUMERS`: number of timer consumers (default: 1)
    /// - `VIGIL_SYNC_FILE`: path of a JSON change feed (default: none)
    /// - `VIGIL_TIMEZONE`: `local` or `utc` (default: local)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(value) = lookup("VIGIL_TIMER_INTERVAL") {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.timer_interval = Duration::from_secs(secs),
                _ => tracing::warn!("Config: ignoring invalid VIGIL_TIMER_INTERVAL {:?}", value),
            }
        }

        if let Some(value) = lookup("VIGIL_TIMER_CONSUMERS") {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.timer_consumers = n,
                _ => tracing::warn!("Config: ignoring invalid VIGIL_TIMER_CONSUMERS {:?}", value),
            }
        }

        if let Some(path) = lookup("VIGIL_SYNC_FILE") {
            if !path.trim().is_empty() {
                cfg.sync_file = Some(PathBuf::from(path));
            }
        }

        if let Some(value) = lookup("VIGIL_TIMEZONE") {
            match TimeZoneSetting::parse(&value) {
                Some(tz) => cfg.timezone = tz,
                None => tracing::warn!("Config: ignoring invalid VIGIL_TIMEZONE {:?}", value),
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.timer_interval, Duration::from_secs(60));
        assert_eq!(cfg.timer_consumers, 1);
        assert!(cfg.sync_file.is_none());
        assert_eq!(cfg.timezone, TimeZoneSetting::Local);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = load(&[
            ("VIGIL_TIMER_INTERVAL", "5"),
            ("VIGIL_TIMER_CONSUMERS", "3"),
            ("VIGIL_SYNC_FILE", "/etc/vigil/feed.json"),
            ("VIGIL_TIMEZONE", "UTC"),
        ]);
        assert_eq!(cfg.timer_interval, Duration::from_secs(5));
        assert_eq!(cfg.timer_consumers, 3);
        assert_eq!(cfg.sync_file, Some(PathBuf::from("/etc/vigil/feed.json")));
        assert_eq!(cfg.timezone, TimeZoneSetting::Utc);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = load(&[
            ("VIGIL_TIMER_INTERVAL", "0"),
            ("VIGIL_TIMER_CONSUMERS", "many"),
            ("VIGIL_SYNC_FILE", " "),
            ("VIGIL_TIMEZONE", "mars"),
        ]);
        assert_eq!(cfg.timer_interval, Duration::from_secs(60));
        assert_eq!(cfg.timer_consumers, 1);
        assert!(cfg.sync_file.is_none());
        assert_eq!(cfg.timezone, TimeZoneSetting::Local);
    }
}
