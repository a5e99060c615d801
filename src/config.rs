use std::path::PathBuf;
use std::time::Duration;

use crate::reminder::SchedulerConfig;

const PREFIX: &str = "ROOMBOOK_";

/// Daemon settings, read from `ROOMBOOK_*` environment variables.
/// Missing or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub lookahead: Duration,
    pub tick_timeout: Duration,
    pub max_in_flight: usize,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub contact_ttl: Duration,
    /// JSON array of employees to seed the directory with.
    pub directory_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        let sched = SchedulerConfig::default();
        Self {
            data_dir: PathBuf::from("./data"),
            tick_interval: sched.tick_interval,
            lookahead: sched.lookahead,
            tick_timeout: sched.tick_timeout,
            max_in_flight: sched.max_in_flight,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            contact_ttl: Duration::from_secs(300),
            directory_file: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}"));
        let parsed = |name: &str| get(name).and_then(|s| s.trim().parse::<u64>().ok());
        let secs = |name: &str, default: Duration| {
            parsed(name)
                .filter(|&s| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let d = Self::default();
        Self {
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            tick_interval: secs("TICK_INTERVAL_SECS", d.tick_interval),
            lookahead: secs("LOOKAHEAD_SECS", d.lookahead),
            tick_timeout: secs("TICK_TIMEOUT_SECS", d.tick_timeout),
            max_in_flight: parsed("MAX_IN_FLIGHT")
                .filter(|&n| n > 0)
                .map(|n| n as usize)
                .unwrap_or(d.max_in_flight),
            compact_threshold: parsed("COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            compact_interval: secs("COMPACT_INTERVAL_SECS", d.compact_interval),
            contact_ttl: parsed("CONTACT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.contact_ttl),
            directory_file: get("DIRECTORY_FILE").map(PathBuf::from),
            metrics_port: get("METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval,
            lookahead: self.lookahead,
            tick_timeout: self.tick_timeout,
            max_in_flight: self.max_in_flight,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}
