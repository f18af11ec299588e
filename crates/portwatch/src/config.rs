//! portwatch.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PortwatchError, PortwatchResult};
use crate::prober::DEFAULT_PROBE_TIMEOUT;
use crate::target::OutageWindow;

/// How probe failures other than an active refusal are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnreachablePolicy {
    /// Count towards the grace time exactly like a refusal.
    #[default]
    Down,
    /// Leave the target's state untouched for that cycle.
    Ignore,
}

/// Scheduler-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Cumulative unreachable seconds tolerated before a target is down.
    pub grace_time_secs: u64,
    /// Log every check attempt at `info` instead of `debug`.
    pub verbose: bool,
    /// Connect timeout, e.g. "2s" or "500ms".
    pub probe_timeout: String,
    pub unreachable: UnreachablePolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_time_secs: 1,
            verbose: false,
            probe_timeout: format!("{}s", DEFAULT_PROBE_TIMEOUT.as_secs()),
            unreachable: UnreachablePolicy::Down,
        }
    }
}

impl MonitorConfig {
    /// The parsed connect timeout.
    pub fn probe_timeout(&self) -> PortwatchResult<Duration> {
        parse_duration(&self.probe_timeout)
            .ok_or_else(|| PortwatchError::Duration(self.probe_timeout.clone()))
    }
}

/// One `[[target]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    pub outage: Option<OutageWindow>,
}

fn default_interval_secs() -> u64 {
    1
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortwatchConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

impl PortwatchConfig {
    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> PortwatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| PortwatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse config from a TOML string, validating the timeout.
    pub fn from_toml_str(content: &str) -> PortwatchResult<Self> {
        let config: PortwatchConfig = toml::from_str(content)?;
        // Surface a bad timeout at load time rather than at first probe.
        config.monitor.probe_timeout()?;
        Ok(config)
    }
}

/// Parse a duration string like "5s", "500ms", "1m", or plain seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_minimal() {
        let config = PortwatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.monitor, MonitorConfig::default());
        assert!(config.targets.is_empty());
        assert_eq!(config.monitor.probe_timeout().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[monitor]
grace_time_secs = 10
verbose = true
probe_timeout = "500ms"
unreachable = "ignore"

[[target]]
host = "127.0.0.1"
port = 9008

[[target]]
host = "example.com"
port = 80
interval_secs = 10

[target.outage]
start = "2026-10-16T02:00:00Z"
end = "2026-10-16T03:00:00Z"
"#;
        let config = PortwatchConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.monitor.grace_time_secs, 10);
        assert!(config.monitor.verbose);
        assert_eq!(config.monitor.unreachable, UnreachablePolicy::Ignore);
        assert_eq!(config.monitor.probe_timeout().unwrap(), Duration::from_millis(500));

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].interval_secs, 1);
        assert!(config.targets[0].outage.is_none());

        let outage = config.targets[1].outage.unwrap();
        assert_eq!(outage.start, Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap());
        assert_eq!(outage.end, Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = PortwatchConfig::from_toml_str("[monitor]\nprobe_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, PortwatchError::Duration(ref s) if s == "soon"));
    }

    #[test]
    fn test_bad_toml_rejected() {
        let err = PortwatchConfig::from_toml_str("[[target]]\nhost = 1\n").unwrap_err();
        assert!(matches!(err, PortwatchError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[target]]\nhost = \"localhost\"\nport = 5432\ninterval_secs = 30").unwrap();

        let config = PortwatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.targets[0].host, "localhost");
        assert_eq!(config.targets[0].interval_secs, 30);
    }

    #[test]
    fn test_missing_file() {
        let err = PortwatchConfig::from_file(Path::new("/nonexistent/portwatch.toml")).unwrap_err();
        assert!(matches!(err, PortwatchError::Read { .. }));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        let toml_str = format!("[monitor]\nprobe_timeout = \"{}m\"\n", u64::MAX);
        let err = PortwatchConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, PortwatchError::Duration(_)));
    }
}
