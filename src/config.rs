use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the leakwatch agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Capacity of the bounded event channel feeding the session run
    /// loop. Events arriving while it is full are dropped. Default: 65536.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Periodic leak report configuration.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Periodic leak report configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Interval between reports. Default: 10s.
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Stacks per report, ranked by outstanding allocations. Zero means
    /// the full per-process dump. Default: 10.
    #[serde(default = "default_report_top")]
    pub top: usize,

    /// Hide stacks with fewer outstanding allocations than this.
    #[serde(default)]
    pub min_outstanding: u64,

    /// Stop reporting after this many reports. Zero means until shutdown.
    #[serde(default)]
    pub count: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    65536
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_report_top() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            channel_capacity: default_channel_capacity(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval: default_report_interval(),
            top: default_report_top(),
            min_outstanding: 0,
            count: 0,
        }
    }
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }

        if self.report.interval.is_zero() {
            bail!("report.interval must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.channel_capacity, 65536);
        assert_eq!(cfg.report.interval, Duration::from_secs(10));
        assert_eq!(cfg.report.top, 10);
        assert_eq!(cfg.report.min_outstanding, 0);
        assert_eq!(cfg.report.count, 0);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
log_level: debug
channel_capacity: 1024
report:
  interval: 30s
  top: 5
  min_outstanding: 3
  count: 10
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.channel_capacity, 1024);
        assert_eq!(cfg.report.interval, Duration::from_secs(30));
        assert_eq!(cfg.report.top, 5);
        assert_eq!(cfg.report.min_outstanding, 3);
        assert_eq!(cfg.report.count, 10);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
report:
  interval: 1m
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.channel_capacity, 65536);
        assert_eq!(cfg.report.interval, Duration::from_secs(60));
        assert_eq!(cfg.report.top, 10);
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let cfg = Config {
            channel_capacity: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_report_interval_rejected() {
        let yaml = r#"
report:
  interval: 0s
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert!(cfg.validate().is_err());
    }
}
