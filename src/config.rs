use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Timeout and pool size for one port scan phase.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseConfig {
    pub timeout_ms: u64,
    pub concurrency: usize,
}

impl PhaseConfig {
    pub const fn new(timeout_ms: u64, concurrency: usize) -> Self {
        Self {
            timeout_ms,
            concurrency,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub priority: PhaseConfig,
    pub secondary: PhaseConfig,
    pub full: PhaseConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            priority: PhaseConfig::new(600, 40),
            secondary: PhaseConfig::new(900, 30),
            full: PhaseConfig::new(350, 80),
        }
    }
}

/// Tunables for the probe engine and its delivery loop.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on a single echo in `ping_once`.
    pub ping_timeout_ms: u64,
    /// Parallel single pings during a bulk run.
    pub bulk_concurrency: usize,
    /// Delivery loop period.
    pub tick_interval_ms: u64,
    /// Maximum events applied per delivery tick.
    pub max_events_per_tick: usize,
    pub scan: ScanConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 2_000,
            bulk_concurrency: 10,
            tick_interval_ms: 30,
            max_events_per_tick: 200,
            scan: ScanConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Parse a JSON config. Missing keys fall back to defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("invalid engine config JSON")
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_phase_table() {
        let c = EngineConfig::default();
        assert_eq!(c.scan.priority, PhaseConfig::new(600, 40));
        assert_eq!(c.scan.secondary, PhaseConfig::new(900, 30));
        assert_eq!(c.scan.full, PhaseConfig::new(350, 80));
        assert_eq!(c.max_events_per_tick, 200);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "bulk_concurrency": 4,
            "scan": {"full": {"timeout_ms": 500, "concurrency": 64}}
        }"#;
        let c = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(c.bulk_concurrency, 4);
        assert_eq!(c.scan.full, PhaseConfig::new(500, 64));
        assert_eq!(c.scan.priority, PhaseConfig::new(600, 40));
        assert_eq!(c.ping_timeout_ms, 2_000);
    }

    #[test]
    fn garbage_config_errors() {
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
