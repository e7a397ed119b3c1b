//! Memory-rebalance configuration (spec.md §6, `rebalance_config.yml`):
//! cluster-wide defaults with optional per-service overrides and the
//! node-exporter scrape targets used by C5.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_cooldown_minutes() -> u64 {
    15
}
fn default_sustained_high_minutes() -> u64 {
    10
}
fn default_memory_difference_gb() -> f64 {
    2.0
}
fn default_rebalance_buffer_gb() -> f64 {
    1.0
}
fn default_check_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RebalanceDefaults {
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_sustained_high_minutes")]
    pub sustained_high_minutes: u64,
    #[serde(default = "default_memory_difference_gb")]
    pub memory_difference_gb: f64,
    #[serde(default = "default_rebalance_buffer_gb")]
    pub rebalance_buffer_gb: f64,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
}

impl Default for RebalanceDefaults {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            sustained_high_minutes: default_sustained_high_minutes(),
            memory_difference_gb: default_memory_difference_gb(),
            rebalance_buffer_gb: default_rebalance_buffer_gb(),
            check_interval_seconds: default_check_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebalanceServiceOverride {
    pub cooldown_minutes: Option<u64>,
    pub sustained_high_minutes: Option<u64>,
    pub memory_difference_gb: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RebalanceConfig {
    #[serde(default)]
    pub default: RebalanceDefaults,
    #[serde(default)]
    pub services: HashMap<String, RebalanceServiceOverride>,
    #[serde(default)]
    pub node_exporters: HashMap<String, String>,
}

impl RebalanceConfig {
    fn overrides(&self, service: &str) -> Option<&RebalanceServiceOverride> {
        self.services.get(service)
    }

    pub fn cooldown_minutes(&self, service: &str) -> u64 {
        self.overrides(service)
            .and_then(|o| o.cooldown_minutes)
            .unwrap_or(self.default.cooldown_minutes)
    }

    pub fn sustained_high_minutes(&self, service: &str) -> u64 {
        self.overrides(service)
            .and_then(|o| o.sustained_high_minutes)
            .unwrap_or(self.default.sustained_high_minutes)
    }

    pub fn memory_difference_gb(&self, service: &str) -> f64 {
        self.overrides(service)
            .and_then(|o| o.memory_difference_gb)
            .unwrap_or(self.default.memory_difference_gb)
    }
}

pub fn load(path: &Path) -> anyhow::Result<RebalanceConfig> {
    if !path.exists() {
        return Ok(RebalanceConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_overrides() {
        let cfg = RebalanceConfig::default();
        assert_eq!(cfg.cooldown_minutes("web"), 15);
        assert_eq!(cfg.sustained_high_minutes("web"), 10);
        assert_eq!(cfg.memory_difference_gb("web"), 2.0);
        assert_eq!(cfg.default.rebalance_buffer_gb, 1.0);
    }

    #[test]
    fn per_service_override_wins() {
        let yaml = "default:\n  cooldown_minutes: 15\nservices:\n  web:\n    cooldown_minutes: 5\n";
        let cfg: RebalanceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.cooldown_minutes("web"), 5);
        assert_eq!(cfg.cooldown_minutes("other"), 15);
    }
}
