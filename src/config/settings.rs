use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const ENV_PRODUCTION: &str = "production";

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Logger {
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub directory: bool,
    #[serde(default = "default_true")]
    pub console: bool,
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Manager {
    pub id: String,
    pub logger: Logger,
}

/// Reconciliation engine tuning: stack naming, loop periods and file paths.
/// Field defaults mirror the environment variables in spec.md §6.
#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
#[serde(default)]
pub struct Reconciler {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    #[serde(default = "default_relabel_seconds")]
    pub relabel_seconds: u64,
    #[serde(default = "default_rebalance_seconds")]
    pub rebalance_seconds: u64,
    #[serde(default)]
    pub restart_dependents: bool,
    #[serde(default = "default_max_mismatch_seconds")]
    pub max_mismatch_seconds: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_stack_name() -> String {
    "swarm-dev".to_string()
}

fn default_relabel_seconds() -> u64 {
    60
}

fn default_rebalance_seconds() -> u64 {
    60
}

fn default_max_mismatch_seconds() -> u64 {
    600
}

fn default_config_dir() -> String {
    "/etc/swarm-reconciler".to_string()
}

fn default_state_dir() -> String {
    "/var/lib/swarm-reconciler".to_string()
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            relabel_seconds: default_relabel_seconds(),
            rebalance_seconds: default_rebalance_seconds(),
            restart_dependents: false,
            max_mismatch_seconds: default_max_mismatch_seconds(),
            dry_run: false,
            config_dir: default_config_dir(),
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
#[serde(default)]
pub struct Http {
    pub enable: bool,
    pub port: u16,
}

fn default_http_port() -> u16 {
    9090
}

impl Default for Http {
    fn default() -> Self {
        Self { enable: true, port: default_http_port() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[allow(unused)]
pub struct Settings {
    pub manager: Manager,
    #[serde(default)]
    pub reconciler: Reconciler,
    #[serde(default)]
    pub http: Http,
}

impl Settings {
    pub fn mode() -> String {
        env::var("RECONCILER_ENV").unwrap_or_else(|_| ENV_PRODUCTION.into())
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = Self::mode();
        Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::default().try_parsing(true).separator("__"))
            .build()?
            .try_deserialize()
    }
}
