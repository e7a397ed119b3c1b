use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::{env, fs};
use swarm_reconciler::config::settings::Settings;
use swarm_reconciler::config::{ConfigPaths, ConfigStore};
use swarm_reconciler::metrics::Metrics;
use swarm_reconciler::orchestrator::dry_run::DryRunOrchestrator;
use swarm_reconciler::orchestrator::swarm::SwarmOrchestrator;
use swarm_reconciler::reconcile::rebalance::RebalanceStateStore;
use swarm_reconciler::retry::RetryState;
use swarm_reconciler::scheduler::Scheduler;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, layer::SubscriberExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const BASE_DIRECTORY_LOG: &str = "logs";
const BASE_DIRECTORY_SIZE: usize = 5;
const PREFIX_LOG_NAME: &str = "swarm-reconciler.log";

// Global init logger
fn init_logger(settings: &Settings) {
    let logger_config = &settings.manager.logger;

    // Validate log level
    let log_level = match Level::from_str(&logger_config.level) {
        Ok(level) => level,
        Err(_) => panic!(
            "Invalid log level: '{}'. Valid values are: trace, debug, info, warn, error",
            logger_config.level
        ),
    };

    // Validate log format
    if logger_config.format != "json" && logger_config.format != "pretty" {
        panic!(
            "Invalid log format: '{}'. Valid values are: json, pretty",
            logger_config.format
        );
    }

    let current_exe_path = env::current_exe().unwrap();
    let parent_path = current_exe_path.parent().unwrap();
    let condition = RollingConditionBasic::new().daily();
    let log_path = parent_path.join(BASE_DIRECTORY_LOG);
    fs::create_dir(log_path.clone()).unwrap_or_default();
    let log_file = log_path.join(PREFIX_LOG_NAME);
    let file_appender = BasicRollingFileAppender::new(log_file, condition, BASE_DIRECTORY_SIZE).unwrap();
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // The guard must outlive the subscriber; main runs for the life of the process.
    Box::leak(Box::new(guard));

    if logger_config.format == "json" {
        let console_layer = Layer::new().with_writer(std::io::stdout.with_max_level(log_level)).json();
        let file_layer = Layer::new().with_writer(file_writer.with_max_level(log_level)).json();
        Registry::default()
            .with(logger_config.console.then_some(console_layer))
            .with(logger_config.directory.then_some(file_layer))
            .init();
    } else {
        let console_layer = Layer::new().with_writer(std::io::stdout.with_max_level(log_level)).pretty();
        let file_layer = Layer::new().with_writer(file_writer.with_max_level(log_level)).json();
        Registry::default()
            .with(logger_config.console.then_some(console_layer))
            .with(logger_config.directory.then_some(file_layer))
            .init();
    }
}

// Main function
#[tokio::main]
async fn main() {
    let settings = Settings::new().expect("failed to load configuration");
    init_logger(&settings);

    let env = Settings::mode();
    info!(version = VERSION, env, "starting swarm-reconciler");

    let reconciler = settings.reconciler.clone();
    let config_dir = Path::new(&reconciler.config_dir);
    let state_dir = Path::new(&reconciler.state_dir);

    let config_store =
        ConfigStore::load(ConfigPaths::under(config_dir)).expect("failed to load configuration documents");

    let swarm = SwarmOrchestrator::connect().expect("failed to connect to the orchestrator");
    let orchestrator: Arc<dyn swarm_reconciler::orchestrator::Orchestrator + Send + Sync> = if reconciler.dry_run {
        Arc::new(DryRunOrchestrator::new(swarm))
    } else {
        Arc::new(swarm)
    };
    let retry = Arc::new(RetryState::load(state_dir.join("retry.json")));
    let rebalance_state = Arc::new(RebalanceStateStore::load(state_dir.join("rebalance.json")));
    let metrics = Arc::new(Metrics::new());
    let http_client = reqwest::Client::new();

    let cancel = CancellationToken::new();
    let (sync_tx, sync_rx) = tokio::sync::mpsc::channel(1);

    let mut handles = Vec::new();

    handles.push(config_store.watch(cancel.clone()));

    if settings.http.enable {
        let port = settings.http.port;
        let metrics = Arc::clone(&metrics);
        let sync_tx = sync_tx.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            swarm_reconciler::http::serve(port, metrics, sync_tx, cancel).await;
        }));
    }

    handles.push(tokio::spawn(swarm_reconciler::signals::handle_signals(cancel.clone(), sync_tx)));

    let scheduler = Arc::new(Scheduler {
        orchestrator,
        config: config_store,
        stack_name: reconciler.stack_name.clone(),
        retry,
        rebalance_state,
        metrics,
        http_client,
    });
    handles.extend(scheduler.spawn(reconciler.relabel_seconds, reconciler.rebalance_seconds, cancel, sync_rx));

    for handle in handles {
        let _ = handle.await;
    }
}
