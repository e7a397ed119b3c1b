//! Hot-reload for the dependencies/rebalance YAML documents.
//!
//! A `notify` watcher observes both files; on any change it reparses and
//! swaps a fresh snapshot into an [`arc_swap::ArcSwap`] that every pass reads
//! at its start (spec.md §6: "an in-memory atomic pointer is swapped"). A
//! snapshot that fails to parse is logged and the previous one is kept in
//! place (spec.md §7, Configuration error, runtime case).

use crate::config::anchors::{self, AnchorsMap};
use crate::config::rebalance::{self, RebalanceConfig};
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub dependencies: PathBuf,
    pub rebalance: PathBuf,
}

impl ConfigPaths {
    pub fn under(dir: &Path) -> Self {
        Self {
            dependencies: dir.join("dependencies.yaml"),
            rebalance: dir.join("rebalance.yaml"),
        }
    }
}

pub struct ConfigStore {
    paths: ConfigPaths,
    anchors: ArcSwap<AnchorsMap>,
    rebalance: ArcSwap<RebalanceConfig>,
}

impl ConfigStore {
    pub fn load(paths: ConfigPaths) -> anyhow::Result<Arc<Self>> {
        let anchors = anchors::load(&paths.dependencies)?;
        let rebalance = rebalance::load(&paths.rebalance)?;
        Ok(Arc::new(Self {
            paths,
            anchors: ArcSwap::from_pointee(anchors),
            rebalance: ArcSwap::from_pointee(rebalance),
        }))
    }

    pub fn anchors(&self) -> Arc<AnchorsMap> {
        self.anchors.load_full()
    }

    pub fn rebalance(&self) -> Arc<RebalanceConfig> {
        self.rebalance.load_full()
    }

    fn reload(&self) {
        match anchors::load(&self.paths.dependencies) {
            Ok(map) => self.anchors.store(Arc::new(map)),
            Err(e) => error!(error = %e, path = %self.paths.dependencies.display(), "failed to reload dependencies config, keeping previous snapshot"),
        }
        match rebalance::load(&self.paths.rebalance) {
            Ok(cfg) => self.rebalance.store(Arc::new(cfg)),
            Err(e) => error!(error = %e, path = %self.paths.rebalance.display(), "failed to reload rebalance config, keeping previous snapshot"),
        }
        info!("configuration snapshot reloaded");
    }

    /// Spawn a background watcher that reloads on file change until `cancel`
    /// fires. Watch failures (e.g. missing directory) are logged once; the
    /// loaded snapshot still serves from memory.
    pub fn watch(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();
            let watch_dir = store
                .paths
                .dependencies
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));

            let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
                let _ = tx.send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "failed to create config watcher, hot-reload disabled");
                    return;
                }
            };
            if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
                warn!(error = %e, dir = %watch_dir.display(), "failed to watch config directory, hot-reload disabled");
                return;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(Ok(event)) if event.kind.is_modify() || event.kind.is_create() => {
                                store.reload();
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => warn!(error = %e, "config watcher error"),
                            None => break,
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_with_missing_files_uses_empty_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::under(dir.path());
        let store = ConfigStore::load(paths).unwrap();
        assert!(store.anchors().is_empty());
        assert_eq!(store.rebalance().default.cooldown_minutes, 15);
    }

    #[test]
    fn reload_picks_up_new_contents() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::under(dir.path());
        std::fs::write(&paths.dependencies, "db:\n  - web\n").unwrap();
        let store = ConfigStore::load(paths).unwrap();
        assert_eq!(store.anchors()["db"].dependents, vec!["web"]);

        std::fs::write(&store.paths.dependencies, "db:\n  - web\n  - worker\n").unwrap();
        store.reload();
        assert_eq!(store.anchors()["db"].dependents, vec!["web", "worker"]);
    }
}
