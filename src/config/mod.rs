pub mod anchors;
pub mod rebalance;
pub mod settings;
pub mod watcher;

pub use settings::Settings;
pub use watcher::{ConfigPaths, ConfigStore};
