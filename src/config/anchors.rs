//! Anchor/dependent map (the "dependencies" YAML in spec.md §6), normalised
//! at load time into a single tagged [`AnchorConfig`] shape (spec.md §9:
//! "Dynamic dispatch on anchor-config shape" — the YAML admits both a bare
//! list and a mapping with options).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_RETRY_INTERVALS: &[u64] = &[2, 10, 60, 300, 900];
pub const DEFAULT_MAX_MISMATCH_SECONDS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorConfig {
    pub name: String,
    pub dependents: Vec<String>,
    pub retry_intervals: Vec<u64>,
    pub restart_dependents: bool,
    pub max_mismatch_seconds: u64,
}

pub type AnchorsMap = HashMap<String, AnchorConfig>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAnchorEntry {
    Bare(Vec<String>),
    Options(RawAnchorOptions),
}

#[derive(Debug, Deserialize)]
struct RawAnchorOptions {
    services: Vec<String>,
    retry_intervals: Option<Vec<u64>>,
    restart_dependents: Option<bool>,
    max_mismatch_seconds: Option<u64>,
}

/// Parse and normalise the dependencies document. A missing or empty file is
/// not an error: it just means no anchors are configured.
pub fn load(path: &Path) -> anyhow::Result<AnchorsMap> {
    if !path.exists() {
        return Ok(AnchorsMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

pub fn parse(yaml: &str) -> anyhow::Result<AnchorsMap> {
    let raw: HashMap<String, RawAnchorEntry> = serde_yaml::from_str(yaml)?;
    Ok(raw
        .into_iter()
        .map(|(name, entry)| {
            let config = match entry {
                RawAnchorEntry::Bare(dependents) => AnchorConfig {
                    name: name.clone(),
                    dependents,
                    retry_intervals: DEFAULT_RETRY_INTERVALS.to_vec(),
                    restart_dependents: false,
                    max_mismatch_seconds: DEFAULT_MAX_MISMATCH_SECONDS,
                },
                RawAnchorEntry::Options(opts) => AnchorConfig {
                    name: name.clone(),
                    dependents: opts.services,
                    retry_intervals: opts.retry_intervals.unwrap_or_else(|| DEFAULT_RETRY_INTERVALS.to_vec()),
                    restart_dependents: opts.restart_dependents.unwrap_or(false),
                    max_mismatch_seconds: opts.max_mismatch_seconds.unwrap_or(DEFAULT_MAX_MISMATCH_SECONDS),
                },
            };
            (name, config)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_list_gets_defaults() {
        let map = parse("db:\n  - web\n  - worker\n").unwrap();
        let db = &map["db"];
        assert_eq!(db.dependents, vec!["web", "worker"]);
        assert_eq!(db.retry_intervals, DEFAULT_RETRY_INTERVALS);
        assert!(!db.restart_dependents);
        assert_eq!(db.max_mismatch_seconds, DEFAULT_MAX_MISMATCH_SECONDS);
    }

    #[test]
    fn options_mapping_overrides_defaults() {
        let yaml = "db:\n  services: [web]\n  retry_intervals: [1, 5]\n  restart_dependents: true\n  max_mismatch_seconds: 30\n";
        let map = parse(yaml).unwrap();
        let db = &map["db"];
        assert_eq!(db.dependents, vec!["web"]);
        assert_eq!(db.retry_intervals, vec![1, 5]);
        assert!(db.restart_dependents);
        assert_eq!(db.max_mismatch_seconds, 30);
    }

    #[test]
    fn mixed_shapes_in_one_document() {
        let yaml = "db:\n  - web\ncache:\n  services: [front]\n";
        let map = parse(yaml).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["db"].retry_intervals, DEFAULT_RETRY_INTERVALS);
        assert_eq!(map["cache"].dependents, vec!["front"]);
    }

    #[test]
    fn missing_file_is_empty_not_an_error() {
        let map = load(Path::new("/nonexistent/dependencies.yaml")).unwrap();
        assert!(map.is_empty());
    }
}
