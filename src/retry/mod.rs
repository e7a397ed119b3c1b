//! Per-dependent retry/cooldown bookkeeping (C2, spec.md §4.2).
//!
//! C4 consults this before attempting a `force_update` on a mismatched
//! dependent: a service only gets poked again once its configured interval
//! has elapsed since the last attempt. State survives restarts via an
//! atomically-written JSON file; a corrupt file is logged and treated as
//! empty rather than failing startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Seam for deterministic tests; production uses [`SystemClock`].
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RetryEntry {
    failures: u32,
    last_attempt_unix: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RetryFile {
    #[serde(flatten)]
    entries: HashMap<String, RetryEntry>,
}

/// Tracks last-attempt timestamps and consecutive-failure counts per
/// dependent service, gating retries against a configured backoff ladder.
pub struct RetryState {
    path: PathBuf,
    clock: Box<dyn Clock>,
    entries: Mutex<HashMap<String, RetryEntry>>,
}

impl RetryState {
    pub fn load(path: PathBuf) -> Self {
        Self::load_with_clock(path, Box::new(SystemClock))
    }

    pub fn load_with_clock(path: PathBuf, clock: Box<dyn Clock>) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| match serde_json::from_str::<RetryFile>(&raw) {
                Ok(file) => Some(file.entries),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "retry state file is corrupt, starting fresh");
                    None
                }
            })
            .unwrap_or_default();
        Self { path, clock, entries: Mutex::new(entries) }
    }

    /// Whether `service` is eligible for another attempt right now, given a
    /// backoff ladder (seconds) indexed by its consecutive-failure count and
    /// clamped to the last entry once exhausted.
    pub fn should_retry(&self, service: &str, retry_intervals: &[u64]) -> bool {
        if retry_intervals.is_empty() {
            return true;
        }
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(service) else {
            return true;
        };
        let idx = (entry.failures as usize).min(retry_intervals.len() - 1);
        let wait = retry_intervals[idx] as i64;
        self.clock.now_unix() - entry.last_attempt_unix >= wait
    }

    /// Record an attempt. `success == false` advances the backoff ladder;
    /// `success == true` is recorded by [`Self::clear`] instead.
    pub fn record_attempt(&self, service: &str, success: bool) {
        let mut entries = self.entries.lock().unwrap();
        if success {
            entries.remove(service);
        } else {
            let entry = entries.entry(service.to_string()).or_default();
            entry.failures = entry.failures.saturating_add(1);
            entry.last_attempt_unix = self.clock.now_unix();
        }
        drop(entries);
        self.persist();
    }

    /// Drop all retry state for a service, e.g. once it is observed
    /// co-located again outside of an explicit retry attempt.
    pub fn clear(&self, service: &str) {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(service).is_some() {
            drop(entries);
            self.persist();
        }
    }

    fn persist(&self) {
        let entries = self.entries.lock().unwrap();
        let file = RetryFile { entries: entries.clone() };
        drop(entries);
        let Ok(serialized) = serde_json::to_vec_pretty(&file) else { return };
        let Some(dir) = self.path.parent() else { return };
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
        let tmp = self.path.with_extension("tmp");
        if std::fs::write(&tmp, &serialized).is_err() {
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, path = %self.path.display(), "failed to persist retry state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FakeClock(AtomicI64);

    impl Clock for FakeClock {
        fn now_unix(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn state_at(dir: &Path, now: i64) -> (RetryState, std::sync::Arc<AtomicI64>) {
        let clock = std::sync::Arc::new(AtomicI64::new(now));
        let clock_clone = clock.clone();
        struct Wrapper(std::sync::Arc<AtomicI64>);
        impl Clock for Wrapper {
            fn now_unix(&self) -> i64 {
                self.0.load(Ordering::SeqCst)
            }
        }
        let state = RetryState::load_with_clock(dir.join("retry.json"), Box::new(Wrapper(clock_clone)));
        (state, clock)
    }

    #[test]
    fn fresh_service_is_always_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _clock) = state_at(dir.path(), 0);
        assert!(state.should_retry("web", &[2, 10, 60]));
    }

    #[test]
    fn backoff_blocks_until_interval_elapses() {
        let dir = tempfile::tempdir().unwrap();
        let (state, clock) = state_at(dir.path(), 0);
        state.record_attempt("web", false);
        assert!(!state.should_retry("web", &[2, 10, 60]));
        clock.store(2, Ordering::SeqCst);
        assert!(state.should_retry("web", &[2, 10, 60]));
    }

    #[test]
    fn repeated_failures_advance_the_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let (state, clock) = state_at(dir.path(), 0);
        state.record_attempt("web", false);
        clock.store(2, Ordering::SeqCst);
        state.record_attempt("web", false);
        // second failure now waits on the 10s rung, not the 2s one.
        clock.store(5, Ordering::SeqCst);
        assert!(!state.should_retry("web", &[2, 10, 60]));
        clock.store(12, Ordering::SeqCst);
        assert!(state.should_retry("web", &[2, 10, 60]));
    }

    #[test]
    fn success_clears_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _clock) = state_at(dir.path(), 0);
        state.record_attempt("web", false);
        state.record_attempt("web", true);
        assert!(state.should_retry("web", &[2, 10, 60]));
    }

    #[test]
    fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retry.json");
        let state = RetryState::load(path.clone());
        state.record_attempt("web", false);
        let reloaded = RetryState::load(path);
        assert!(!reloaded.should_retry("web", &[1000]));
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retry.json");
        std::fs::write(&path, b"not json").unwrap();
        let state = RetryState::load(path);
        assert!(state.should_retry("web", &[2, 10]));
    }
}
