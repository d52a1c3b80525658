//! Runtime Configuration
//!
//! One immutable `RuntimeConfig` snapshot, swapped atomically on every write.
//! Workers clone the `Arc` once per work item, so an update never tears a read
//! and takes effect for the next queued item.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::error::{AnalyzerError, AnalyzerResult};
use crate::logic::model::inference::CnnSettings;
use crate::logic::model::threshold::ModerationThresholds;

// ============================================================================
// SCHEDULER SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    /// Depth above which new admissions run in fast mode
    pub queue_soft_limit: usize,
    /// Depth at which admission is refused
    pub queue_hard_limit: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff: BackoffStrategy,
    pub max_backoff_ms: u64,
    pub pressure_cooldown_ms: u64,
    pub max_batch_size: usize,
    /// Latency budget for a single analysis attempt
    pub attempt_timeout_ms: u64,
    pub full_max_edge: u32,
    pub fast_max_edge: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_soft_limit: 32,
            queue_hard_limit: 128,
            max_retries: 2,
            backoff_ms: 250,
            backoff: BackoffStrategy::Linear,
            max_backoff_ms: 10_000,
            pressure_cooldown_ms: 5_000,
            max_batch_size: 16,
            attempt_timeout_ms: 30_000,
            full_max_edge: 768,
            fast_max_edge: 384,
        }
    }
}

impl SchedulerSettings {
    pub fn normalize(&mut self) {
        self.max_workers = self.max_workers.max(1);
        self.queue_soft_limit = self.queue_soft_limit.max(1);
        if self.queue_hard_limit < self.queue_soft_limit {
            log::warn!(
                "queueHardLimit {} below queueSoftLimit {}, raising",
                self.queue_hard_limit,
                self.queue_soft_limit
            );
            self.queue_hard_limit = self.queue_soft_limit;
        }
        // A chunk must fit in the queue in one go
        if self.max_batch_size > self.queue_hard_limit {
            log::warn!(
                "maxBatchSize {} above queueHardLimit {}, lowering",
                self.max_batch_size,
                self.queue_hard_limit
            );
        }
        self.max_batch_size = self.max_batch_size.clamp(1, self.queue_hard_limit);
        self.max_backoff_ms = self.max_backoff_ms.max(self.backoff_ms);
        self.attempt_timeout_ms = self.attempt_timeout_ms.max(1);
        self.full_max_edge = self.full_max_edge.max(16);
        self.fast_max_edge = self.fast_max_edge.clamp(16, self.full_max_edge);
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match self.backoff {
            BackoffStrategy::Linear => self.backoff_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                self.backoff_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn pressure_cooldown(&self) -> Duration {
        Duration::from_millis(self.pressure_cooldown_ms)
    }
}

// ============================================================================
// MODERATION POLICY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationPolicy {
    /// Forces every moderation signal to absent. Diagnostics only.
    pub debug_bypass: bool,
}

impl ModerationPolicy {
    /// The bypass only takes effect when the process runs with diagnostics enabled
    pub fn bypass_active(&self) -> bool {
        self.bypass_allowed(constants::is_diagnostics_enabled())
    }

    pub fn bypass_allowed(&self, diagnostics: bool) -> bool {
        self.debug_bypass && diagnostics
    }
}

// ============================================================================
// RUNTIME CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub thresholds: ModerationThresholds,
    pub cnn: CnnSettings,
    pub scheduler: SchedulerSettings,
    pub moderation: ModerationPolicy,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> AnalyzerResult<Self> {
        let mut config: RuntimeConfig = serde_json::from_str(json)?;
        config.normalize();
        Ok(config)
    }

    pub fn normalize(&mut self) {
        self.thresholds.normalize();
        self.cnn.normalize();
        self.scheduler.normalize();
    }
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

pub struct ConfigStore {
    current: RwLock<Arc<RuntimeConfig>>,
    version: AtomicU64,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl ConfigStore {
    pub fn new(mut config: RuntimeConfig) -> Self {
        config.normalize();
        Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
        }
    }

    /// Load from the configured path, falling back to defaults when the file is absent
    pub fn from_default_path() -> AnalyzerResult<Self> {
        let store = Self::default();
        let path = constants::get_config_path();
        if path.exists() {
            store.load_file(&path)?;
        } else {
            log::info!("No config at {}, using defaults", path.display());
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Swap in a new config. Returns the new version.
    pub fn replace(&self, mut config: RuntimeConfig) -> u64 {
        config.normalize();
        let mut current = self.current.write();
        *current = Arc::new(config);
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A parse failure leaves the previous snapshot in place
    pub fn apply_json(&self, json: &str) -> AnalyzerResult<u64> {
        let config = RuntimeConfig::from_json(json)?;
        let version = self.replace(config);
        log::info!("Runtime config applied (version {})", version);
        Ok(version)
    }

    pub fn load_file(&self, path: &Path) -> AnalyzerResult<u64> {
        let content = fs::read_to_string(path)
            .map_err(|e| AnalyzerError::Config(format!("{}: {}", path.display(), e)))?;
        self.apply_json(&content)
    }

    /// Reload whenever the file changes. Drop the returned watcher to stop.
    pub fn watch(self: &Arc<Self>, path: impl Into<PathBuf>) -> AnalyzerResult<RecommendedWatcher> {
        let path: PathBuf = path.into();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let store = Arc::clone(self);
        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Config watcher error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            if !event.paths.iter().any(|p| p.file_name() == target.file_name()) {
                return;
            }
            if let Err(e) = store.load_file(&target) {
                log::warn!("Config reload failed, keeping previous snapshot: {}", e);
            }
        })
        .map_err(|e| AnalyzerError::Config(format!("watcher: {}", e)))?;

        // Watch the directory so editors that replace the file are still seen
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| AnalyzerError::Config(format!("watch {}: {}", dir.display(), e)))?;

        log::info!("Watching config file {}", path.display());
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hard_limit_raised_to_soft_limit() {
        let store = ConfigStore::default();
        store
            .apply_json(r#"{"scheduler": {"queueSoftLimit": 50, "queueHardLimit": 10}}"#)
            .unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.scheduler.queue_soft_limit, 50);
        assert_eq!(snap.scheduler.queue_hard_limit, 50);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{"thresholds": {"nudeSkinRatio": 0.5}}"#).unwrap();
        assert_eq!(config.thresholds.nude_skin_ratio, 0.5);
        assert_eq!(config.thresholds.suggestive_skin_ratio, 0.2);
        assert_eq!(config.scheduler.max_workers, 4);
        assert!(!config.cnn.enabled);
    }

    #[test]
    fn test_bad_json_keeps_previous_snapshot() {
        let store = ConfigStore::default();
        let before = store.version();
        let err = store.apply_json("{not json").unwrap_err();

        assert!(matches!(err, AnalyzerError::Config(_)));
        assert_eq!(store.version(), before);
        assert_eq!(*store.snapshot(), {
            let mut d = RuntimeConfig::default();
            d.normalize();
            d
        });
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let store = ConfigStore::default();
        let old = store.snapshot();
        let version = store
            .apply_json(r#"{"thresholds": {"nudeSkinRatio": 0.9}}"#)
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(old.thresholds.nude_skin_ratio, 0.35);
        assert_eq!(store.snapshot().thresholds.nude_skin_ratio, 0.9);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler": {{"maxWorkers": 2, "backoff": "exponential"}}}}"#).unwrap();

        let store = ConfigStore::default();
        store.load_file(file.path()).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.scheduler.max_workers, 2);
        assert_eq!(snap.scheduler.backoff, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let store = ConfigStore::default();
        let err = store.load_file(Path::new("/nonexistent/image-risk.json")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_backoff_delays() {
        let mut s = SchedulerSettings {
            backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(s.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(s.backoff_delay(3), Duration::from_millis(300));

        s.backoff = BackoffStrategy::Exponential;
        assert_eq!(s.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(s.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(s.backoff_delay(10), Duration::from_millis(1_000));
        assert_eq!(s.backoff_delay(80), Duration::from_millis(1_000));
    }

    #[test]
    fn test_bypass_is_off_by_default() {
        assert!(!RuntimeConfig::default().moderation.debug_bypass);
        assert!(!ModerationPolicy::default().bypass_allowed(true));
    }

    #[test]
    fn test_bypass_requires_diagnostics() {
        let policy = ModerationPolicy { debug_bypass: true };
        assert!(policy.bypass_allowed(true));
        assert!(!policy.bypass_allowed(false));
    }

    #[test]
    fn test_batch_size_clamped_to_hard_limit() {
        let config = RuntimeConfig::from_json(
            r#"{"scheduler": {"queueSoftLimit": 4, "queueHardLimit": 8, "maxBatchSize": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_batch_size, 8);

        let config = RuntimeConfig::from_json(r#"{"scheduler": {"maxBatchSize": 0}}"#).unwrap();
        assert_eq!(config.scheduler.max_batch_size, 1);
    }

    /// Poll until `check` holds or two seconds pass
    fn wait_for(check: impl Fn() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        check()
    }

    #[test]
    fn test_watch_reloads_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"thresholds": {"nudeSkinRatio": 0.4}}"#).unwrap();

        let store = Arc::new(ConfigStore::default());
        store.load_file(&path).unwrap();
        let before = store.version();

        let _watcher = store.watch(&path).unwrap();
        fs::write(&path, r#"{"thresholds": {"nudeSkinRatio": 0.7}}"#).unwrap();

        assert!(wait_for(|| store.snapshot().thresholds.nude_skin_ratio == 0.7));
        assert!(store.version() > before);
    }

    #[test]
    fn test_watch_keeps_snapshot_on_malformed_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"scheduler": {"maxWorkers": 3}}"#).unwrap();

        let store = Arc::new(ConfigStore::default());
        store.load_file(&path).unwrap();
        let version = store.version();

        let _watcher = store.watch(&path).unwrap();
        fs::write(&path, "{\"scheduler\": ").unwrap();
        // Unrelated file in the same directory must not trigger a reload
        fs::write(dir.path().join("other.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(300));

        assert_eq!(store.version(), version);
        assert_eq!(store.snapshot().scheduler.max_workers, 3);
    }
}
