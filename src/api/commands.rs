//! Commands - API for collaborators
//!
//! One process-wide `Engine` (config store, analyzer, scheduler, term matcher).
//! The free functions below are thin wrappers over the global instance.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::engine_status::EngineStatus;
use crate::constants;
use crate::logic::analyzer::{Analyzer, ImageAnalyzer, InferenceFailure};
use crate::logic::config::ConfigStore;
use crate::logic::decoder::ImageBuffer;
use crate::logic::error::AnalyzerError;
use crate::logic::moderation::{self, ModerationVerdict, RescanOutcome, StoredAsset, TermLists, TermMatcher, TextSignals};
use crate::logic::scheduler::Scheduler;
use crate::logic::types::AnalysisResult;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Error payload returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: String,
    pub message: String,
}

impl From<AnalyzerError> for CommandError {
    fn from(err: AnalyzerError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl CommandError {
    fn not_initialized() -> Self {
        Self {
            kind: "not_initialized".to_string(),
            message: "engine not initialized".to_string(),
        }
    }
}

/// One upload in a bulk import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub data: Vec<u8>,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: Arc<ConfigStore>,
    analyzer: Arc<Analyzer>,
    scheduler: Scheduler,
    matcher: RwLock<Arc<TermMatcher>>,
}

impl Engine {
    /// Build and start workers. Must run inside a tokio runtime.
    pub fn new(config: Arc<ConfigStore>) -> Result<Self, CommandError> {
        let snapshot = config.snapshot();
        // Scheduled work surfaces inference errors so they can be retried
        let analyzer = Arc::new(Analyzer::from_config(&snapshot).with_failure_mode(InferenceFailure::Propagate));
        let scheduler = Scheduler::new(analyzer.clone(), Arc::clone(&config));
        scheduler.start();

        Ok(Self {
            config,
            analyzer,
            scheduler,
            matcher: RwLock::new(Arc::new(TermMatcher::new(&TermLists::default())?)),
        })
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn analyze_image(&self, data: Vec<u8>, content_type: &str) -> Result<AnalysisResult, CommandError> {
        Ok(self.scheduler.analyze(ImageBuffer::new(data, content_type)).await?)
    }

    pub async fn analyze_batch(&self, items: Vec<ImagePayload>) -> Vec<BatchItemResult> {
        let payloads = items
            .into_iter()
            .map(|item| ImageBuffer::new(item.data, &item.content_type))
            .collect();

        self.scheduler
            .run_batch(payloads)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                Ok(result) => BatchItemResult { index, result: Some(result), error: None },
                Err(e) => BatchItemResult { index, result: None, error: Some(e.into()) },
            })
            .collect()
    }

    pub fn cancel_analysis(&self, id: &str) -> Result<bool, CommandError> {
        let id = Uuid::parse_str(id).map_err(|e| CommandError {
            kind: "invalid_id".to_string(),
            message: e.to_string(),
        })?;
        Ok(self.scheduler.cancel(id))
    }

    /// Keyword signals over free text plus tag-frequency scores from a metadata header
    pub fn scan_text(&self, texts: &[String], metadata: Option<&Value>) -> TextSignals {
        let matcher = self.matcher.read().clone();
        let signals = matcher.keyword_signals(texts);
        match metadata {
            Some(header) => signals.merge(&matcher.scan_metadata(header)),
            None => signals,
        }
    }

    pub fn set_term_lists(&self, lists: &TermLists) -> Result<(), CommandError> {
        let matcher = TermMatcher::new(lists)?;
        *self.matcher.write() = Arc::new(matcher);
        log::info!("Term lists replaced");
        Ok(())
    }

    pub fn moderate_asset(&self, analysis: Option<&AnalysisResult>, signals: &TextSignals) -> ModerationVerdict {
        let config = self.config.snapshot();
        moderation::moderate(analysis, signals, &config).1
    }

    pub fn rescan_assets(&self, assets: &[StoredAsset]) -> Vec<RescanOutcome> {
        moderation::rescan(assets, &self.config.snapshot())
    }

    pub fn reload_config(&self, json: Option<&str>) -> Result<u64, CommandError> {
        let version = match json {
            Some(json) => self.config.apply_json(json)?,
            None => self.config.load_file(&constants::get_config_path())?,
        };
        Ok(version)
    }

    pub fn status(&self) -> EngineStatus {
        let config = self.config.snapshot();
        EngineStatus {
            app_version: constants::APP_VERSION.to_string(),
            config_version: self.config.version(),
            cnn_enabled: config.cnn.enabled,
            model: self.analyzer.model_status(),
            scheduler: self.scheduler.metrics(),
            diagnostics: constants::is_diagnostics_enabled(),
            bypass_active: config.moderation.bypass_active(),
        }
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

// ============================================================================
// GLOBAL INSTANCE
// ============================================================================

static ENGINE: OnceCell<Engine> = OnceCell::new();

/// Initialize the global engine once. Later calls return the existing one.
pub fn init(config: Arc<ConfigStore>) -> Result<&'static Engine, CommandError> {
    ENGINE.get_or_try_init(|| Engine::new(config))
}

fn engine() -> Result<&'static Engine, CommandError> {
    ENGINE.get().ok_or_else(CommandError::not_initialized)
}

// ============================================================================
// COMMANDS
// ============================================================================

pub async fn analyze_image(data: Vec<u8>, content_type: String) -> Result<AnalysisResult, CommandError> {
    engine()?.analyze_image(data, &content_type).await
}

pub async fn analyze_batch(items: Vec<ImagePayload>) -> Result<Vec<BatchItemResult>, CommandError> {
    Ok(engine()?.analyze_batch(items).await)
}

pub async fn cancel_analysis(id: String) -> Result<bool, CommandError> {
    engine()?.cancel_analysis(&id)
}

pub async fn scan_text(texts: Vec<String>, metadata: Option<Value>) -> Result<TextSignals, CommandError> {
    Ok(engine()?.scan_text(&texts, metadata.as_ref()))
}

pub async fn set_term_lists(lists: TermLists) -> Result<bool, CommandError> {
    engine()?.set_term_lists(&lists)?;
    Ok(true)
}

pub async fn moderate_asset(
    analysis: Option<AnalysisResult>,
    signals: TextSignals,
) -> Result<ModerationVerdict, CommandError> {
    Ok(engine()?.moderate_asset(analysis.as_ref(), &signals))
}

pub async fn rescan_assets(assets: Vec<StoredAsset>) -> Result<Vec<RescanOutcome>, CommandError> {
    Ok(engine()?.rescan_assets(&assets))
}

pub async fn get_engine_status() -> Result<EngineStatus, CommandError> {
    Ok(engine()?.status())
}

pub async fn reload_config(json: Option<String>) -> Result<u64, CommandError> {
    engine()?.reload_config(json.as_deref())
}
