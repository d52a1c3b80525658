//! Inference Engine - ONNX Runtime Integration
//!
//! 3-class garment classifier (nude / swimwear / ambiguous) over the cropped
//! dominant skin region. The session is loaded lazily, once, and shared
//! read-only by every worker. A missing or broken model is reported as
//! `ModelUnavailable` so the analyzer can fall back to heuristics.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::{imageops, RgbImage};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::error::{AnalyzerError, AnalyzerResult};
use crate::logic::types::CnnScores;

pub const EXECUTION_PROVIDER: &str = "CPUExecutionProvider";

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CnnSettings {
    pub enabled: bool,
    pub model_path: String,
    /// Square model input edge
    pub input_size: u32,
    /// Dominant-region box growth on every side before cropping
    pub crop_expand_ratio: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub nude_index: usize,
    pub swimwear_index: usize,
    pub ambiguous_index: usize,
    /// How long a call waits for a session another call is still using
    pub session_wait_ms: u64,
}

impl Default for CnnSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: constants::get_model_path(),
            input_size: 224,
            crop_expand_ratio: 0.15,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            nude_index: 0,
            swimwear_index: 1,
            ambiguous_index: 2,
            session_wait_ms: 2_000,
        }
    }
}

impl CnnSettings {
    pub fn normalize(&mut self) {
        self.input_size = self.input_size.clamp(16, 1024);
        if !self.crop_expand_ratio.is_finite() {
            self.crop_expand_ratio = 0.15;
        }
        self.crop_expand_ratio = self.crop_expand_ratio.clamp(0.0, 1.0);
        for s in self.std.iter_mut() {
            if !s.is_finite() || *s <= 0.0 {
                *s = 1.0;
            }
        }
        self.session_wait_ms = self.session_wait_ms.max(1);
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Model status for the operations dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub loaded: bool,
    pub model_path: String,
    pub provider: String,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub avg_latency_ms: f32,
    pub inference_count: u64,
}

// ============================================================================
// CLASSIFIER TRAIT
// ============================================================================

/// Region classifier (ONNX today; anything that scores a crop works)
pub trait RegionClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> AnalyzerResult<CnnScores>;
    fn status(&self) -> ModelStatus;
}

// ============================================================================
// SESSION GATE
// ============================================================================

/// Exclusive access to a native session with a bounded wait.
///
/// A call that cannot get the session within `wait` marks the gate stalled and
/// reports `ModelUnavailable`. While stalled, callers fail fast instead of
/// queueing behind a hung call. The flag clears once the holder returns.
pub struct SessionGate<T> {
    inner: Mutex<T>,
    wait: Duration,
    stalled: AtomicBool,
}

impl<T> SessionGate<T> {
    pub fn new(inner: T, wait: Duration) -> Self {
        Self {
            inner: Mutex::new(inner),
            wait,
            stalled: AtomicBool::new(false),
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> AnalyzerResult<R>) -> AnalyzerResult<R> {
        if self.is_stalled() {
            return Err(AnalyzerError::ModelUnavailable("inference session stalled".to_string()));
        }

        let Some(mut guard) = self.inner.try_lock_for(self.wait) else {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                log::warn!("Inference session busy for over {:?}, marking stalled", self.wait);
            }
            return Err(AnalyzerError::ModelUnavailable(format!(
                "inference session busy for over {} ms",
                self.wait.as_millis()
            )));
        };

        let result = f(&mut guard);
        drop(guard);
        if self.stalled.swap(false, Ordering::SeqCst) {
            log::info!("Inference session recovered");
        }
        result
    }
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

pub struct OnnxClassifier {
    settings: CnnSettings,
    session: OnceCell<Result<SessionGate<Session>, String>>,
    loaded_at: OnceCell<DateTime<Utc>>,
    latency_sum_us: AtomicU64,
    inference_count: AtomicU64,
}

impl OnnxClassifier {
    pub fn new(settings: CnnSettings) -> Self {
        Self {
            settings,
            session: OnceCell::new(),
            loaded_at: OnceCell::new(),
            latency_sum_us: AtomicU64::new(0),
            inference_count: AtomicU64::new(0),
        }
    }

    /// Lazily load the session. Concurrent callers block until the first load finishes.
    fn session(&self) -> AnalyzerResult<&SessionGate<Session>> {
        let loaded = self.session.get_or_init(|| {
            let result = load_session(&self.settings.model_path);
            if result.is_ok() {
                let _ = self.loaded_at.set(Utc::now());
            }
            let wait = Duration::from_millis(self.settings.session_wait_ms);
            result.map(|session| SessionGate::new(session, wait))
        });

        loaded
            .as_ref()
            .map_err(|e| AnalyzerError::ModelUnavailable(e.clone()))
    }

    fn run(&self, crop: &RgbImage) -> AnalyzerResult<Vec<f32>> {
        let input = preprocess(crop, &self.settings);
        let input_tensor = Value::from_array(input)
            .map_err(|e| AnalyzerError::Inference(format!("Tensor error: {}", e)))?;

        self.session()?.with(|session| {
            let output_name = session.outputs.first()
                .map(|o| o.name.clone())
                .ok_or_else(|| AnalyzerError::Inference("No output defined".to_string()))?;

            let outputs = session.run(ort::inputs![input_tensor])
                .map_err(|e| AnalyzerError::Inference(format!("Inference failed: {}", e)))?;

            let output = outputs.get(&output_name)
                .ok_or_else(|| AnalyzerError::Inference("No output".to_string()))?;

            let (_, data) = output.try_extract_tensor::<f32>()
                .map_err(|e| AnalyzerError::Inference(format!("Extract error: {}", e)))?;

            Ok(data.to_vec())
        })
    }
}

impl RegionClassifier for OnnxClassifier {
    fn classify(&self, crop: &RgbImage) -> AnalyzerResult<CnnScores> {
        let start = Instant::now();
        let logits = self.run(crop)?;
        let probs = softmax(&logits);

        let pick = |idx: usize| {
            probs.get(idx).copied().ok_or_else(|| {
                AnalyzerError::Inference(format!(
                    "model produced {} classes, index {} missing",
                    probs.len(),
                    idx
                ))
            })
        };
        let nude = pick(self.settings.nude_index)?;
        let swimwear = pick(self.settings.swimwear_index)?;
        let ambiguous = pick(self.settings.ambiguous_index)?;

        let elapsed = start.elapsed();
        self.latency_sum_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.inference_count.fetch_add(1, Ordering::Relaxed);

        Ok(CnnScores {
            provider: EXECUTION_PROVIDER.to_string(),
            inference_ms: elapsed.as_secs_f32() * 1000.0,
            ..CnnScores::new(nude, swimwear, ambiguous)
        })
    }

    fn status(&self) -> ModelStatus {
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        let count = self.inference_count.load(Ordering::Relaxed);
        let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

        let (loaded, last_error) = match self.session.get() {
            Some(Ok(gate)) if gate.is_stalled() => (true, Some("inference session stalled".to_string())),
            Some(Ok(_)) => (true, None),
            Some(Err(e)) => (false, Some(e.clone())),
            None => (false, None),
        };

        ModelStatus {
            loaded,
            model_path: self.settings.model_path.clone(),
            provider: EXECUTION_PROVIDER.to_string(),
            loaded_at: self.loaded_at.get().copied(),
            last_error,
            avg_latency_ms: avg,
            inference_count: count,
        }
    }
}

/// Load ONNX model from file
fn load_session(model_path: &str) -> Result<Session, String> {
    log::info!("Loading ONNX model from: {}", model_path);

    if !Path::new(model_path).exists() {
        let msg = format!("Model not found: {}", model_path);
        log::warn!("{} - CNN fusion disabled, using heuristics only", msg);
        return Err(msg);
    }

    let session = Session::builder()
        .map_err(|e| format!("Failed to create session builder: {}", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| format!("Failed to set optimization: {}", e))?
        .commit_from_file(model_path)
        .map_err(|e| format!("Failed to load model: {}", e))?;

    log::info!("ONNX model loaded successfully");
    Ok(session)
}

// ============================================================================
// PRE/POST PROCESSING
// ============================================================================

/// Resize to the square model input and normalise per channel, NCHW
pub fn preprocess(crop: &RgbImage, settings: &CnnSettings) -> Array4<f32> {
    let size = settings.input_size;
    let resized = imageops::resize(crop, size, size, imageops::FilterType::Triangle);

    let n = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            input[[0, c, y as usize, x as usize]] = (v - settings.mean[c]) / settings.std[c];
        }
    }
    input
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
