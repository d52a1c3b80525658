//! Analysis Pipeline
//!
//! Decoder -> Heuristic -> (optional) CNN -> Decision Engine for one payload.
//! Pixel buffers live only inside `analyze` and are dropped on every exit path.

use std::sync::Arc;

use image::imageops;

use crate::logic::config::RuntimeConfig;
use crate::logic::decision::{self, DecisionInput};
use crate::logic::decoder::{self, DecodedImage, ImageBuffer};
use crate::logic::error::{AnalyzerError, AnalyzerResult};
use crate::logic::model::inference::{ModelStatus, OnnxClassifier, RegionClassifier};
use crate::logic::skin::{self, HeuristicReport};
use crate::logic::types::{flags, AnalysisMode, AnalysisResult, CnnScores};

/// Anything that turns a payload into an audit record. The scheduler only sees this.
pub trait ImageAnalyzer: Send + Sync {
    fn analyze(
        &self,
        payload: &ImageBuffer,
        mode: AnalysisMode,
        config: &RuntimeConfig,
    ) -> AnalyzerResult<AnalysisResult>;

    fn model_status(&self) -> Option<ModelStatus> {
        None
    }
}

/// What to do when a single inference call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceFailure {
    /// Record `CNN_FAILED` and keep the heuristic-only result
    #[default]
    Degrade,
    /// Return the error so the caller can retry
    Propagate,
}

pub struct Analyzer {
    classifier: Arc<dyn RegionClassifier>,
    on_failure: InferenceFailure,
}

impl Analyzer {
    pub fn new(classifier: Arc<dyn RegionClassifier>) -> Self {
        Self {
            classifier,
            on_failure: InferenceFailure::Degrade,
        }
    }

    /// ONNX classifier built from the config's CNN settings. The model path and
    /// preprocessing are fixed here; `enabled` and the crop ratio are read per call.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(Arc::new(OnnxClassifier::new(config.cnn.clone())))
    }

    pub fn with_failure_mode(mut self, on_failure: InferenceFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    fn score_region(
        &self,
        image: &DecodedImage,
        report: &HeuristicReport,
        mode: AnalysisMode,
        config: &RuntimeConfig,
        runtime_flags: &mut Vec<String>,
    ) -> AnalyzerResult<Option<CnnScores>> {
        if !config.cnn.enabled {
            return Ok(None);
        }
        let Some(region) = report.dominant.as_ref() else {
            return Ok(None);
        };
        if mode == AnalysisMode::Fast {
            runtime_flags.push(flags::CNN_SKIPPED.to_string());
            return Ok(None);
        }

        let bbox = region
            .bbox
            .expanded(config.cnn.crop_expand_ratio, image.width(), image.height());
        let crop = imageops::crop_imm(&image.pixels, bbox.x, bbox.y, bbox.width, bbox.height).to_image();

        match self.classifier.classify(&crop) {
            Ok(scores) => Ok(Some(scores)),
            Err(AnalyzerError::ModelUnavailable(reason)) => {
                log::warn!("CNN unavailable, heuristic-only result: {}", reason);
                runtime_flags.push(flags::CNN_UNAVAILABLE.to_string());
                Ok(None)
            }
            Err(e) if self.on_failure == InferenceFailure::Propagate && e.is_retryable() => Err(e),
            Err(e) => {
                log::warn!("CNN inference failed, heuristic-only result: {}", e);
                runtime_flags.push(flags::CNN_FAILED.to_string());
                Ok(None)
            }
        }
    }
}

impl ImageAnalyzer for Analyzer {
    fn analyze(
        &self,
        payload: &ImageBuffer,
        mode: AnalysisMode,
        config: &RuntimeConfig,
    ) -> AnalyzerResult<AnalysisResult> {
        let max_edge = match mode {
            AnalysisMode::Full => config.scheduler.full_max_edge,
            AnalysisMode::Fast => config.scheduler.fast_max_edge,
        };
        let image = decoder::decode(payload)?.downscaled(max_edge);
        let thresholds = &config.thresholds;

        let report = skin::analyze(&image.pixels, thresholds);

        let mut runtime_flags = Vec::new();
        if mode == AnalysisMode::Fast {
            runtime_flags.push(flags::FAST_MODE.to_string());
        }
        let cnn = self.score_region(&image, &report, mode, config, &mut runtime_flags)?;

        let outcome = decision::decide(
            &DecisionInput {
                skin_ratio: report.skin_ratio,
                dominant_skin_ratio: report.dominant_skin_ratio,
                coverage_score: report.coverage_score,
                pose: &report.pose,
                cnn: cnn.as_ref(),
            },
            thresholds,
        );

        let mut result_flags = outcome.flags;
        result_flags.extend(runtime_flags);

        Ok(AnalysisResult {
            width: report.width,
            height: report.height,
            skin_ratio: report.skin_ratio,
            dominant_skin_ratio: report.dominant_skin_ratio,
            coverage_score: report.coverage_score,
            edge_density: report.edge_density,
            color_std_dev: report.color_std_dev,
            pose: report.pose,
            cnn,
            decisions: outcome.decisions,
            scores: outcome.scores,
            flags: result_flags,
        })
    }

    fn model_status(&self) -> Option<ModelStatus> {
        Some(self.classifier.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::inference::CnnSettings;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SKIN: Rgb<u8> = Rgb([224, 172, 138]);

    struct FakeClassifier {
        response: AnalyzerResult<CnnScores>,
        calls: AtomicUsize,
    }

    impl FakeClassifier {
        fn new(response: AnalyzerResult<CnnScores>) -> Arc<Self> {
            Arc::new(Self { response, calls: AtomicUsize::new(0) })
        }
    }

    impl RegionClassifier for FakeClassifier {
        fn classify(&self, _crop: &RgbImage) -> AnalyzerResult<CnnScores> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }

        fn status(&self) -> ModelStatus {
            ModelStatus {
                loaded: true,
                model_path: "fake".to_string(),
                provider: "test".to_string(),
                loaded_at: None,
                last_error: None,
                avg_latency_ms: 0.0,
                inference_count: self.calls.load(Ordering::SeqCst) as u64,
            }
        }
    }

    fn png(img: RgbImage) -> ImageBuffer {
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        ImageBuffer::new(data, "image/png")
    }

    fn cnn_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.cnn.enabled = true;
        config
    }

    #[test]
    fn test_black_image_is_safe() {
        let analyzer = Analyzer::from_config(&RuntimeConfig::default());
        let result = analyzer
            .analyze(&png(RgbImage::new(64, 48)), AnalysisMode::Full, &RuntimeConfig::default())
            .unwrap();

        assert_eq!(result.width, 64);
        assert_eq!(result.skin_ratio, 0.0);
        assert!(!result.decisions.is_adult);
        assert!(!result.decisions.is_suggestive);
        assert!(!result.decisions.needs_review);
        assert!(result.has_flag(flags::NO_SKIN_REGION));
    }

    #[test]
    fn test_bare_torso_is_adult_without_cnn() {
        let analyzer = Analyzer::from_config(&RuntimeConfig::default());
        let result = analyzer
            .analyze(&png(RgbImage::from_pixel(120, 160, SKIN)), AnalysisMode::Full, &RuntimeConfig::default())
            .unwrap();

        assert!(result.decisions.is_adult);
        assert!(!result.decisions.is_suggestive);
        assert!(result.cnn.is_none());
    }

    #[test]
    fn test_uncovered_silhouette_is_adult_without_cnn() {
        let (w, h) = (220u32, 320u32);
        let img = RgbImage::from_fn(w, h, |x, y| {
            let dx = (x as f32 + 0.5 - 110.0) / 100.0;
            let dy = (y as f32 + 0.5 - 160.0) / 150.0;
            if dx * dx + dy * dy <= 1.0 { SKIN } else { Rgb([20, 20, 25]) }
        });

        let analyzer = Analyzer::from_config(&RuntimeConfig::default());
        let result = analyzer
            .analyze(&png(img), AnalysisMode::Full, &RuntimeConfig::default())
            .unwrap();

        assert!(result.decisions.is_adult, "coverage {}", result.coverage_score);
        assert!(!result.decisions.is_suggestive);
    }

    #[test]
    fn test_missing_model_degrades_to_heuristics() {
        let mut config = cnn_config();
        config.cnn.model_path = "/nonexistent/garment.onnx".to_string();
        let analyzer = Analyzer::new(Arc::new(OnnxClassifier::new(CnnSettings {
            model_path: config.cnn.model_path.clone(),
            ..Default::default()
        })));

        let result = analyzer
            .analyze(&png(RgbImage::from_pixel(120, 160, SKIN)), AnalysisMode::Full, &config)
            .unwrap();

        assert!(result.cnn.is_none());
        assert!(result.has_flag(flags::CNN_UNAVAILABLE));
        assert!(result.decisions.is_adult);
    }

    #[test]
    fn test_swimwear_probability_overrides() {
        let fake = FakeClassifier::new(Ok(CnnScores::new(0.1, 0.85, 0.05)));
        let analyzer = Analyzer::new(fake.clone());

        let result = analyzer
            .analyze(&png(RgbImage::from_pixel(120, 160, SKIN)), AnalysisMode::Full, &cnn_config())
            .unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert!(!result.decisions.is_adult);
        assert!(result.decisions.is_suggestive);
        assert!(result.has_flag(flags::CNN_SWIMWEAR));
        assert!(result.cnn.is_some());
    }

    #[test]
    fn test_fast_mode_skips_cnn() {
        let fake = FakeClassifier::new(Ok(CnnScores::new(0.9, 0.05, 0.05)));
        let analyzer = Analyzer::new(fake.clone());
        let config = cnn_config();

        let result = analyzer
            .analyze(&png(RgbImage::from_pixel(800, 600, SKIN)), AnalysisMode::Fast, &config)
            .unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
        assert!(result.is_fast_mode());
        assert!(result.has_flag(flags::CNN_SKIPPED));
        assert!(result.cnn.is_none());
        assert!(result.width <= config.scheduler.fast_max_edge);
    }

    #[test]
    fn test_inference_failure_degrades_or_propagates() {
        let fake = FakeClassifier::new(Err(AnalyzerError::Inference("boom".to_string())));
        let payload = png(RgbImage::from_pixel(60, 80, SKIN));
        let config = cnn_config();

        let degraded = Analyzer::new(fake.clone())
            .analyze(&payload, AnalysisMode::Full, &config)
            .unwrap();
        assert!(degraded.has_flag(flags::CNN_FAILED));

        let err = Analyzer::new(fake)
            .with_failure_mode(InferenceFailure::Propagate)
            .analyze(&payload, AnalysisMode::Full, &config)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        let analyzer = Analyzer::from_config(&RuntimeConfig::default());
        let err = analyzer
            .analyze(
                &ImageBuffer::new(b"definitely not an image".to_vec(), "image/png"),
                AnalysisMode::Full,
                &RuntimeConfig::default(),
            )
            .unwrap_err();

        assert!(matches!(err, AnalyzerError::Decode(_)));
    }

    #[test]
    fn test_reevaluate_reproduces_fresh_result() {
        let analyzer = Analyzer::from_config(&RuntimeConfig::default());
        let config = RuntimeConfig::default();
        let result = analyzer
            .analyze(&png(RgbImage::from_pixel(120, 160, SKIN)), AnalysisMode::Fast, &config)
            .unwrap();

        assert_eq!(decision::reevaluate(&result, &config.thresholds), result);
    }
}
