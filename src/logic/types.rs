//! Analysis result types
//!
//! `AnalysisResult` is the audit record handed to the asset-storage collaborator.
//! It is immutable once produced and carries every numeric signal needed to
//! recompute decisions later without touching pixels again.

use serde::{Deserialize, Serialize};

/// Analysis depth chosen at queue admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Full working resolution, CNN fusion when enabled
    #[default]
    Full,
    /// Reduced working edge, heuristic only
    Fast,
}

/// Torso/hip presence proxy computed from the dominant skin region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoseEstimate {
    pub torso_coverage: f32,
    pub hip_coverage: f32,
    pub shoulder_coverage: f32,
    pub torso_presence_confidence: f32,
    pub hip_presence_confidence: f32,
    pub limb_dominance_confidence: f32,
    pub off_center_distance: f32,
    pub torso_continuity: f32,
    pub overall_central_coverage: f32,
}

/// Classifier output for the cropped dominant region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CnnScores {
    pub nude: f32,
    pub swimwear: f32,
    pub ambiguous: f32,
    /// P(nude) - P(swimwear)
    pub delta: f32,
    pub provider: String,
    pub inference_ms: f32,
}

impl CnnScores {
    pub fn new(nude: f32, swimwear: f32, ambiguous: f32) -> Self {
        Self {
            nude,
            swimwear,
            ambiguous,
            delta: nude - swimwear,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Decisions {
    pub is_adult: bool,
    pub is_suggestive: bool,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RiskScores {
    pub adult: f32,
    pub suggestive: f32,
}

/// Per-image audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub width: u32,
    pub height: u32,
    pub skin_ratio: f32,
    pub dominant_skin_ratio: f32,
    pub coverage_score: f32,
    pub edge_density: f32,
    pub color_std_dev: f32,
    pub pose: PoseEstimate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnn: Option<CnnScores>,
    pub decisions: Decisions,
    pub scores: RiskScores,
    pub flags: Vec<String>,
}

impl AnalysisResult {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_fast_mode(&self) -> bool {
        self.has_flag(flags::FAST_MODE)
    }
}

/// Flag tokens recorded on `AnalysisResult::flags`, in the order they are raised
pub mod flags {
    pub const SKIN_RATIO_HIGH: &str = "SKIN_RATIO_HIGH";
    pub const SKIN_RATIO_ELEVATED: &str = "SKIN_RATIO_ELEVATED";
    pub const LOW_COVERAGE: &str = "LOW_COVERAGE";
    pub const TORSO_DETECTED: &str = "TORSO_DETECTED";
    pub const HIP_DETECTED: &str = "HIP_DETECTED";
    pub const LIMB_DOMINANT: &str = "LIMB_DOMINANT";
    pub const TORSO_OFF_CENTER: &str = "TORSO_OFF_CENTER";
    pub const NO_SKIN_REGION: &str = "NO_SKIN_REGION";
    pub const NEAR_THRESHOLD: &str = "NEAR_THRESHOLD";
    pub const POSE_AMBIGUOUS: &str = "POSE_AMBIGUOUS";
    pub const ADULT_POSE_CONFLICT: &str = "ADULT_POSE_CONFLICT";
    pub const CNN_CONFIRMED_ADULT: &str = "CNN_CONFIRMED_ADULT";
    pub const CNN_SWIMWEAR: &str = "CNN_SWIMWEAR";
    pub const CNN_REVIEW: &str = "CNN_REVIEW";
    pub const CNN_AMBIGUOUS: &str = "CNN_AMBIGUOUS";
    pub const CNN_UNAVAILABLE: &str = "CNN_UNAVAILABLE";
    pub const CNN_FAILED: &str = "CNN_FAILED";
    pub const CNN_SKIPPED: &str = "CNN_SKIPPED";
    pub const FAST_MODE: &str = "FAST_MODE";

    /// Flags describing how the analysis ran rather than what it found.
    /// They survive re-evaluation untouched.
    pub const RUNTIME: [&str; 4] = [CNN_UNAVAILABLE, CNN_FAILED, CNN_SKIPPED, FAST_MODE];
}
