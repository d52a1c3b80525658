//! Moderation Threshold Configuration
//!
//! Every boundary the heuristic analyzer, CNN fusion and decision engine compare
//! against. All comparisons against these values are inclusive.

use serde::{Deserialize, Serialize};

/// Threshold Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationThresholds {
    /// Skin ratio at which an image can be adult
    pub nude_skin_ratio: f32,

    /// Skin ratio at which an image can be suggestive
    pub suggestive_skin_ratio: f32,

    /// Coverage score at or below which skin counts as uncovered (adult)
    pub nude_coverage_max: f32,

    /// Coverage score at or below which skin counts as lightly covered (suggestive)
    pub suggestive_coverage_max: f32,

    /// Torso presence confidence needed to call a torso present
    pub torso_presence_min: f32,

    /// Hip presence confidence needed to call hips present
    pub hip_presence_min: f32,

    /// Limb dominance confidence at or above which skin is treated as limbs only
    pub limb_dominance_max: f32,

    /// Horizontal centroid offset (0..0.5) at or above which the subject is off-center
    pub off_center_tolerance: f32,

    /// Distance from a boundary that still counts as "near" for review
    pub review_margin: f32,

    /// Row skin fraction needed for a row to count towards silhouette continuity
    pub row_coverage_min: f32,

    // --- coverage normalisation denominators ---
    pub edge_density_norm: f32,
    pub color_std_norm: f32,
    pub skin_gap_norm: f32,

    // --- CNN fusion ---
    /// Minimum P(nude) - P(swimwear) to confirm a heuristic adult guess
    pub cnn_nude_delta: f32,

    /// Minimum P(swimwear) that overrides the heuristic towards suggestive
    pub cnn_swimwear_min: f32,

    /// Minimum P(nude) - P(swimwear) that marks an undecided image suggestive
    pub cnn_review_delta: f32,

    /// Minimum P(ambiguous) that dampens the adult score and forces review
    pub cnn_ambiguous_delta: f32,

    // --- metadata tag-frequency thresholds ---
    pub metadata_adult: f32,
    pub metadata_minor: f32,
    pub metadata_beast: f32,
}

impl Default for ModerationThresholds {
    fn default() -> Self {
        Self {
            nude_skin_ratio: 0.35,
            suggestive_skin_ratio: 0.2,
            nude_coverage_max: 0.35,
            suggestive_coverage_max: 0.55,
            torso_presence_min: 0.45,
            hip_presence_min: 0.45,
            limb_dominance_max: 0.6,
            off_center_tolerance: 0.3,
            review_margin: 0.05,
            row_coverage_min: 0.45,
            edge_density_norm: 0.15,
            color_std_norm: 64.0,
            skin_gap_norm: 1.0,
            cnn_nude_delta: 0.25,
            cnn_swimwear_min: 0.6,
            cnn_review_delta: 0.15,
            cnn_ambiguous_delta: 0.5,
            metadata_adult: 0.2,
            metadata_minor: 0.05,
            metadata_beast: 0.05,
        }
    }
}

impl ModerationThresholds {
    /// Clamp every field into its valid range. Applied on every config write.
    pub fn normalize(&mut self) {
        let unit = [
            &mut self.nude_skin_ratio,
            &mut self.suggestive_skin_ratio,
            &mut self.nude_coverage_max,
            &mut self.suggestive_coverage_max,
            &mut self.torso_presence_min,
            &mut self.hip_presence_min,
            &mut self.limb_dominance_max,
            &mut self.review_margin,
            &mut self.row_coverage_min,
            &mut self.cnn_swimwear_min,
            &mut self.cnn_ambiguous_delta,
            &mut self.metadata_adult,
            &mut self.metadata_minor,
            &mut self.metadata_beast,
        ];
        for value in unit {
            *value = sanitize(*value, 0.0).clamp(0.0, 1.0);
        }

        self.off_center_tolerance = sanitize(self.off_center_tolerance, 0.3).clamp(0.0, 0.5);
        self.cnn_nude_delta = sanitize(self.cnn_nude_delta, 0.25).clamp(-1.0, 1.0);
        self.cnn_review_delta = sanitize(self.cnn_review_delta, 0.15).clamp(-1.0, 1.0);

        // Denominators must stay positive
        self.edge_density_norm = positive(self.edge_density_norm, 0.15);
        self.color_std_norm = positive(self.color_std_norm, 64.0);
        self.skin_gap_norm = positive(self.skin_gap_norm, 1.0);
    }
}

fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn positive(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 { value } else { fallback }
}
