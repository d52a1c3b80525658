//! Decision Engine
//!
//! Raw heuristic (+ optional CNN) signals -> {isAdult, isSuggestive, needsReview}
//! plus numeric scores and flags. Pure function of its inputs and the thresholds
//! passed in, so stored results can be re-evaluated after a threshold change.

use crate::logic::model::fusion;
use crate::logic::model::threshold::ModerationThresholds;
use crate::logic::types::{flags, AnalysisResult, CnnScores, Decisions, PoseEstimate, RiskScores};

/// Numeric signals the engine decides on
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub skin_ratio: f32,
    pub dominant_skin_ratio: f32,
    pub coverage_score: f32,
    pub pose: &'a PoseEstimate,
    pub cnn: Option<&'a CnnScores>,
}

impl<'a> DecisionInput<'a> {
    pub fn from_result(result: &'a AnalysisResult) -> Self {
        Self {
            skin_ratio: result.skin_ratio,
            dominant_skin_ratio: result.dominant_skin_ratio,
            coverage_score: result.coverage_score,
            pose: &result.pose,
            cnn: result.cnn.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionOutcome {
    pub decisions: Decisions,
    pub scores: RiskScores,
    pub flags: Vec<String>,
}

/// Pose-derived booleans, all inclusive at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoseSignals {
    torso_present: bool,
    hip_present: bool,
    limb_dominant: bool,
    off_center: bool,
}

impl PoseSignals {
    fn from(pose: &PoseEstimate, t: &ModerationThresholds) -> Self {
        Self {
            torso_present: pose.torso_presence_confidence >= t.torso_presence_min,
            hip_present: pose.hip_presence_confidence >= t.hip_presence_min,
            limb_dominant: pose.limb_dominance_confidence >= t.limb_dominance_max,
            off_center: pose.off_center_distance >= t.off_center_tolerance,
        }
    }
}

pub fn decide(input: &DecisionInput<'_>, t: &ModerationThresholds) -> DecisionOutcome {
    let mut out = DecisionOutcome::default();
    let pose = PoseSignals::from(input.pose, t);

    let skin_high = input.skin_ratio >= t.nude_skin_ratio;
    let skin_elevated = input.skin_ratio >= t.suggestive_skin_ratio;
    let nude_coverage = input.coverage_score <= t.nude_coverage_max;
    let light_coverage = input.coverage_score <= t.suggestive_coverage_max;

    // --- threshold crossings, for audit ---
    let crossings = [
        (skin_high, flags::SKIN_RATIO_HIGH),
        (skin_elevated, flags::SKIN_RATIO_ELEVATED),
        (input.dominant_skin_ratio > 0.0 && nude_coverage, flags::LOW_COVERAGE),
        (pose.torso_present, flags::TORSO_DETECTED),
        (pose.hip_present, flags::HIP_DETECTED),
        (input.dominant_skin_ratio > 0.0 && pose.limb_dominant, flags::LIMB_DOMINANT),
        (input.dominant_skin_ratio > 0.0 && pose.off_center, flags::TORSO_OFF_CENTER),
        (input.dominant_skin_ratio <= 0.0, flags::NO_SKIN_REGION),
    ];
    out.flags.extend(
        crossings
            .iter()
            .filter(|(hit, _)| *hit)
            .map(|(_, flag)| flag.to_string()),
    );

    // --- heuristic decisions ---
    out.decisions.is_adult = skin_high && nude_coverage && pose.torso_present && pose.hip_present;
    out.decisions.is_suggestive = !out.decisions.is_adult
        && skin_elevated
        && light_coverage
        && (pose.torso_present || pose.hip_present)
        && !pose.limb_dominant;

    out.scores = heuristic_scores(input, t);

    // --- CNN refinement ---
    let mut force_review = false;
    if let Some(cnn) = input.cnn {
        let effect = fusion::apply(
            cnn,
            skin_high && nude_coverage,
            &mut out.decisions,
            &mut out.scores,
            &mut out.flags,
            t,
        );
        force_review = effect.force_review;
    }

    // --- review ---
    let near_boundary = !out.decisions.is_adult
        && !out.decisions.is_suggestive
        && input.skin_ratio > 0.0
        && is_near_boundary(input, t);
    let pose_ambiguous = skin_elevated
        && (near(input.pose.torso_presence_confidence, t.torso_presence_min, t.review_margin)
            || near(input.pose.hip_presence_confidence, t.hip_presence_min, t.review_margin));
    let pose_conflict = out.decisions.is_adult && (pose.limb_dominant || pose.off_center);

    if near_boundary {
        out.flags.push(flags::NEAR_THRESHOLD.to_string());
    }
    if pose_ambiguous {
        out.flags.push(flags::POSE_AMBIGUOUS.to_string());
    }
    if pose_conflict {
        out.flags.push(flags::ADULT_POSE_CONFLICT.to_string());
    }

    out.decisions.needs_review = force_review || near_boundary || pose_ambiguous || pose_conflict;
    out
}

fn near(value: f32, boundary: f32, margin: f32) -> bool {
    (value - boundary).abs() <= margin
}

fn is_near_boundary(input: &DecisionInput<'_>, t: &ModerationThresholds) -> bool {
    let m = t.review_margin;
    let skin_near = near(input.skin_ratio, t.nude_skin_ratio, m)
        || near(input.skin_ratio, t.suggestive_skin_ratio, m);
    let coverage_near = input.skin_ratio >= t.suggestive_skin_ratio - m
        && (near(input.coverage_score, t.nude_coverage_max, m)
            || near(input.coverage_score, t.suggestive_coverage_max, m));
    skin_near || coverage_near
}

fn ratio_factor(value: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        if value > 0.0 { 1.0 } else { 0.0 }
    } else {
        (value / threshold).clamp(0.0, 1.0)
    }
}

/// Heuristic-only scores. Coverage only ever enters as (1 - coverage), so more
/// garment signal can never raise a score.
pub fn heuristic_scores(input: &DecisionInput<'_>, t: &ModerationThresholds) -> RiskScores {
    let uncovered = (1.0 - input.coverage_score).clamp(0.0, 1.0);
    let torso = input.pose.torso_presence_confidence.clamp(0.0, 1.0);
    let hip = input.pose.hip_presence_confidence.clamp(0.0, 1.0);
    let limb = input.pose.limb_dominance_confidence.clamp(0.0, 1.0);

    let adult = ratio_factor(input.skin_ratio, t.nude_skin_ratio)
        * uncovered
        * (0.5 + 0.25 * torso + 0.25 * hip);

    let suggestive = ratio_factor(input.skin_ratio, t.suggestive_skin_ratio)
        * uncovered
        * (0.5 + 0.5 * torso.max(hip))
        * (1.0 - 0.5 * limb);

    RiskScores {
        adult: adult.clamp(0.0, 1.0),
        suggestive: suggestive.clamp(0.0, 1.0),
    }
}

/// Recompute decisions, scores and signal flags of a stored result under
/// `thresholds`. Runtime flags (fast mode, CNN availability) are carried over.
pub fn reevaluate(result: &AnalysisResult, thresholds: &ModerationThresholds) -> AnalysisResult {
    let outcome = decide(&DecisionInput::from_result(result), thresholds);

    let mut updated = result.clone();
    updated.decisions = outcome.decisions;
    updated.scores = outcome.scores;
    updated.flags = outcome.flags;
    updated.flags.extend(
        result
            .flags
            .iter()
            .filter(|f| flags::RUNTIME.contains(&f.as_str()))
            .cloned(),
    );
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(torso: f32, hip: f32) -> PoseEstimate {
        PoseEstimate {
            torso_presence_confidence: torso,
            hip_presence_confidence: hip,
            limb_dominance_confidence: crate::logic::skin::pose::limb_dominance(torso, hip, torso.max(hip)),
            ..Default::default()
        }
    }

    fn input<'a>(skin: f32, coverage: f32, pose: &'a PoseEstimate, cnn: Option<&'a CnnScores>) -> DecisionInput<'a> {
        DecisionInput {
            skin_ratio: skin,
            dominant_skin_ratio: skin,
            coverage_score: coverage,
            pose,
            cnn,
        }
    }

    #[test]
    fn test_zero_skin_is_safe_and_not_reviewed() {
        let p = PoseEstimate::default();
        let out = decide(&input(0.0, 0.0, &p, None), &ModerationThresholds::default());

        assert_eq!(out.decisions, Decisions::default());
        assert_eq!(out.scores.adult, 0.0);
        assert!(out.flags.contains(&flags::NO_SKIN_REGION.to_string()));
    }

    #[test]
    fn test_bare_torso_and_hips_is_adult() {
        let p = pose(0.9, 0.85);
        let out = decide(&input(0.6, 0.1, &p, None), &ModerationThresholds::default());

        assert!(out.decisions.is_adult);
        assert!(!out.decisions.is_suggestive);
        assert!(out.flags.contains(&flags::TORSO_DETECTED.to_string()));
        assert!(out.flags.contains(&flags::HIP_DETECTED.to_string()));
    }

    #[test]
    fn test_swimwear_cnn_makes_torso_only_image_suggestive() {
        let p = pose(0.7, 0.2);
        let cnn = CnnScores::new(0.1, 0.8, 0.1);
        let out = decide(&input(0.25, 0.4, &p, Some(&cnn)), &ModerationThresholds::default());

        assert!(!out.decisions.is_adult);
        assert!(out.decisions.is_suggestive);
        assert!(out.flags.contains(&flags::CNN_SWIMWEAR.to_string()));
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let t = ModerationThresholds::default();
        let p = pose(t.torso_presence_min, t.hip_presence_min);
        let out = decide(&input(t.nude_skin_ratio, t.nude_coverage_max, &p, None), &t);

        assert!(out.decisions.is_adult);
    }

    #[test]
    fn test_adult_score_never_rises_with_coverage() {
        let t = ModerationThresholds::default();
        let p = pose(0.8, 0.7);
        let cnn = CnnScores::new(0.6, 0.2, 0.55);

        for cnn in [None, Some(&cnn)] {
            let mut last = f32::INFINITY;
            for step in 0..=20 {
                let coverage = step as f32 / 20.0;
                let out = decide(&input(0.5, coverage, &p, cnn), &t);
                assert!(out.scores.adult <= last + 1e-6, "coverage {} raised adult score", coverage);
                last = out.scores.adult;
            }
        }
    }

    #[test]
    fn test_near_threshold_requests_review() {
        let t = ModerationThresholds::default();
        let p = pose(0.1, 0.1);
        let out = decide(&input(t.suggestive_skin_ratio - 0.01, 0.3, &p, None), &t);

        assert!(!out.decisions.is_adult && !out.decisions.is_suggestive);
        assert!(out.decisions.needs_review);
        assert!(out.flags.contains(&flags::NEAR_THRESHOLD.to_string()));
    }

    #[test]
    fn test_adult_with_off_center_subject_needs_review() {
        let t = ModerationThresholds::default();
        let p = PoseEstimate {
            off_center_distance: 0.4,
            ..pose(0.9, 0.9)
        };
        let out = decide(&input(0.7, 0.05, &p, None), &t);

        assert!(out.decisions.is_adult);
        assert!(out.decisions.needs_review);
        assert!(out.flags.contains(&flags::ADULT_POSE_CONFLICT.to_string()));
    }

    #[test]
    fn test_reevaluate_applies_new_thresholds_and_keeps_runtime_flags() {
        let p = pose(0.9, 0.9);
        let t = ModerationThresholds::default();
        let out = decide(&input(0.4, 0.2, &p, None), &t);

        let mut stored = AnalysisResult {
            skin_ratio: 0.4,
            dominant_skin_ratio: 0.4,
            coverage_score: 0.2,
            pose: p,
            decisions: out.decisions,
            scores: out.scores,
            flags: out.flags,
            ..Default::default()
        };
        stored.flags.push(flags::FAST_MODE.to_string());
        assert!(stored.decisions.is_adult);

        let lenient = ModerationThresholds { nude_skin_ratio: 0.5, ..t.clone() };
        let updated = reevaluate(&stored, &lenient);

        assert!(!updated.decisions.is_adult);
        assert!(updated.is_fast_mode());
        assert_eq!(reevaluate(&stored, &t), stored);
    }
}
