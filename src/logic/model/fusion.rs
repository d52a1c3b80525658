//! CNN Fusion
//!
//! Refines heuristic decisions with classifier probabilities and blends scores.
//! Rules are applied in priority order; the first matching rule wins.

use super::threshold::ModerationThresholds;
use crate::logic::types::{flags, CnnScores, Decisions, RiskScores};

pub const HEURISTIC_WEIGHT: f32 = 0.55;
pub const CNN_WEIGHT: f32 = 0.45;
pub const AMBIGUOUS_DAMPING: f32 = 0.9;

/// Result of fusing one classifier output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FusionEffect {
    pub force_review: bool,
}

/// `heuristic_nude` is the raw "high skin + low coverage" signal, before pose checks.
pub fn apply(
    cnn: &CnnScores,
    heuristic_nude: bool,
    decisions: &mut Decisions,
    scores: &mut RiskScores,
    flag_list: &mut Vec<String>,
    t: &ModerationThresholds,
) -> FusionEffect {
    let mut effect = FusionEffect::default();

    if heuristic_nude && cnn.delta >= t.cnn_nude_delta {
        decisions.is_adult = true;
        decisions.is_suggestive = false;
        flag_list.push(flags::CNN_CONFIRMED_ADULT.to_string());
    } else if cnn.swimwear >= t.cnn_swimwear_min {
        // Swimwear overrides a heuristic nudity guess
        decisions.is_adult = false;
        decisions.is_suggestive = true;
        flag_list.push(flags::CNN_SWIMWEAR.to_string());
    } else if !decisions.is_adult && !decisions.is_suggestive && cnn.delta >= t.cnn_review_delta {
        decisions.is_suggestive = true;
        flag_list.push(flags::CNN_REVIEW.to_string());
    }

    scores.adult = blend(scores.adult, cnn.nude);
    scores.suggestive = blend(scores.suggestive, cnn.swimwear);

    if cnn.ambiguous >= t.cnn_ambiguous_delta {
        scores.adult *= AMBIGUOUS_DAMPING;
        effect.force_review = true;
        flag_list.push(flags::CNN_AMBIGUOUS.to_string());
    }

    effect
}

fn blend(heuristic: f32, cnn: f32) -> f32 {
    (HEURISTIC_WEIGHT * heuristic + CNN_WEIGHT * cnn).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(cnn: CnnScores, heuristic_nude: bool, start: Decisions) -> (Decisions, RiskScores, Vec<String>, FusionEffect) {
        let mut decisions = start;
        let mut scores = RiskScores { adult: 0.5, suggestive: 0.5 };
        let mut flag_list = Vec::new();
        let effect = apply(
            &cnn,
            heuristic_nude,
            &mut decisions,
            &mut scores,
            &mut flag_list,
            &ModerationThresholds::default(),
        );
        (decisions, scores, flag_list, effect)
    }

    #[test]
    fn test_confirm_adult_clears_suggestive() {
        let start = Decisions { is_suggestive: true, ..Default::default() };
        let (d, _, f, _) = run(CnnScores::new(0.8, 0.1, 0.1), true, start);
        assert!(d.is_adult && !d.is_suggestive);
        assert_eq!(f, vec![flags::CNN_CONFIRMED_ADULT]);
    }

    #[test]
    fn test_swimwear_overrides_heuristic_adult() {
        let start = Decisions { is_adult: true, ..Default::default() };
        let (d, _, f, _) = run(CnnScores::new(0.15, 0.8, 0.05), true, start);
        assert!(!d.is_adult && d.is_suggestive);
        assert_eq!(f, vec![flags::CNN_SWIMWEAR]);
    }

    #[test]
    fn test_review_delta_marks_undecided_suggestive() {
        let (d, _, f, _) = run(CnnScores::new(0.5, 0.3, 0.2), false, Decisions::default());
        assert!(d.is_suggestive && !d.is_adult);
        assert_eq!(f, vec![flags::CNN_REVIEW]);
    }

    #[test]
    fn test_scores_are_blended() {
        let (_, s, _, _) = run(CnnScores::new(1.0, 0.0, 0.0), false, Decisions::default());
        assert!((s.adult - (0.55 * 0.5 + 0.45)).abs() < 1e-6);
        assert!((s.suggestive - 0.55 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ambiguous_dampens_and_forces_review() {
        let (_, s, f, effect) = run(CnnScores::new(0.2, 0.2, 0.6), false, Decisions::default());
        assert!(effect.force_review);
        assert!((s.adult - (0.55 * 0.5 + 0.45 * 0.2) * 0.9).abs() < 1e-6);
        assert!(f.contains(&flags::CNN_AMBIGUOUS.to_string()));
    }
}
