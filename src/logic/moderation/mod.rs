//! Moderation Fusion
//!
//! Joins the per-image `AnalysisResult` with keyword and tag-frequency signals
//! into the verdict that gates asset visibility. The verdict is never stored on
//! its own: it is a pure function of stored signals and current thresholds, so
//! a rescan after a threshold change just runs fusion again.

pub mod metadata;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::config::RuntimeConfig;
use crate::logic::decision;
use crate::logic::model::threshold::ModerationThresholds;
use crate::logic::types::AnalysisResult;

pub use metadata::{TermLists, TermMatcher};

/// Normalised tag-frequency shares, 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataScores {
    pub adult: f32,
    pub minor: f32,
    pub beast: f32,
}

/// Textual signals computed outside the pixel pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TextSignals {
    pub keyword_adult: bool,
    pub keyword_minor: bool,
    pub keyword_bestiality: bool,
    pub keyword_illegal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataScores>,
}

impl TextSignals {
    pub fn merge(mut self, other: &TextSignals) -> Self {
        self.keyword_adult |= other.keyword_adult;
        self.keyword_minor |= other.keyword_minor;
        self.keyword_bestiality |= other.keyword_bestiality;
        self.keyword_illegal |= other.keyword_illegal;
        self.metadata = match (self.metadata, other.metadata) {
            (Some(a), Some(b)) => Some(MetadataScores {
                adult: a.adult.max(b.adult),
                minor: a.minor.max(b.minor),
                beast: a.beast.max(b.beast),
            }),
            (a, b) => a.or(b),
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub is_adult: bool,
    pub requires_moderation: bool,
    pub reasons: Vec<String>,
}

impl ModerationVerdict {
    /// Same visibility outcome, ignoring reason wording
    pub fn same_gate(&self, other: &ModerationVerdict) -> bool {
        self.is_adult == other.is_adult && self.requires_moderation == other.requires_moderation
    }
}

pub mod reasons {
    pub const KEYWORD_ADULT: &str = "KEYWORD_ADULT";
    pub const KEYWORD_MINOR: &str = "KEYWORD_MINOR";
    pub const KEYWORD_BESTIALITY: &str = "KEYWORD_BESTIALITY";
    pub const KEYWORD_ILLEGAL: &str = "KEYWORD_ILLEGAL";
    pub const METADATA_ADULT: &str = "METADATA_ADULT";
    pub const METADATA_MINOR: &str = "METADATA_MINOR";
    pub const METADATA_BEAST: &str = "METADATA_BEAST";
    pub const IMAGE_ADULT: &str = "IMAGE_ADULT";
    pub const IMAGE_SUGGESTIVE: &str = "IMAGE_SUGGESTIVE";
    pub const IMAGE_NEEDS_REVIEW: &str = "IMAGE_NEEDS_REVIEW";
    pub const HARD_BLOCKER: &str = "HARD_BLOCKER";
}

/// Fuse one asset's signals. `bypass` forces every signal to absent.
pub fn fuse(
    analysis: Option<&AnalysisResult>,
    signals: &TextSignals,
    t: &ModerationThresholds,
    bypass: bool,
) -> ModerationVerdict {
    if bypass {
        log::warn!("Moderation bypass active - all signals treated as absent");
        return ModerationVerdict::default();
    }

    let meta = signals.metadata;
    let metadata_adult = meta.is_some_and(|m| m.adult >= t.metadata_adult);
    let metadata_minor = meta.is_some_and(|m| m.minor >= t.metadata_minor);
    let metadata_beast = meta.is_some_and(|m| m.beast >= t.metadata_beast);
    let analysis_adult = analysis.is_some_and(|a| a.decisions.is_adult);

    let minor = signals.keyword_minor || metadata_minor;
    let bestiality = signals.keyword_bestiality || metadata_beast;

    let mut verdict = ModerationVerdict {
        requires_moderation: minor || bestiality || signals.keyword_illegal,
        ..Default::default()
    };
    // Hard blockers are always also adult for visibility
    verdict.is_adult =
        signals.keyword_adult || analysis_adult || metadata_adult || verdict.requires_moderation;

    let hits = [
        (signals.keyword_adult, reasons::KEYWORD_ADULT),
        (signals.keyword_minor, reasons::KEYWORD_MINOR),
        (signals.keyword_bestiality, reasons::KEYWORD_BESTIALITY),
        (signals.keyword_illegal, reasons::KEYWORD_ILLEGAL),
        (metadata_adult, reasons::METADATA_ADULT),
        (metadata_minor, reasons::METADATA_MINOR),
        (metadata_beast, reasons::METADATA_BEAST),
        (analysis_adult, reasons::IMAGE_ADULT),
        (analysis.is_some_and(|a| a.decisions.is_suggestive), reasons::IMAGE_SUGGESTIVE),
        (analysis.is_some_and(|a| a.decisions.needs_review), reasons::IMAGE_NEEDS_REVIEW),
        (verdict.requires_moderation, reasons::HARD_BLOCKER),
    ];
    verdict.reasons = hits
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, reason)| reason.to_string())
        .collect();

    verdict
}

/// Re-evaluate the stored analysis under current thresholds, then fuse
pub fn moderate(
    analysis: Option<&AnalysisResult>,
    signals: &TextSignals,
    config: &RuntimeConfig,
) -> (Option<AnalysisResult>, ModerationVerdict) {
    moderate_with_diagnostics(analysis, signals, config, constants::is_diagnostics_enabled())
}

/// `moderate` with the diagnostics gate given explicitly
pub fn moderate_with_diagnostics(
    analysis: Option<&AnalysisResult>,
    signals: &TextSignals,
    config: &RuntimeConfig,
    diagnostics: bool,
) -> (Option<AnalysisResult>, ModerationVerdict) {
    let current = analysis.map(|a| decision::reevaluate(a, &config.thresholds));
    let verdict = fuse(
        current.as_ref(),
        signals,
        &config.thresholds,
        config.moderation.bypass_allowed(diagnostics),
    );
    (current, verdict)
}

// ============================================================================
// RESCAN
// ============================================================================

/// One historical asset as the storage collaborator hands it back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredAsset {
    pub id: String,
    pub analysis: Option<AnalysisResult>,
    pub signals: TextSignals,
    /// Verdict currently applied to the asset, if any
    pub previous: Option<ModerationVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanOutcome {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    pub verdict: ModerationVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<ModerationVerdict>,
    /// Visibility outcome differs from `previous`
    pub changed: bool,
}

/// Re-apply fusion to stored assets. No pixel work.
pub fn rescan(assets: &[StoredAsset], config: &RuntimeConfig) -> Vec<RescanOutcome> {
    let outcomes: Vec<RescanOutcome> = assets
        .iter()
        .map(|asset| {
            let (analysis, verdict) = moderate(asset.analysis.as_ref(), &asset.signals, config);
            let changed = asset
                .previous
                .as_ref()
                .is_some_and(|prev| !prev.same_gate(&verdict));
            RescanOutcome {
                id: asset.id.clone(),
                analysis,
                verdict,
                previous: asset.previous.clone(),
                changed,
            }
        })
        .collect();

    let changed = outcomes.iter().filter(|o| o.changed).count();
    log::info!("Rescan complete: {} assets, {} changed", outcomes.len(), changed);
    outcomes
}
