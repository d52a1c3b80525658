//! Skin/Garment Heuristic Analyzer
//!
//! Pixel-level signals without any trained model:
//! - `mask`     - joint HSV/YCrCb skin segmentation + morphological cleanup
//! - `regions`  - connected components, dominant skin region
//! - `coverage` - garment coverage estimate over the dominant region
//! - `pose`     - torso/hip presence proxy

pub mod coverage;
pub mod mask;
pub mod pose;
pub mod regions;


use image::RgbImage;

use crate::logic::model::threshold::ModerationThresholds;
use crate::logic::types::PoseEstimate;

pub use mask::{SkinMask, SkinRanges};
pub use regions::{Rect, Region};

/// Everything the heuristic stage measures for one image
#[derive(Debug, Clone, Default)]
pub struct HeuristicReport {
    pub width: u32,
    pub height: u32,
    pub skin_ratio: f32,
    pub dominant_skin_ratio: f32,
    pub coverage_score: f32,
    pub edge_density: f32,
    pub color_std_dev: f32,
    pub pose: PoseEstimate,
    pub dominant: Option<Region>,
}

pub fn analyze(pixels: &RgbImage, thresholds: &ModerationThresholds) -> HeuristicReport {
    analyze_with_ranges(pixels, thresholds, &SkinRanges::default())
}

pub fn analyze_with_ranges(
    pixels: &RgbImage,
    thresholds: &ModerationThresholds,
    ranges: &SkinRanges,
) -> HeuristicReport {
    let (width, height) = pixels.dimensions();
    let total = width as usize * height as usize;

    let mut report = HeuristicReport {
        width,
        height,
        ..Default::default()
    };
    if total == 0 {
        return report;
    }

    let skin = mask::clean(&mask::build_mask(pixels, ranges));
    let components = regions::label_components(&skin);

    report.skin_ratio = skin.count() as f32 / total as f32;

    let Some(dominant) = components.dominant().cloned() else {
        return report;
    };

    report.dominant_skin_ratio = dominant.area as f32 / total as f32;

    let cover = coverage::measure(pixels, &skin, dominant.bbox, thresholds);
    report.coverage_score = cover.coverage_score;
    report.edge_density = cover.edge_density;
    report.color_std_dev = cover.color_std_dev;

    report.pose = pose::estimate(&components, &dominant, width, thresholds.row_coverage_min);
    report.dominant = Some(dominant);

    report
}
