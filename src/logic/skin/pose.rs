//! Torso/hip presence estimation without a pose model.
//!
//! Inside the dominant region we look at a central vertical band (20-80% of the
//! box width) and measure, row by row, what fraction of the band is skin that
//! belongs to the dominant component. Bands of rows stand in for body parts:
//! shoulders 0-20%, torso 20-75%, hips 65-100% of the box height.

use super::regions::{ComponentMap, Region};
use crate::logic::types::PoseEstimate;

const BAND_LEFT: f32 = 0.2;
const BAND_RIGHT: f32 = 0.8;

const SHOULDER_ROWS: (f32, f32) = (0.0, 0.2);
const TORSO_ROWS: (f32, f32) = (0.2, 0.75);
const HIP_ROWS: (f32, f32) = (0.65, 1.0);

const COVERAGE_WEIGHT: f32 = 0.6;
const CONTINUITY_WEIGHT: f32 = 0.4;

/// Per-row skin fraction inside the central band of `region`
pub fn row_profile(components: &ComponentMap, region: &Region) -> Vec<f32> {
    let bbox = region.bbox;
    let band_x0 = bbox.x + (bbox.width as f32 * BAND_LEFT).floor() as u32;
    let band_x1 = (bbox.x + (bbox.width as f32 * BAND_RIGHT).ceil() as u32)
        .min(bbox.right())
        .max(band_x0 + 1);
    let band_width = (band_x1 - band_x0) as f32;

    (bbox.y..bbox.bottom())
        .map(|y| {
            let hits = (band_x0..band_x1)
                .filter(|&x| components.label_at(x, y) == region.label)
                .count();
            hits as f32 / band_width
        })
        .collect()
}

fn row_range(len: usize, (start, end): (f32, f32)) -> std::ops::Range<usize> {
    let a = ((len as f32 * start + 1e-4).floor() as usize).min(len);
    let b = ((len as f32 * end - 1e-4).ceil() as usize).clamp(a, len);
    a..b
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Longest run of rows at or above `min_fraction`, normalised by band length
pub fn continuity(rows: &[f32], min_fraction: f32) -> f32 {
    if rows.is_empty() {
        return 0.0;
    }
    let mut best = 0usize;
    let mut run = 0usize;
    for &r in rows {
        if r >= min_fraction {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best as f32 / rows.len() as f32
}

/// Limbs dominate when skin exists but neither the trunk bands nor the centre carry it
pub fn limb_dominance(torso_conf: f32, hip_conf: f32, central: f32) -> f32 {
    (0.35 * (1.0 - torso_conf) + 0.35 * (1.0 - hip_conf) + 0.3 * (1.0 - central)).clamp(0.0, 1.0)
}

pub fn estimate(
    components: &ComponentMap,
    region: &Region,
    image_width: u32,
    row_coverage_min: f32,
) -> PoseEstimate {
    let profile = row_profile(components, region);
    let len = profile.len();

    let shoulder_rows = &profile[row_range(len, SHOULDER_ROWS)];
    let torso_rows = &profile[row_range(len, TORSO_ROWS)];
    let hip_rows = &profile[row_range(len, HIP_ROWS)];

    let torso_coverage = mean(torso_rows);
    let hip_coverage = mean(hip_rows);
    let shoulder_coverage = mean(shoulder_rows);

    let torso_continuity = continuity(torso_rows, row_coverage_min);
    let hip_continuity = continuity(hip_rows, row_coverage_min);

    let torso_conf = (COVERAGE_WEIGHT * torso_coverage + CONTINUITY_WEIGHT * torso_continuity).clamp(0.0, 1.0);
    let hip_conf = (COVERAGE_WEIGHT * hip_coverage + CONTINUITY_WEIGHT * hip_continuity).clamp(0.0, 1.0);
    let overall_central_coverage = mean(&profile);

    let off_center_distance = if image_width == 0 {
        0.0
    } else {
        ((region.centroid.0 + 0.5) / image_width as f32 - 0.5).abs().min(0.5)
    };

    PoseEstimate {
        torso_coverage,
        hip_coverage,
        shoulder_coverage,
        torso_presence_confidence: torso_conf,
        hip_presence_confidence: hip_conf,
        limb_dominance_confidence: limb_dominance(torso_conf, hip_conf, overall_central_coverage),
        off_center_distance,
        torso_continuity,
        overall_central_coverage,
    }
}
