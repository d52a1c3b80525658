//! Garment coverage heuristic over the dominant region's bounding box.
//!
//! coverage = 0.4 * edges + 0.3 * colour spread + 0.3 * skin gap,
//! each term clamped to [0, 1] against its own denominator first.
//!
//! Colour spread is measured over the non-skin pixels of the box only. Bare
//! skin against a plain backdrop then reads as zero spread; the backdrop is
//! already counted by the skin gap.

use image::RgbImage;

use super::mask::SkinMask;
use super::regions::Rect;
use crate::logic::model::threshold::ModerationThresholds;

pub const EDGE_WEIGHT: f32 = 0.4;
pub const COLOR_WEIGHT: f32 = 0.3;
pub const GAP_WEIGHT: f32 = 0.3;

/// Canny hysteresis thresholds on the L1 gradient magnitude
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoverageReport {
    pub edge_density: f32,
    pub color_std_dev: f32,
    pub skin_gap: f32,
    pub coverage_score: f32,
}

/// Blend the three raw terms into a coverage score
pub fn blend(edge_density: f32, color_std_dev: f32, skin_gap: f32, t: &ModerationThresholds) -> f32 {
    let e = (edge_density / t.edge_density_norm).clamp(0.0, 1.0);
    let c = (color_std_dev / t.color_std_norm).clamp(0.0, 1.0);
    let g = (skin_gap / t.skin_gap_norm).clamp(0.0, 1.0);
    (EDGE_WEIGHT * e + COLOR_WEIGHT * c + GAP_WEIGHT * g).clamp(0.0, 1.0)
}

pub fn measure(
    pixels: &RgbImage,
    mask: &SkinMask,
    bbox: Rect,
    thresholds: &ModerationThresholds,
) -> CoverageReport {
    let area = bbox.area();
    if area == 0 {
        return CoverageReport::default();
    }

    let gray = crop_gray(pixels, bbox);
    let edges = canny(&gray, bbox.width as usize, bbox.height as usize, CANNY_LOW, CANNY_HIGH);
    let edge_density = edges.iter().filter(|&&e| e).count() as f32 / area as f32;

    let (color_std_dev, uncovered) = fabric_std_dev(pixels, mask, bbox);
    let skin_gap = uncovered as f32 / area as f32;

    CoverageReport {
        edge_density,
        color_std_dev,
        skin_gap,
        coverage_score: blend(edge_density, color_std_dev, skin_gap, thresholds),
    }
}

fn crop_gray(pixels: &RgbImage, bbox: Rect) -> Vec<f32> {
    let mut gray = Vec::with_capacity(bbox.area());
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            let p = pixels.get_pixel(x, y);
            gray.push(0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32);
        }
    }
    gray
}

/// Mean per-channel standard deviation over the non-skin pixels inside `bbox`,
/// plus how many such pixels there were
fn fabric_std_dev(pixels: &RgbImage, mask: &SkinMask, bbox: Rect) -> (f32, usize) {
    let mut n = 0usize;
    let mut sum = [0f64; 3];
    let mut sum_sq = [0f64; 3];

    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            if mask.get(x, y) {
                continue;
            }
            n += 1;
            let p = pixels.get_pixel(x, y);
            for c in 0..3 {
                let v = p[c] as f64;
                sum[c] += v;
                sum_sq[c] += v * v;
            }
        }
    }
    if n == 0 {
        return (0.0, 0);
    }

    let count = n as f64;
    let mut total = 0f64;
    for c in 0..3 {
        let mean = sum[c] / count;
        total += (sum_sq[c] / count - mean * mean).max(0.0).sqrt();
    }
    ((total / 3.0) as f32, n)
}

// ============================================================================
// CANNY
// ============================================================================

/// Sobel gradients, non-maximum suppression, hysteresis. Borders are replicated.
pub fn canny(gray: &[f32], width: usize, height: usize, low: f32, high: f32) -> Vec<bool> {
    let len = width * height;
    if len == 0 {
        return Vec::new();
    }

    let at = |x: isize, y: isize| -> f32 {
        let cx = x.clamp(0, width as isize - 1) as usize;
        let cy = y.clamp(0, height as isize - 1) as usize;
        gray[cy * width + cx]
    };

    let mut magnitude = vec![0f32; len];
    let mut direction = vec![0u8; len];

    for y in 0..height as isize {
        for x in 0..width as isize {
            let gx = -at(x - 1, y - 1) - 2.0 * at(x - 1, y) - at(x - 1, y + 1)
                + at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1);

            let idx = y as usize * width + x as usize;
            magnitude[idx] = gx.abs() + gy.abs();

            // Quantise to 0°, 45°, 90°, 135°
            let angle = gy.atan2(gx).to_degrees().rem_euclid(180.0);
            direction[idx] = if !(22.5..157.5).contains(&angle) {
                0
            } else if angle < 67.5 {
                1
            } else if angle < 112.5 {
                2
            } else {
                3
            };
        }
    }

    let mag = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0.0
        } else {
            magnitude[y as usize * width + x as usize]
        }
    };

    // 0 = none, 1 = weak, 2 = strong
    let mut strength = vec![0u8; len];
    let mut stack = Vec::new();

    for y in 0..height as isize {
        for x in 0..width as isize {
            let idx = y as usize * width + x as usize;
            let m = magnitude[idx];
            if m < low {
                continue;
            }

            let (a, b) = match direction[idx] {
                0 => (mag(x - 1, y), mag(x + 1, y)),
                1 => (mag(x - 1, y - 1), mag(x + 1, y + 1)),
                2 => (mag(x, y - 1), mag(x, y + 1)),
                _ => (mag(x + 1, y - 1), mag(x - 1, y + 1)),
            };
            if m < a || m < b {
                continue;
            }

            if m >= high {
                strength[idx] = 2;
                stack.push((x, y));
            } else {
                strength[idx] = 1;
            }
        }
    }

    // Promote weak pixels connected to strong ones
    while let Some((x, y)) = stack.pop() {
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let nidx = ny as usize * width + nx as usize;
                if strength[nidx] == 1 {
                    strength[nidx] = 2;
                    stack.push((nx, ny));
                }
            }
        }
    }

    strength.into_iter().map(|s| s == 2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_uniform_patch_has_no_edges() {
        let gray = vec![128.0; 20 * 20];
        assert!(canny(&gray, 20, 20, CANNY_LOW, CANNY_HIGH).iter().all(|&e| !e));
    }

    #[test]
    fn test_step_edge_is_detected() {
        let (w, h) = (20, 10);
        let gray: Vec<f32> = (0..w * h)
            .map(|i| if i % w < w / 2 { 0.0 } else { 255.0 })
            .collect();

        let edges = canny(&gray, w, h, CANNY_LOW, CANNY_HIGH);
        let count = edges.iter().filter(|&&e| e).count();
        assert!(count >= h, "expected a vertical edge line, got {} pixels", count);
    }

    #[test]
    fn test_bare_skin_box_has_zero_coverage() {
        let pixels = RgbImage::from_pixel(10, 10, Rgb([224, 172, 138]));
        let mut mask = SkinMask::empty(10, 10);
        mask.data.iter_mut().for_each(|v| *v = true);

        let report = measure(
            &pixels,
            &mask,
            Rect { x: 0, y: 0, width: 10, height: 10 },
            &ModerationThresholds::default(),
        );
        assert_eq!(report.edge_density, 0.0);
        assert!(report.color_std_dev < 1e-3);
        assert_eq!(report.skin_gap, 0.0);
        assert!(report.coverage_score < 1e-3);
    }

    #[test]
    fn test_plain_backdrop_adds_no_colour_spread() {
        let mut pixels = RgbImage::from_pixel(10, 10, Rgb([20, 20, 25]));
        let mut mask = SkinMask::empty(10, 10);
        for y in 0..10 {
            for x in 0..6 {
                pixels.put_pixel(x, y, Rgb([224, 172, 138]));
                mask.set(x, y, true);
            }
        }

        let report = measure(
            &pixels,
            &mask,
            Rect { x: 0, y: 0, width: 10, height: 10 },
            &ModerationThresholds::default(),
        );
        assert!(report.color_std_dev < 1e-3);
        assert!((report.skin_gap - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_patterned_fabric_adds_colour_spread() {
        let mut pixels = RgbImage::from_pixel(10, 10, Rgb([224, 172, 138]));
        let mut mask = SkinMask::empty(10, 10);
        mask.data.iter_mut().for_each(|v| *v = true);
        // Striped garment over the lower half
        for y in 5..10 {
            for x in 0..10 {
                let stripe = if x % 2 == 0 { Rgb([200, 30, 40]) } else { Rgb([20, 40, 180]) };
                pixels.put_pixel(x, y, stripe);
                mask.set(x, y, false);
            }
        }

        let report = measure(
            &pixels,
            &mask,
            Rect { x: 0, y: 0, width: 10, height: 10 },
            &ModerationThresholds::default(),
        );
        assert!(report.color_std_dev > 50.0);
        assert!((report.skin_gap - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_blend_is_monotonic_in_each_term() {
        let t = ModerationThresholds::default();
        let base = blend(0.02, 20.0, 0.2, &t);
        assert!(blend(0.05, 20.0, 0.2, &t) >= base);
        assert!(blend(0.02, 40.0, 0.2, &t) >= base);
        assert!(blend(0.02, 20.0, 0.5, &t) >= base);
        assert!(blend(10.0, 1000.0, 5.0, &t) <= 1.0);
    }
}
