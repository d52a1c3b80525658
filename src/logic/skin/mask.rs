//! Skin mask: joint HSV / YCrCb range test plus morphological cleanup.

use image::RgbImage;

/// Colour-space ranges for a pixel to count as skin.
/// A pixel must pass both the HSV and the YCrCb test.
#[derive(Debug, Clone, Copy)]
pub struct SkinRanges {
    /// Hue upper bound, in turns (0..1)
    pub hue_max: f32,
    /// Hue lower bound for the wrap-around band near red, in turns
    pub hue_wrap_min: f32,
    pub saturation_min: f32,
    pub saturation_max: f32,
    pub value_min: f32,
    pub luma_min: f32,
    pub luma_max: f32,
    pub cr_min: f32,
    pub cr_max: f32,
    pub cb_min: f32,
    pub cb_max: f32,
}

impl Default for SkinRanges {
    fn default() -> Self {
        Self {
            hue_max: 0.17,
            hue_wrap_min: 0.95,
            saturation_min: 0.1,
            saturation_max: 0.75,
            value_min: 0.35,
            luma_min: 40.0,
            luma_max: 240.0,
            cr_min: 135.0,
            cr_max: 180.0,
            cb_min: 85.0,
            cb_max: 135.0,
        }
    }
}

/// RGB (0..255) -> HSV with hue in turns, saturation and value in 0..1
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };

    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };
    (hue, saturation, max)
}

/// RGB (0..255) -> Y, Cr, Cb (0..255), BT.601 full range
pub fn rgb_to_ycrcb(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    (y, cr, cb)
}

pub fn is_skin(r: u8, g: u8, b: u8, ranges: &SkinRanges) -> bool {
    let (h, s, v) = rgb_to_hsv(r, g, b);
    let hsv_ok = (h <= ranges.hue_max || h >= ranges.hue_wrap_min)
        && s >= ranges.saturation_min
        && s <= ranges.saturation_max
        && v >= ranges.value_min;
    if !hsv_ok {
        return false;
    }

    let (y, cr, cb) = rgb_to_ycrcb(r, g, b);
    y >= ranges.luma_min
        && y <= ranges.luma_max
        && cr >= ranges.cr_min
        && cr <= ranges.cr_max
        && cb >= ranges.cb_min
        && cb <= ranges.cb_max
}

/// Binary skin mask, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SkinMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<bool>,
}

impl SkinMask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; (width as usize) * (height as usize)],
        }
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }
}

pub fn build_mask(pixels: &RgbImage, ranges: &SkinRanges) -> SkinMask {
    let mut mask = SkinMask::empty(pixels.width(), pixels.height());
    for (x, y, px) in pixels.enumerate_pixels() {
        if is_skin(px[0], px[1], px[2], ranges) {
            mask.set(x, y, true);
        }
    }
    mask
}

// ============================================================================
// MORPHOLOGY (5x5 ellipse)
// ============================================================================

/// Offsets of the 5x5 elliptical structuring element:
///
/// ```text
/// . . X . .
/// X X X X X
/// X X X X X
/// X X X X X
/// . . X . .
/// ```
const ELLIPSE_5X5: [(i32, i32); 17] = [
    (0, -2),
    (-2, -1), (-1, -1), (0, -1), (1, -1), (2, -1),
    (-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0),
    (-2, 1), (-1, 1), (0, 1), (1, 1), (2, 1),
    (0, 2),
];

/// Out-of-bounds neighbours are ignored, so the image border neither erodes nor grows.
fn morph(mask: &SkinMask, erode: bool) -> SkinMask {
    let (w, h) = (mask.width as i32, mask.height as i32);
    let mut out = SkinMask::empty(mask.width, mask.height);

    for y in 0..h {
        for x in 0..w {
            let mut hit = erode;
            for &(dx, dy) in ELLIPSE_5X5.iter() {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let v = mask.get(nx as u32, ny as u32);
                if erode && !v {
                    hit = false;
                    break;
                }
                if !erode && v {
                    hit = true;
                    break;
                }
            }
            out.set(x as u32, y as u32, hit);
        }
    }
    out
}

pub fn erode(mask: &SkinMask) -> SkinMask {
    morph(mask, true)
}

pub fn dilate(mask: &SkinMask) -> SkinMask {
    morph(mask, false)
}

/// Opening (removes speckle) followed by closing (fills small gaps)
pub fn clean(mask: &SkinMask) -> SkinMask {
    let opened = dilate(&erode(mask));
    erode(&dilate(&opened))
}
