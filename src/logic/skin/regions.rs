//! Connected-component labelling of the skin mask (8-connectivity).

use serde::{Deserialize, Serialize};

use super::mask::SkinMask;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Grow by `ratio` of the box size on every side, clipped to the image
    pub fn expanded(&self, ratio: f32, img_width: u32, img_height: u32) -> Rect {
        let pad_x = (self.width as f32 * ratio.max(0.0)).round() as u32;
        let pad_y = (self.height as f32 * ratio.max(0.0)).round() as u32;

        let x0 = self.x.saturating_sub(pad_x);
        let y0 = self.y.saturating_sub(pad_y);
        let x1 = (self.right() + pad_x).min(img_width);
        let y1 = (self.bottom() + pad_y).min(img_height);

        Rect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0).max(1),
            height: y1.saturating_sub(y0).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub label: u32,
    pub area: usize,
    pub bbox: Rect,
    pub centroid: (f32, f32),
}

/// Label map plus per-component statistics. Label 0 is background.
#[derive(Debug, Clone)]
pub struct ComponentMap {
    pub width: u32,
    pub height: u32,
    pub labels: Vec<u32>,
    pub regions: Vec<Region>,
}

impl ComponentMap {
    /// Largest component by area
    pub fn dominant(&self) -> Option<&Region> {
        self.regions.iter().max_by_key(|r| r.area)
    }

    #[inline]
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }
}

pub fn label_components(mask: &SkinMask) -> ComponentMap {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let mut labels = vec![0u32; mask.total()];
    let mut regions = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for start in 0..mask.total() {
        if !mask.data[start] || labels[start] != 0 {
            continue;
        }

        let label = regions.len() as u32 + 1;
        let sx = (start % mask.width as usize) as u32;
        let sy = (start / mask.width as usize) as u32;

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (sx, sy, sx, sy);
        let (mut sum_x, mut sum_y, mut area) = (0f64, 0f64, 0usize);

        labels[start] = label;
        stack.push((sx, sy));

        while let Some((x, y)) = stack.pop() {
            area += 1;
            sum_x += x as f64;
            sum_y += y as f64;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let idx = (ny * w + nx) as usize;
                    if mask.data[idx] && labels[idx] == 0 {
                        labels[idx] = label;
                        stack.push((nx as u32, ny as u32));
                    }
                }
            }
        }

        regions.push(Region {
            label,
            area,
            bbox: Rect {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            },
            centroid: ((sum_x / area as f64) as f32, (sum_y / area as f64) as f32),
        });
    }

    ComponentMap {
        width: mask.width,
        height: mask.height,
        labels,
        regions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(mask: &mut SkinMask, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0..y1 {
            for x in x0..x1 {
                mask.set(x, y, true);
            }
        }
    }

    #[test]
    fn test_two_blobs_pick_largest() {
        let mut mask = SkinMask::empty(30, 30);
        fill(&mut mask, 0, 0, 4, 4);
        fill(&mut mask, 10, 10, 25, 20);

        let map = label_components(&mask);
        assert_eq!(map.regions.len(), 2);

        let dominant = map.dominant().unwrap();
        assert_eq!(dominant.area, 150);
        assert_eq!(dominant.bbox, Rect { x: 10, y: 10, width: 15, height: 10 });
        assert!((dominant.centroid.0 - 17.0).abs() < 1e-3);
        assert!((dominant.centroid.1 - 14.5).abs() < 1e-3);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut mask = SkinMask::empty(5, 5);
        mask.set(1, 1, true);
        mask.set(2, 2, true);
        mask.set(3, 3, true);

        let map = label_components(&mask);
        assert_eq!(map.regions.len(), 1);
        assert_eq!(map.label_at(3, 3), map.label_at(1, 1));
    }

    #[test]
    fn test_empty_mask_has_no_dominant() {
        let map = label_components(&SkinMask::empty(8, 8));
        assert!(map.dominant().is_none());
    }

    #[test]
    fn test_expand_clips_to_image() {
        let rect = Rect { x: 2, y: 2, width: 10, height: 10 };
        let grown = rect.expanded(0.5, 14, 30);
        assert_eq!(grown, Rect { x: 0, y: 0, width: 14, height: 17 });
    }
}
