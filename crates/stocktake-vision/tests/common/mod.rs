#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, RgbImage};
use stocktake_vision::{Detector, EngineConfig, RawDetection};

pub const SOIL: Rgb<u8> = Rgb([120, 80, 40]);
pub const LEAF: Rgb<u8> = Rgb([40, 160, 50]);
pub const MARKER: Rgb<u8> = Rgb([255, 0, 0]);

/// Soil background with a leaf-coloured disc at every center.
pub fn scene(w: u32, h: u32, centers: &[(u32, u32)], radius: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, SOIL);
    for &(cx, cy) in centers {
        paint_disc(&mut img, cx, cy, radius, LEAF);
    }
    img
}

pub fn paint_disc(img: &mut RgbImage, cx: u32, cy: u32, radius: u32, color: Rgb<u8>) {
    let r = radius as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let (x, y) = (cx as i64 + dx, cy as i64 + dy);
            if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Pixel count of a digital disc as drawn by [`paint_disc`].
pub fn disc_area(radius: u32) -> u64 {
    let r = radius as i64;
    let mut n = 0;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                n += 1;
            }
        }
    }
    n
}

/// Centers on a regular grid, `margin` pixels from every edge.
pub fn grid(w: u32, h: u32, spacing: u32, margin: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    let mut y = margin;
    while y + margin <= h {
        let mut x = margin;
        while x + margin <= w {
            out.push((x, y));
            x += spacing;
        }
        y += spacing;
    }
    out
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        tile_size: 256,
        overlap_ratio: 0.25,
        workers: Some(2),
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn is_leaf(px: &Rgb<u8>) -> bool {
    let [r, g, b] = px.0;
    g as i32 > r as i32 + 40 && g as i32 > b as i32 + 40
}

/// Finds leaf-coloured connected components and reports their bounding boxes.
///
/// Confidence grows with visible area so a disc cut by a tile edge ranks
/// below the same disc seen whole in a neighbouring tile.
pub struct BlobDetector {
    pub min_area: u64,
    pub full_area: u64,
    calls: AtomicUsize,
}

impl BlobDetector {
    pub fn new(min_area: u64, full_area: u64) -> Self {
        Self { min_area, full_area, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for BlobDetector {
    fn predict(&self, tile: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = tile.dimensions();
        let mut seen = vec![false; (w * h) as usize];
        let mut out = Vec::new();

        for sy in 0..h {
            for sx in 0..w {
                let i = (sy * w + sx) as usize;
                if seen[i] || !is_leaf(tile.get_pixel(sx, sy)) {
                    continue;
                }
                seen[i] = true;
                let mut stack = vec![(sx, sy)];
                let (mut x0, mut y0, mut x1, mut y1, mut area) = (sx, sy, sx, sy, 0u64);
                while let Some((x, y)) = stack.pop() {
                    area += 1;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                    let mut push = |nx: u32, ny: u32| {
                        let j = (ny * w + nx) as usize;
                        if !seen[j] && is_leaf(tile.get_pixel(nx, ny)) {
                            seen[j] = true;
                            stack.push((nx, ny));
                        }
                    };
                    if x > 0 { push(x - 1, y); }
                    if y > 0 { push(x, y - 1); }
                    if x + 1 < w { push(x + 1, y); }
                    if y + 1 < h { push(x, y + 1); }
                }
                if area < self.min_area {
                    continue;
                }
                let conf = 0.5 + 0.4 * (area as f32 / self.full_area as f32).min(1.0);
                out.push(RawDetection::from_corners(
                    x0 as f32,
                    y0 as f32,
                    x1 as f32 + 1.0,
                    y1 as f32 + 1.0,
                    conf,
                    "plant",
                ));
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "blob"
    }
}

/// Wraps a closure; counts calls.
pub struct FnDetector<F> {
    f: F,
    calls: AtomicUsize,
}

impl<F> FnDetector<F>
where
    F: Fn(&RgbImage, usize) -> anyhow::Result<Vec<RawDetection>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> Detector for FnDetector<F>
where
    F: Fn(&RgbImage, usize) -> anyhow::Result<Vec<RawDetection>> + Send + Sync,
{
    fn predict(&self, tile: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(tile, n)
    }
}
