use image::RgbImage;
use serde::Serialize;

use crate::color::HsvRange;
use crate::config::EngineConfig;

/// A tile rectangle in original-image pixels, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRect {
    /// Row-major position in the plan.
    pub index: usize,
    pub row: u32,
    pub col: u32,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TileRect {
    pub fn width(&self) -> u32 { self.x1 - self.x0 }
    pub fn height(&self) -> u32 { self.y1 - self.y0 }
    pub fn area(&self) -> u64 { self.width() as u64 * self.height() as u64 }

    pub fn offset(&self) -> (f32, f32) {
        (self.x0 as f32, self.y0 as f32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    pub tiles: Vec<TileRect>,
    /// False when one tile covers the whole image and merging can be skipped.
    pub tiling_needed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TilePlanner {
    tile_size: u32,
    overlap_ratio: f32,
}

impl TilePlanner {
    pub fn new(tile_size: u32, overlap_ratio: f32) -> Self {
        debug_assert!(tile_size > 0);
        debug_assert!((0.0..1.0).contains(&overlap_ratio));
        Self { tile_size, overlap_ratio }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.tile_size, cfg.overlap_ratio)
    }

    pub fn overlap_px(&self) -> u32 {
        ((self.overlap_ratio * self.tile_size as f32).floor() as u32).min(self.tile_size - 1)
    }

    pub fn stride(&self) -> u32 {
        self.tile_size - self.overlap_px()
    }

    pub fn plan(&self, width: u32, height: u32) -> TilePlan {
        if width == 0 || height == 0 {
            return TilePlan { tiles: Vec::new(), tiling_needed: false };
        }
        if width <= self.tile_size && height <= self.tile_size {
            let whole = TileRect { index: 0, row: 0, col: 0, x0: 0, y0: 0, x1: width, y1: height };
            return TilePlan { tiles: vec![whole], tiling_needed: false };
        }

        let xs = axis_origins(width, self.tile_size, self.stride());
        let ys = axis_origins(height, self.tile_size, self.stride());
        let mut tiles = Vec::with_capacity(xs.len() * ys.len());
        for (row, &y0) in ys.iter().enumerate() {
            for (col, &x0) in xs.iter().enumerate() {
                tiles.push(TileRect {
                    index: tiles.len(),
                    row: row as u32,
                    col: col as u32,
                    x0,
                    y0,
                    x1: (x0 + self.tile_size).min(width),
                    y1: (y0 + self.tile_size).min(height),
                });
            }
        }
        TilePlan { tiles, tiling_needed: true }
    }
}

// Origins advance by `stride` until a tile reaches the far edge; the last
// tile is clipped rather than shifted back.
fn axis_origins(len: u32, tile: u32, stride: u32) -> Vec<u32> {
    let mut out = vec![0u32];
    let mut x = 0u32;
    while x + tile < len {
        x += stride;
        out.push(x);
    }
    out
}

/// Skips tiles that are almost entirely non-vegetation.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundTileFilter {
    vegetation: HsvRange,
    min_fraction: f32,
}

impl BackgroundTileFilter {
    pub fn new(vegetation: HsvRange, min_fraction: f32) -> Self {
        Self { vegetation, min_fraction }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.vegetation, cfg.background_skip_fraction)
    }

    pub fn vegetation_fraction(&self, image: &RgbImage, tile: &TileRect) -> f32 {
        let total = tile.area();
        if total == 0 {
            return 0.0;
        }
        let mut hits = 0u64;
        for y in tile.y0..tile.y1 {
            for x in tile.x0..tile.x1 {
                if self.vegetation.contains_rgb(*image.get_pixel(x, y)) {
                    hits += 1;
                }
            }
        }
        hits as f32 / total as f32
    }

    pub fn should_skip(&self, image: &RgbImage, tile: &TileRect) -> bool {
        if self.min_fraction <= 0.0 {
            return false;
        }
        self.vegetation_fraction(image, tile) < self.min_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn covers_exactly(plan: &TilePlan, w: u32, h: u32) -> bool {
        let mut hit = vec![false; (w * h) as usize];
        for t in &plan.tiles {
            if t.x1 > w || t.y1 > h || t.x0 >= t.x1 || t.y0 >= t.y1 {
                return false;
            }
            for y in t.y0..t.y1 {
                for x in t.x0..t.x1 {
                    hit[(y * w + x) as usize] = true;
                }
            }
        }
        hit.iter().all(|&v| v)
    }

    #[test]
    fn square_1024_gives_three_by_three() {
        let plan = TilePlanner::new(512, 0.25).plan(1024, 1024);
        assert!(plan.tiling_needed);
        assert_eq!(plan.tiles.len(), 9);
        let xs: Vec<u32> = plan.tiles.iter().take(3).map(|t| t.x0).collect();
        assert_eq!(xs, vec![0, 384, 768]);
        let last = plan.tiles.last().unwrap();
        assert_eq!((last.x1, last.y1), (1024, 1024));
        assert_eq!(last.width(), 256);
        assert_eq!((last.row, last.col, last.index), (2, 2, 8));
    }

    #[test]
    fn small_image_needs_no_tiling() {
        let plan = TilePlanner::new(512, 0.25).plan(300, 200);
        assert!(!plan.tiling_needed);
        assert_eq!(plan.tiles.len(), 1);
        assert_eq!((plan.tiles[0].x1, plan.tiles[0].y1), (300, 200));
    }

    #[test]
    fn covers_every_pixel_for_assorted_sizes() {
        let planner = TilePlanner::new(64, 0.25);
        for &(w, h) in &[(65, 10), (64, 200), (129, 130), (300, 97), (1, 500), (257, 257)] {
            let plan = planner.plan(w, h);
            assert!(covers_exactly(&plan, w, h), "gap or overflow at {}x{}", w, h);
        }
    }

    #[test]
    fn row_major_and_deterministic() {
        let planner = TilePlanner::new(100, 0.3);
        let a = planner.plan(350, 260);
        let b = planner.plan(350, 260);
        assert_eq!(a, b);
        for (i, t) in a.tiles.iter().enumerate() {
            assert_eq!(t.index, i);
        }
        assert!(a.tiles.windows(2).all(|p| (p[0].row, p[0].col) < (p[1].row, p[1].col)));
    }

    #[test]
    fn high_overlap_keeps_positive_stride() {
        let planner = TilePlanner::new(8, 0.99);
        assert_eq!(planner.stride(), 1);
        assert!(covers_exactly(&planner.plan(20, 9), 20, 9));
    }

    #[test]
    fn filter_skips_bare_floor_and_keeps_foliage() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([180, 180, 175]));
        let tile = TileRect { index: 0, row: 0, col: 0, x0: 0, y0: 0, x1: 50, y1: 100 };
        let other = TileRect { index: 1, row: 0, col: 1, x0: 50, y0: 0, x1: 100, y1: 100 };
        for y in 0..100 {
            for x in 60..90 {
                img.put_pixel(x, y, Rgb([50, 150, 40]));
            }
        }
        let filter = BackgroundTileFilter::new(HsvRange::vegetation(), 0.02);
        assert!(filter.should_skip(&img, &tile));
        assert!(!filter.should_skip(&img, &other));
        assert!((filter.vegetation_fraction(&img, &other) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_threshold_never_skips() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let tile = TileRect { index: 0, row: 0, col: 0, x0: 0, y0: 0, x1: 10, y1: 10 };
        assert!(!BackgroundTileFilter::new(HsvRange::vegetation(), 0.0).should_skip(&img, &tile));
    }
}
