use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;

use crate::bands::Band;
use crate::color::{excess_green, luma, HsvRange};
use crate::config::EngineConfig;
use crate::mask::BinaryMask;

/// Removes soil, floor and container pixels from a band's residual area.
///
/// Three stages over the band's residual pixels:
/// 1. Otsu split of the luminance histogram; a class is dropped when its mean
///    excess green (`2G - R - B`) is below `foliage_excess_green`.
/// 2. Pixels inside the soil HSV range are dropped.
/// 3. A square binary opening removes speckle.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundSuppressor {
    soil: HsvRange,
    foliage_excess_green: f32,
    opening_radius: u32,
}

impl BackgroundSuppressor {
    pub fn new(soil: HsvRange, foliage_excess_green: f32, opening_radius: u32) -> Self {
        Self { soil, foliage_excess_green, opening_radius }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.soil, cfg.foliage_excess_green, cfg.opening_radius)
    }

    pub fn suppress(&self, image: &RgbImage, residual: &BinaryMask, band: &mut Band) {
        band.luma_threshold = None;
        if band.residual_area_px == 0 || band.y_end <= band.y_start {
            band.suppressed_area_px = 0;
            band.floor_area_px = 0;
            return;
        }

        let rows = band.y_end - band.y_start;

        let mut hist = [0u64; 256];
        let mut exg_sum = [0i64; 256];
        for y in band.y_start..band.y_end {
            for x in 0..residual.width() {
                if residual.get(x, y) {
                    let px = *image.get_pixel(x, y);
                    let l = luma(px) as usize;
                    hist[l] += 1;
                    exg_sum[l] += excess_green(px) as i64;
                }
            }
        }

        let threshold = otsu_threshold(&hist);
        let split = threshold.unwrap_or(u8::MAX) as usize;
        let keep_dark = self.is_foliage(&hist[..=split], &exg_sum[..=split]);
        let keep_bright = self.is_foliage(&hist[split + 1..], &exg_sum[split + 1..]);

        let mut kept = GrayImage::new(residual.width(), rows);
        for y in band.y_start..band.y_end {
            for x in 0..residual.width() {
                if !residual.get(x, y) {
                    continue;
                }
                let px = *image.get_pixel(x, y);
                let class_kept = if (luma(px) as usize) <= split { keep_dark } else { keep_bright };
                if class_kept && !self.soil.contains_rgb(px) {
                    kept.put_pixel(x, y - band.y_start, Luma([u8::MAX]));
                }
            }
        }

        if self.opening_radius > 0 {
            kept = open(&kept, self.opening_radius);
        }

        let suppressed = kept.as_raw().iter().filter(|&&v| v > 0).count() as u64;
        debug_assert!(suppressed <= band.residual_area_px);
        band.luma_threshold = threshold;
        band.suppressed_area_px = suppressed;
        band.floor_area_px = band.residual_area_px - suppressed;
    }

    fn is_foliage(&self, hist: &[u64], exg_sum: &[i64]) -> bool {
        let n: u64 = hist.iter().sum();
        if n == 0 {
            return false;
        }
        let mean = exg_sum.iter().sum::<i64>() as f64 / n as f64;
        mean >= self.foliage_excess_green as f64
    }
}

/// Otsu's threshold: the level `t` maximizing between-class variance for
/// classes `<= t` and `> t`. `None` when fewer than two levels are populated.
pub fn otsu_threshold(hist: &[u64; 256]) -> Option<u8> {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return None;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut w0 = 0u64;
    let mut sum0 = 0.0f64;
    let mut best: Option<u8> = None;
    let mut best_var = -1.0f64;

    for t in 0..255usize {
        w0 += hist[t];
        sum0 += t as f64 * hist[t] as f64;
        if w0 == 0 {
            continue;
        }
        let w1 = total - w0;
        if w1 == 0 {
            break;
        }
        let m0 = sum0 / w0 as f64;
        let m1 = (sum_all - sum0) / w1 as f64;
        let var = w0 as f64 * w1 as f64 * (m0 - m1) * (m0 - m1);
        if var > best_var {
            best_var = var;
            best = Some(t as u8);
        }
    }
    best
}

/// Binary opening with a `(2r+1)²` square (L∞ ball). Pixels outside the
/// image count as foreground, and the result is always a subset of `mask`.
pub fn open(mask: &GrayImage, radius: u32) -> GrayImage {
    let k = radius.min(u8::MAX as u32) as u8;
    let mut opened = morphology::open(mask, Norm::LInf, k);
    for (o, m) in opened.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            o[0] = 0;
        }
    }
    opened
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SOIL: Rgb<u8> = Rgb([120, 85, 50]);
    const LEAF: Rgb<u8> = Rgb([50, 150, 40]);
    const CONCRETE: Rgb<u8> = Rgb([200, 200, 195]);

    fn suppressor() -> BackgroundSuppressor {
        BackgroundSuppressor::new(HsvRange::soil(), 8.0, 1)
    }

    fn run(img: &RgbImage, residual: &BinaryMask) -> Band {
        let mut band = Band::new(1, 0, img.height(), residual.count());
        suppressor().suppress(img, residual, &mut band);
        band
    }

    #[test]
    fn otsu_splits_two_levels() {
        let mut hist = [0u64; 256];
        hist[40] = 100;
        hist[200] = 300;
        let t = otsu_threshold(&hist).unwrap();
        assert!((40..200).contains(&t));
    }

    #[test]
    fn otsu_degenerate_histograms() {
        assert_eq!(otsu_threshold(&[0u64; 256]), None);
        let mut hist = [0u64; 256];
        hist[77] = 10;
        assert_eq!(otsu_threshold(&hist), None);
    }

    fn set_count(img: &GrayImage) -> usize {
        img.as_raw().iter().filter(|&&v| v > 0).count()
    }

    #[test]
    fn opening_drops_speckle_and_keeps_blobs() {
        let mut m = GrayImage::new(12, 12);
        m.put_pixel(1, 1, Luma([255]));
        for y in 4..9 {
            for x in 4..9 {
                m.put_pixel(x, y, Luma([255]));
            }
        }
        let o = open(&m, 1);
        assert_eq!(o.get_pixel(1, 1)[0], 0);
        assert_eq!(set_count(&o), 25);
    }

    #[test]
    fn opening_never_grows() {
        let m = GrayImage::from_fn(9, 7, |x, y| Luma([if ((y * 9 + x) * 7919) % 3 != 0 { 255 } else { 0 }]));
        let o = open(&m, 1);
        assert!(o.pixels().zip(m.pixels()).all(|(o, m)| o[0] == 0 || m[0] > 0));
    }

    #[test]
    fn opening_keeps_blobs_touching_the_border() {
        let mut m = GrayImage::new(10, 10);
        for y in 0..10 {
            for x in 0..3 {
                m.put_pixel(x, y, Luma([255]));
            }
        }
        assert_eq!(set_count(&open(&m, 1)), 30);
    }

    #[test]
    fn soil_is_removed_and_leaves_kept() {
        let mut img = RgbImage::from_pixel(40, 20, SOIL);
        for y in 0..20 {
            for x in 20..40 {
                img.put_pixel(x, y, LEAF);
            }
        }
        let residual = BinaryMask::filled(40, 20, true);
        let band = run(&img, &residual);
        assert_eq!(band.suppressed_area_px, 400);
        assert_eq!(band.floor_area_px, 400);
        assert!(band.luma_threshold.is_some());
    }

    #[test]
    fn bright_floor_class_is_dropped() {
        let mut img = RgbImage::from_pixel(30, 30, CONCRETE);
        for y in 0..30 {
            for x in 0..10 {
                img.put_pixel(x, y, LEAF);
            }
        }
        let band = run(&img, &BinaryMask::filled(30, 30, true));
        assert_eq!(band.suppressed_area_px, 300);
        assert_eq!(band.suppressed_area_px + band.floor_area_px, band.residual_area_px);
    }

    #[test]
    fn uniform_foliage_survives_stage_one() {
        let img = RgbImage::from_pixel(16, 16, LEAF);
        let band = run(&img, &BinaryMask::filled(16, 16, true));
        assert_eq!(band.luma_threshold, None);
        assert_eq!(band.suppressed_area_px, 256);
    }

    #[test]
    fn empty_residual_is_a_no_op() {
        let img = RgbImage::from_pixel(16, 16, LEAF);
        let band = run(&img, &BinaryMask::filled(16, 16, false));
        assert_eq!((band.residual_area_px, band.suppressed_area_px, band.floor_area_px), (0, 0, 0));
    }

    #[test]
    fn only_residual_pixels_are_counted() {
        let img = RgbImage::from_pixel(20, 20, LEAF);
        let mut residual = BinaryMask::filled(20, 20, false);
        for y in 5..15 {
            for x in 5..15 {
                residual.set(x, y, true);
            }
        }
        let band = run(&img, &residual);
        assert_eq!(band.residual_area_px, 100);
        assert_eq!(band.suppressed_area_px, 100);
    }
}
