use image::Rgb;
use serde::{Deserialize, Serialize};

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

pub fn rgb_to_hsv(px: Rgb<u8>) -> Hsv {
    let [r, g, b] = px.0;
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };

    Hsv { h: h.rem_euclid(360.0), s, v: max }
}

/// Rec. 601 luma.
pub fn luma(px: Rgb<u8>) -> u8 {
    let [r, g, b] = px.0;
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// `2G - R - B`; positive for foliage, negative or near zero for soil, floor and pots.
pub fn excess_green(px: Rgb<u8>) -> i32 {
    let [r, g, b] = px.0;
    2 * g as i32 - r as i32 - b as i32
}

/// Inclusive HSV box. `hue_min > hue_max` wraps through 0°.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HsvRange {
    pub hue_min: f32,
    pub hue_max: f32,
    pub sat_min: f32,
    pub sat_max: f32,
    pub val_min: f32,
    pub val_max: f32,
}

impl HsvRange {
    /// Green foliage.
    pub fn vegetation() -> Self {
        Self { hue_min: 70.0, hue_max: 170.0, sat_min: 0.16, sat_max: 1.0, val_min: 0.16, val_max: 1.0 }
    }

    /// Brown and tan soil, substrate and cardboard tones.
    pub fn soil() -> Self {
        Self { hue_min: 10.0, hue_max: 45.0, sat_min: 0.12, sat_max: 0.75, val_min: 0.12, val_max: 0.9 }
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        let hue_ok = if self.hue_min <= self.hue_max {
            hsv.h >= self.hue_min && hsv.h <= self.hue_max
        } else {
            hsv.h >= self.hue_min || hsv.h <= self.hue_max
        };
        hue_ok
            && hsv.s >= self.sat_min
            && hsv.s <= self.sat_max
            && hsv.v >= self.val_min
            && hsv.v <= self.val_max
    }

    pub fn contains_rgb(&self, px: Rgb<u8>) -> bool {
        self.contains(rgb_to_hsv(px))
    }

    /// Returns a description of the first violated bound.
    pub fn check(&self) -> Result<(), String> {
        let all = [self.hue_min, self.hue_max, self.sat_min, self.sat_max, self.val_min, self.val_max];
        if all.iter().any(|v| !v.is_finite()) {
            return Err("bounds must be finite".into());
        }
        if !(0.0..=360.0).contains(&self.hue_min) || !(0.0..=360.0).contains(&self.hue_max) {
            return Err(format!("hue bounds must be within [0, 360], got {}..{}", self.hue_min, self.hue_max));
        }
        for (name, lo, hi) in [("sat", self.sat_min, self.sat_max), ("val", self.val_min, self.val_max)] {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                return Err(format!("{} bounds must satisfy 0 <= min <= max <= 1, got {}..{}", name, lo, hi));
            }
        }
        Ok(())
    }
}
