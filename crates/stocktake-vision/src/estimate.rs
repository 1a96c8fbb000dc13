use crate::bands::Band;
use crate::config::OvercountBias;

/// `ceil(suppressed / (object_area * alpha))`, zero for an empty residual.
pub fn estimate_count(suppressed_area_px: u64, object_area_px: f64, alpha: OvercountBias) -> u64 {
    if suppressed_area_px == 0 {
        return 0;
    }
    let unit = object_area_px * alpha.get();
    debug_assert!(unit > 0.0, "calibrated area must be positive, got {}", object_area_px);
    if !(unit > 0.0) {
        return 0;
    }
    (suppressed_area_px as f64 / unit).ceil() as u64
}

#[derive(Debug, Clone, Copy)]
pub struct CountEstimator {
    alpha: OvercountBias,
}

impl CountEstimator {
    pub fn new(alpha: OvercountBias) -> Self {
        Self { alpha }
    }

    pub fn estimate(&self, band: &mut Band) {
        band.estimated_count = estimate_count(band.suppressed_area_px, band.calibrated_object_area_px, self.alpha);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha(v: f64) -> OvercountBias {
        OvercountBias::new(v).unwrap()
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_count(1000, 400.0, alpha(1.0)), 3);
        assert_eq!(estimate_count(800, 400.0, alpha(1.0)), 2);
        assert_eq!(estimate_count(1, 400.0, alpha(1.0)), 1);
    }

    #[test]
    fn empty_residual_is_zero() {
        assert_eq!(estimate_count(0, 400.0, alpha(0.9)), 0);
        let mut band = Band::new(1, 0, 10, 0);
        band.calibrated_object_area_px = 400.0;
        CountEstimator::new(alpha(0.9)).estimate(&mut band);
        assert_eq!(band.estimated_count, 0);
    }

    #[test]
    fn lower_alpha_never_lowers_the_count() {
        for &(area, obj) in &[(1000u64, 400.0), (12_345, 97.5), (7, 3.0), (50_000, 2500.0)] {
            let mut prev = 0;
            for a in [1.5, 1.2, 1.0, 0.95, 0.9, 0.75, 0.5, 0.1] {
                let n = estimate_count(area, obj, alpha(a));
                assert!(n >= prev, "alpha {} gave {} < {}", a, n, prev);
                prev = n;
            }
        }
    }

    #[test]
    fn bias_leans_toward_overcounting() {
        assert_eq!(estimate_count(4000, 400.0, alpha(1.0)), 10);
        assert_eq!(estimate_count(4000, 400.0, alpha(0.9)), 12);
    }
}
