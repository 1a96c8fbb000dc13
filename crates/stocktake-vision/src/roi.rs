use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::mask::BinaryMask;
use crate::RegionOfInterest;

/// Treats the whole image as the region of interest.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeImage;

impl RegionOfInterest for WholeImage {
    fn mask_for(&self, _image: &RgbImage) -> Option<BinaryMask> {
        None
    }
}

/// A fixed mask, e.g. the bench area of a stationary camera.
#[derive(Debug, Clone)]
pub struct StaticMask {
    mask: BinaryMask,
}

impl StaticMask {
    pub fn new(mask: BinaryMask) -> Self {
        Self { mask }
    }

    /// Loads a grayscale image; non-zero pixels are inside the region.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).with_context(|| format!("open roi mask {}", path.display()))?;
        Ok(Self::new(BinaryMask::from_luma(&img.to_luma8())))
    }
}

impl RegionOfInterest for StaticMask {
    fn mask_for(&self, _image: &RgbImage) -> Option<BinaryMask> {
        Some(self.mask.clone())
    }
}
