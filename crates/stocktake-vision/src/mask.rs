use image::GrayImage;

/// Row-major binary raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl BinaryMask {
    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self { width, height, data: vec![value; width as usize * height as usize] }
    }

    pub fn from_vec(width: u32, height: u32, data: Vec<bool>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self { width, height, data })
    }

    /// Non-zero pixels are inside the mask.
    pub fn from_luma(img: &GrayImage) -> Self {
        let data = img.as_raw().iter().map(|&v| v != 0).collect();
        Self { width: img.width(), height: img.height(), data }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn as_slice(&self) -> &[bool] { &self.data }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let w = self.width as usize;
        self.data[y as usize * w + x as usize] = value;
    }

    pub fn count(&self) -> u64 {
        self.data.iter().filter(|&&v| v).count() as u64
    }

    /// Set pixels in rows `y0..y1`.
    pub fn count_rows(&self, y0: u32, y1: u32) -> u64 {
        let w = self.width as usize;
        let y1 = y1.min(self.height);
        if y0 >= y1 {
            return 0;
        }
        self.data[y0 as usize * w..y1 as usize * w].iter().filter(|&&v| v).count() as u64
    }

    /// Nearest-neighbour resample.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Self::filled(width, height, false);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..height {
            let sy = ((y as u64 * self.height as u64) / height as u64) as u32;
            for x in 0..width {
                let sx = ((x as u64 * self.width as u64) / width as u64) as u32;
                out.set(x, y, self.get(sx, sy));
            }
        }
        out
    }
}
