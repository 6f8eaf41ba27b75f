//! Fixed-point disparity maps.
//!
//! Disparities are stored as `i16` in 1/16 pixel units. A pixel that found no
//! match holds `(min_disparity - 1) * 16`, which is always below every valid
//! value the matcher can produce.

use crate::{Error, Result};
use image::{GrayImage, Luma};

/// Number of fractional disparity steps per pixel.
pub const DISPARITY_SCALE: i32 = 16;

/// Dense disparity map produced by a [`crate::StereoMatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    data: Vec<i16>,
    width: u32,
    height: u32,
    pub min_disparity: i32,
    pub num_disparities: i32,
}

impl DisparityMap {
    /// Map with every pixel set to the no-match sentinel.
    pub fn new(width: u32, height: u32, min_disparity: i32, num_disparities: i32) -> Self {
        let size = width as usize * height as usize;
        Self {
            data: vec![invalid_raw(min_disparity); size],
            width,
            height,
            min_disparity,
            num_disparities,
        }
    }

    /// Wrap an existing row-major buffer of raw fixed-point values.
    pub fn from_raw(
        width: u32,
        height: u32,
        min_disparity: i32,
        num_disparities: i32,
        data: Vec<i16>,
    ) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::DimensionMismatch(format!(
                "disparity buffer holds {} values, expected {}x{} = {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            min_disparity,
            num_disparities,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw values, row-major.
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }

    /// Raw sentinel value marking a pixel without a match.
    pub fn invalid_value(&self) -> i16 {
        invalid_raw(self.min_disparity)
    }

    /// Largest disparity, in pixels, the search could produce.
    pub fn max_disparity(&self) -> i32 {
        self.min_disparity + self.num_disparities - 1
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Raw fixed-point value; out-of-bounds reads return the sentinel.
    pub fn raw(&self, x: u32, y: u32) -> i16 {
        self.index(x, y)
            .map(|i| self.data[i])
            .unwrap_or_else(|| self.invalid_value())
    }

    pub fn set_raw(&mut self, x: u32, y: u32, value: i16) {
        if let Some(i) = self.index(x, y) {
            self.data[i] = value;
        }
    }

    /// Disparity in pixels, including the sentinel for unmatched pixels.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.raw(x, y) as f32 / DISPARITY_SCALE as f32
    }

    /// Store a disparity in pixels, rounded to the nearest 1/16.
    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        let raw = (value * DISPARITY_SCALE as f32).round();
        let raw = raw.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        self.set_raw(x, y, raw);
    }

    /// Mark a pixel as unmatched.
    pub fn invalidate(&mut self, x: u32, y: u32) {
        let invalid = self.invalid_value();
        self.set_raw(x, y, invalid);
    }

    pub fn is_valid(&self, x: u32, y: u32) -> bool {
        self.index(x, y)
            .map(|i| self.data[i] > self.invalid_value())
            .unwrap_or(false)
    }

    /// Disparity in pixels, or `None` for unmatched and out-of-bounds pixels.
    pub fn disparity(&self, x: u32, y: u32) -> Option<f32> {
        self.is_valid(x, y).then(|| self.get(x, y))
    }

    /// Disparities in pixels, row-major, sentinel included.
    pub fn to_float(&self) -> Vec<f32> {
        let scale = DISPARITY_SCALE as f32;
        self.data.iter().map(|&d| d as f32 / scale).collect()
    }

    pub fn valid_count(&self) -> usize {
        let invalid = self.invalid_value();
        self.data.iter().filter(|&&d| d > invalid).count()
    }

    /// 8-bit preview scaled over the search range; unmatched pixels are black.
    pub fn to_image(&self) -> GrayImage {
        let invalid = self.invalid_value();
        let lo = (self.min_disparity * DISPARITY_SCALE) as f32;
        let range = (self.num_disparities.max(1) * DISPARITY_SCALE) as f32;
        let pixels = self
            .data
            .iter()
            .map(|&d| {
                if d <= invalid {
                    0
                } else {
                    (((d as f32 - lo) / range) * 255.0).clamp(0.0, 255.0) as u8
                }
            })
            .collect();
        GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| GrayImage::from_pixel(self.width, self.height, Luma([0])))
    }
}

/// Vertex of the parabola through the costs at `best - 1`, `best` and
/// `best + 1`, as an offset in `(-0.5, 0.5)` pixels.
pub(crate) fn subpixel_offset(prev: u32, best: u32, next: u32) -> f32 {
    let denom = prev as f32 + next as f32 - 2.0 * best as f32;
    if denom <= 0.0 {
        return 0.0;
    }
    ((prev as f32 - next as f32) / (2.0 * denom)).clamp(-0.5, 0.5)
}

fn invalid_raw(min_disparity: i32) -> i16 {
    ((min_disparity - 1) * DISPARITY_SCALE) as i16
}
