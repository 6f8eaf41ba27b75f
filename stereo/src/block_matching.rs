use crate::disparity::{subpixel_offset, DisparityMap, DISPARITY_SCALE};
use crate::filters::{filter_speckles, speckle_range_raw};
use crate::params::{MatcherKind, ParameterSet};
use crate::{ensure_same_size, Error, Result, StereoMatcher};
use cv_imgproc::{normalized_response_prefilter, sobel_x_prefilter, NORMALIZED_RESPONSE_WINDOW};
use image::GrayImage;
use rayon::prelude::*;
use tracing::debug;

/// Prefilter applied to both views before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreFilter {
    #[default]
    NormalizedResponse,
    SobelX,
}

impl PreFilter {
    fn from_code(code: i32) -> Self {
        if code == 1 {
            PreFilter::SobelX
        } else {
            PreFilter::NormalizedResponse
        }
    }

    fn code(self) -> i32 {
        match self {
            PreFilter::NormalizedResponse => 0,
            PreFilter::SobelX => 1,
        }
    }

    fn apply(self, image: &GrayImage, cap: u8) -> GrayImage {
        match self {
            PreFilter::NormalizedResponse => {
                normalized_response_prefilter(image, NORMALIZED_RESPONSE_WINDOW, cap)
            }
            PreFilter::SobelX => sobel_x_prefilter(image, cap),
        }
    }
}

/// Local SAD block matcher over prefiltered images.
///
/// Disparities are searched in `0..search_range`. Pixels closer to the left
/// border than `search_range - 1 + window_size / 2`, or closer to any other
/// border than half a window, are left unmatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlockMatcher {
    pub pre_filter: PreFilter,
    pub pre_filter_cap: i32,
    pub search_range: i32,
    pub window_size: i32,
    pub texture_threshold: i32,
    pub uniqueness_ratio: i32,
    pub speckle_window_size: i32,
    pub speckle_range: i32,
}

fn clamped(name: &str, value: i32) -> i32 {
    MatcherKind::Basic
        .spec(name)
        .map(|s| s.clamp(value))
        .unwrap_or(value)
}

impl Default for BasicBlockMatcher {
    fn default() -> Self {
        Self {
            pre_filter: PreFilter::NormalizedResponse,
            pre_filter_cap: 31,
            search_range: 80,
            window_size: 21,
            texture_threshold: 10,
            uniqueness_ratio: 15,
            speckle_window_size: 0,
            speckle_range: 0,
        }
    }
}

impl BasicBlockMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        if params.kind() != MatcherKind::Basic {
            return Err(Error::InvalidParameter(format!(
                "expected basic matcher parameters, got {}",
                params.kind()
            )));
        }
        Ok(Self {
            pre_filter: PreFilter::from_code(params.get("pre_filter_type")?),
            pre_filter_cap: params.get("pre_filter_cap")?,
            search_range: params.get("search_range")?,
            window_size: params.get("window_size")?,
            texture_threshold: params.get("texture_threshold")?,
            uniqueness_ratio: params.get("uniqueness_ratio")?,
            speckle_window_size: params.get("speckle_window_size")?,
            speckle_range: params.get("speckle_range")?,
        })
    }

    /// Parameter set view of this matcher; out-of-range fields come back clamped.
    pub fn parameters(&self) -> Result<ParameterSet> {
        let mut params = ParameterSet::new(MatcherKind::Basic);
        params.set("pre_filter_type", self.pre_filter.code())?;
        params.set("pre_filter_cap", self.pre_filter_cap)?;
        params.set("search_range", self.search_range)?;
        params.set("window_size", self.window_size)?;
        params.set("texture_threshold", self.texture_threshold)?;
        params.set("uniqueness_ratio", self.uniqueness_ratio)?;
        params.set("speckle_window_size", self.speckle_window_size)?;
        params.set("speckle_range", self.speckle_range)?;
        Ok(params)
    }

    pub fn with_pre_filter(mut self, pre_filter: PreFilter, cap: i32) -> Self {
        self.pre_filter = pre_filter;
        self.pre_filter_cap = clamped("pre_filter_cap", cap);
        self
    }

    pub fn with_search_range(mut self, search_range: i32) -> Self {
        self.search_range = clamped("search_range", search_range);
        self
    }

    pub fn with_window_size(mut self, window_size: i32) -> Self {
        self.window_size = clamped("window_size", window_size);
        self
    }

    pub fn with_texture_threshold(mut self, threshold: i32) -> Self {
        self.texture_threshold = clamped("texture_threshold", threshold);
        self
    }

    pub fn with_uniqueness_ratio(mut self, ratio: i32) -> Self {
        self.uniqueness_ratio = clamped("uniqueness_ratio", ratio);
        self
    }

    pub fn with_speckle_filter(mut self, window_size: i32, range: i32) -> Self {
        self.speckle_window_size = clamped("speckle_window_size", window_size);
        self.speckle_range = clamped("speckle_range", range);
        self
    }

    fn sanitized(&self) -> Self {
        Self {
            pre_filter: self.pre_filter,
            pre_filter_cap: clamped("pre_filter_cap", self.pre_filter_cap),
            search_range: clamped("search_range", self.search_range),
            window_size: clamped("window_size", self.window_size),
            texture_threshold: clamped("texture_threshold", self.texture_threshold),
            uniqueness_ratio: clamped("uniqueness_ratio", self.uniqueness_ratio),
            speckle_window_size: clamped("speckle_window_size", self.speckle_window_size),
            speckle_range: clamped("speckle_range", self.speckle_range),
        }
    }
}

impl StereoMatcher for BasicBlockMatcher {
    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        ensure_same_size(left, right)?;
        let p = self.sanitized();

        let width = left.width() as usize;
        let height = left.height() as usize;
        let num_disparities = p.search_range as usize;
        let half = (p.window_size / 2) as usize;
        let cap = p.pre_filter_cap as u8;

        let mut disparity =
            DisparityMap::new(left.width(), left.height(), 0, num_disparities as i32);
        if width == 0 || height == 0 {
            return Ok(disparity);
        }

        let lp = p.pre_filter.apply(left, cap);
        let rp = p.pre_filter.apply(right, cap);
        let rows = RowContext {
            left: lp.as_raw(),
            right: rp.as_raw(),
            width,
            half,
            num_disparities,
            cap: cap as u32,
            texture_threshold: p.texture_threshold as u32,
            uniqueness_ratio: p.uniqueness_ratio as u64,
        };

        disparity
            .data_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                if y >= half && y + half < height {
                    rows.match_row(y, row);
                }
            });

        let removed = filter_speckles(
            &mut disparity,
            p.speckle_window_size as usize,
            speckle_range_raw(p.speckle_range),
        );

        debug!(
            variant = "basic",
            width,
            height,
            num_disparities,
            valid = disparity.valid_count(),
            speckles_removed = removed,
            "computed disparity"
        );
        Ok(disparity)
    }
}

struct RowContext<'a> {
    left: &'a [u8],
    right: &'a [u8],
    width: usize,
    half: usize,
    num_disparities: usize,
    cap: u32,
    texture_threshold: u32,
    uniqueness_ratio: u64,
}

impl RowContext<'_> {
    fn match_row(&self, y: usize, out: &mut [i16]) {
        let (w, half, nd) = (self.width, self.half, self.num_disparities);
        let lo = half + nd - 1;
        let hi = w.saturating_sub(half);
        if lo >= hi {
            return;
        }

        let span = hi - lo;
        let mut costs = vec![0u32; span * nd];
        let mut column = vec![0u32; w];

        for d in 0..nd {
            for x in (lo - half)..w {
                let mut sum = 0u32;
                for yy in (y - half)..=(y + half) {
                    let l = self.left[yy * w + x] as i32;
                    let r = self.right[yy * w + x - d] as i32;
                    sum += (l - r).unsigned_abs();
                }
                column[x] = sum;
            }
            let mut acc: u32 = column[lo - half..=lo + half].iter().sum();
            for x in lo..hi {
                if x > lo {
                    acc = acc + column[x + half] - column[x - half - 1];
                }
                costs[(x - lo) * nd + d] = acc;
            }
        }

        let textures = self.texture_row(y, lo, hi);

        for x in lo..hi {
            if textures[x - lo] < self.texture_threshold {
                continue;
            }
            let c = &costs[(x - lo) * nd..(x - lo + 1) * nd];
            let mut best = 0;
            for d in 1..nd {
                if c[d] < c[best] {
                    best = d;
                }
            }

            if self.uniqueness_ratio > 0 {
                let bound = c[best] as u64 * (100 + self.uniqueness_ratio);
                let ambiguous = c.iter().enumerate().any(|(d, &cost)| {
                    (d as isize - best as isize).abs() > 1 && cost as u64 * 100 <= bound
                });
                if ambiguous {
                    continue;
                }
            }

            let offset = if best > 0 && best + 1 < nd {
                subpixel_offset(c[best - 1], c[best], c[best + 1])
            } else {
                0.0
            };
            out[x] = ((best as f32 + offset) * DISPARITY_SCALE as f32).round() as i16;
        }
    }

    /// Window sums of `|prefiltered - cap|` on the left view.
    fn texture_row(&self, y: usize, lo: usize, hi: usize) -> Vec<u32> {
        let (w, half) = (self.width, self.half);
        let column: Vec<u32> = (0..w)
            .map(|x| {
                ((y - half)..=(y + half))
                    .map(|yy| (self.left[yy * w + x] as i32 - self.cap as i32).unsigned_abs())
                    .sum()
            })
            .collect();

        let mut sums = Vec::with_capacity(hi - lo);
        let mut acc: u32 = column[lo - half..=lo + half].iter().sum();
        for x in lo..hi {
            if x > lo {
                acc = acc + column[x + half] - column[x - half - 1];
            }
            sums.push(acc);
        }
        sums
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn texture(x: u32, y: u32) -> u8 {
        let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h ^ (h >> 16)) as u8
    }

    fn shifted_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
        let left = GrayImage::from_fn(width, height, |x, y| Luma([texture(x, y)]));
        let right = GrayImage::from_fn(width, height, |x, y| Luma([texture(x + shift, y)]));
        (left, right)
    }

    #[test]
    fn recovers_constant_shift() {
        let (left, right) = shifted_pair(64, 40, 5);
        let matcher = BasicBlockMatcher::new()
            .with_search_range(16)
            .with_window_size(9);

        let disparity = matcher.compute(&left, &right).unwrap();
        assert_eq!(disparity.width(), 64);
        assert_eq!(disparity.num_disparities, 16);

        let d = disparity.disparity(40, 20).unwrap();
        assert!((d - 5.0).abs() < 1.0, "disparity {}", d);
        assert!(!disparity.is_valid(5, 20));
    }

    #[test]
    fn flat_images_fail_texture_threshold() {
        let flat = GrayImage::from_pixel(48, 32, Luma([128]));
        let matcher = BasicBlockMatcher::new()
            .with_search_range(16)
            .with_window_size(5);
        let disparity = matcher.compute(&flat, &flat).unwrap();
        assert_eq!(disparity.valid_count(), 0);
    }

    #[test]
    fn builders_clamp() {
        let matcher = BasicBlockMatcher::new()
            .with_window_size(4)
            .with_search_range(1000);
        assert_eq!(matcher.window_size, 5);
        assert_eq!(matcher.search_range, 256);

        let params = matcher.parameters().unwrap();
        assert_eq!(params.get("window_size").unwrap(), 5);
    }

    #[test]
    fn default_matches_schema() {
        let params = BasicBlockMatcher::default().parameters().unwrap();
        assert_eq!(params, ParameterSet::new(MatcherKind::Basic));
    }

    #[test]
    fn rejects_semi_global_parameters() {
        let params = ParameterSet::new(MatcherKind::SemiGlobal);
        assert!(BasicBlockMatcher::from_parameters(&params).is_err());
    }
}
