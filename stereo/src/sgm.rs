use crate::disparity::{subpixel_offset, DisparityMap, DISPARITY_SCALE};
use crate::filters::{filter_speckles, speckle_range_raw};
use crate::params::{MatcherKind, ParameterSet};
use crate::{ensure_same_size, Error, Result, StereoMatcher};
use image::GrayImage;
use rayon::prelude::*;
use tracing::debug;

const SCANLINE_PATHS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL_PATHS: [(isize, isize); 4] = [(1, 1), (-1, 1), (1, -1), (-1, -1)];

/// Semi-global matcher.
///
/// Matching cost is the SAD over a `block_size` window with replicated
/// borders. Costs are aggregated along 4 scanline directions, or 8 with
/// `full_dp`, using the `p1`/`p2` smoothness penalties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemiGlobalMatcher {
    pub min_disparity: i32,
    pub num_disparities: i32,
    pub block_size: i32,
    pub p1: i32,
    pub p2: i32,
    /// Left-right consistency tolerance in pixels; negative disables it.
    pub disp12_max_diff: i32,
    pub uniqueness_ratio: i32,
    pub speckle_window_size: i32,
    pub speckle_range: i32,
    pub full_dp: bool,
}

fn clamped(name: &str, value: i32) -> i32 {
    MatcherKind::SemiGlobal
        .spec(name)
        .map(|s| s.clamp(value))
        .unwrap_or(value)
}

impl Default for SemiGlobalMatcher {
    fn default() -> Self {
        Self {
            min_disparity: 16,
            num_disparities: 96,
            block_size: 3,
            p1: 216,
            p2: 864,
            disp12_max_diff: 1,
            uniqueness_ratio: 10,
            speckle_window_size: 100,
            speckle_range: 32,
            full_dp: false,
        }
    }
}

impl SemiGlobalMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        if params.kind() != MatcherKind::SemiGlobal {
            return Err(Error::InvalidParameter(format!(
                "expected semi-global matcher parameters, got {}",
                params.kind()
            )));
        }
        Ok(Self {
            min_disparity: params.get("min_disparity")?,
            num_disparities: params.get("num_disparities")?,
            block_size: params.get("block_size")?,
            p1: params.get("p1")?,
            p2: params.get("p2")?,
            disp12_max_diff: params.get("disp12_max_diff")?,
            uniqueness_ratio: params.get("uniqueness_ratio")?,
            speckle_window_size: params.get("speckle_window_size")?,
            speckle_range: params.get("speckle_range")?,
            full_dp: params.get("full_dp")? != 0,
        })
    }

    /// Parameter set view of this matcher; out-of-range fields come back clamped.
    pub fn parameters(&self) -> Result<ParameterSet> {
        let mut params = ParameterSet::new(MatcherKind::SemiGlobal);
        params.set("min_disparity", self.min_disparity)?;
        params.set("num_disparities", self.num_disparities)?;
        params.set("block_size", self.block_size)?;
        params.set("p1", self.p1)?;
        params.set("p2", self.p2)?;
        params.set("disp12_max_diff", self.disp12_max_diff)?;
        params.set("uniqueness_ratio", self.uniqueness_ratio)?;
        params.set("speckle_window_size", self.speckle_window_size)?;
        params.set("speckle_range", self.speckle_range)?;
        params.set("full_dp", self.full_dp as i32)?;
        Ok(params)
    }

    pub fn with_disparity_range(mut self, min_disparity: i32, num_disparities: i32) -> Self {
        self.min_disparity = clamped("min_disparity", min_disparity);
        self.num_disparities = clamped("num_disparities", num_disparities);
        self
    }

    pub fn with_block_size(mut self, block_size: i32) -> Self {
        self.block_size = clamped("block_size", block_size);
        self
    }

    pub fn with_penalties(mut self, p1: i32, p2: i32) -> Self {
        self.p1 = clamped("p1", p1);
        self.p2 = clamped("p2", p2);
        self
    }

    pub fn with_disp12_max_diff(mut self, max_diff: i32) -> Self {
        self.disp12_max_diff = clamped("disp12_max_diff", max_diff);
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

    pub fn with_full_dp(mut self, full_dp: bool) -> Self {
        self.full_dp = full_dp;
        self
    }

    /// Penalties actually used: `p2` is raised above `p1` when needed.
    pub fn effective_penalties(&self) -> (u32, u32) {
        let p1 = clamped("p1", self.p1) as u32;
        let p2 = (clamped("p2", self.p2) as u32).max(p1 + 1);
        (p1, p2)
    }

    fn sanitized(&self) -> Self {
        Self {
            min_disparity: clamped("min_disparity", self.min_disparity),
            num_disparities: clamped("num_disparities", self.num_disparities),
            block_size: clamped("block_size", self.block_size),
            p1: clamped("p1", self.p1),
            p2: clamped("p2", self.p2),
            disp12_max_diff: clamped("disp12_max_diff", self.disp12_max_diff),
            uniqueness_ratio: clamped("uniqueness_ratio", self.uniqueness_ratio),
            speckle_window_size: clamped("speckle_window_size", self.speckle_window_size),
            speckle_range: clamped("speckle_range", self.speckle_range),
            full_dp: self.full_dp,
        }
    }

    fn paths(&self) -> Vec<(isize, isize)> {
        let mut paths = SCANLINE_PATHS.to_vec();
        if self.full_dp {
            paths.extend_from_slice(&DIAGONAL_PATHS);
        }
        paths
    }
}

impl StereoMatcher for SemiGlobalMatcher {
    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap> {
        ensure_same_size(left, right)?;
        let p = self.sanitized();
        let (p1, p2) = p.effective_penalties();

        let width = left.width() as usize;
        let height = left.height() as usize;
        let nd = p.num_disparities as usize;
        let mut disparity =
            DisparityMap::new(left.width(), left.height(), p.min_disparity, p.num_disparities);
        if width == 0 || height == 0 {
            return Ok(disparity);
        }

        let volume = CostVolume::new(left, right, p.min_disparity, nd, p.block_size as usize);
        let mut aggregated = vec![0u32; width * height * nd];
        for &(dx, dy) in &p.paths() {
            aggregate_along_path(&volume, &mut aggregated, dx, dy, p1, p2);
        }

        let select = Selection {
            width,
            num_disparities: nd,
            min_disparity: p.min_disparity,
            uniqueness_ratio: p.uniqueness_ratio as u64,
            disp12_max_diff: p.disp12_max_diff,
        };
        disparity
            .data_mut()
            .par_chunks_mut(width)
            .zip(aggregated.par_chunks(width * nd))
            .for_each(|(row, costs)| select.select_row(costs, row));

        let removed = filter_speckles(
            &mut disparity,
            p.speckle_window_size as usize,
            speckle_range_raw(p.speckle_range),
        );

        debug!(
            variant = "semi-global",
            width,
            height,
            num_disparities = nd,
            paths = p.paths().len(),
            valid = disparity.valid_count(),
            speckles_removed = removed,
            "computed disparity"
        );
        Ok(disparity)
    }
}

/// Per-pixel matching costs, `width * height * num_disparities`.
struct CostVolume {
    costs: Vec<u32>,
    width: usize,
    height: usize,
    num_disparities: usize,
}

impl CostVolume {
    fn new(
        left: &GrayImage,
        right: &GrayImage,
        min_disparity: i32,
        num_disparities: usize,
        block_size: usize,
    ) -> Self {
        let width = left.width() as usize;
        let height = left.height() as usize;
        let half = (block_size / 2) as isize;
        let lraw = left.as_raw();
        let rraw = right.as_raw();
        // Disparities pointing outside the right image get the worst cost.
        let unmatched = (block_size * block_size * 255) as u32;

        let mut costs = vec![0u32; width * height * num_disparities];
        costs
            .par_chunks_mut(width * num_disparities)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    for di in 0..num_disparities {
                        let d = min_disparity as isize + di as isize;
                        let xr = x as isize - d;
                        row[x * num_disparities + di] = if xr < 0 || xr >= width as isize {
                            unmatched
                        } else {
                            block_sad(lraw, rraw, width, height, x as isize, xr, y as isize, half)
                        };
                    }
                }
            });

        Self {
            costs,
            width,
            height,
            num_disparities,
        }
    }

    fn at(&self, x: usize, y: usize) -> &[u32] {
        let start = (y * self.width + x) * self.num_disparities;
        &self.costs[start..start + self.num_disparities]
    }
}

#[allow(clippy::too_many_arguments)]
fn block_sad(
    left: &[u8],
    right: &[u8],
    width: usize,
    height: usize,
    xl: isize,
    xr: isize,
    y: isize,
    half: isize,
) -> u32 {
    let clamp_x = |x: isize| x.clamp(0, width as isize - 1) as usize;
    let clamp_y = |y: isize| y.clamp(0, height as isize - 1) as usize;
    let mut sum = 0u32;
    for dy in -half..=half {
        let row = clamp_y(y + dy) * width;
        for dx in -half..=half {
            let l = left[row + clamp_x(xl + dx)] as i32;
            let r = right[row + clamp_x(xr + dx)] as i32;
            sum += (l - r).unsigned_abs();
        }
    }
    sum
}

/// Adds the path cost `L_r` for direction `(dx, dy)` into `aggregated`.
///
/// Rows are visited in the direction of `dy`; every pixel of a row only
/// depends on the previous row when `dy != 0`, so those rows are filled in
/// parallel. Horizontal paths are independent per row.
fn aggregate_along_path(
    volume: &CostVolume,
    aggregated: &mut [u32],
    dx: isize,
    dy: isize,
    p1: u32,
    p2: u32,
) {
    let (w, h, nd) = (volume.width, volume.height, volume.num_disparities);
    let row_len = w * nd;

    if dy == 0 {
        aggregated
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, agg_row)| {
                let mut previous = vec![0u32; nd];
                let mut current = vec![0u32; nd];
                let xs: Box<dyn Iterator<Item = usize>> = if dx > 0 {
                    Box::new(0..w)
                } else {
                    Box::new((0..w).rev())
                };
                for (step, x) in xs.enumerate() {
                    let prior = (step > 0).then_some(previous.as_slice());
                    path_step(volume.at(x, y), prior, &mut current, p1, p2);
                    for (acc, &l) in agg_row[x * nd..(x + 1) * nd].iter_mut().zip(&current) {
                        *acc = acc.saturating_add(l);
                    }
                    std::mem::swap(&mut previous, &mut current);
                }
            });
        return;
    }

    let ys: Vec<usize> = if dy > 0 {
        (0..h).collect()
    } else {
        (0..h).rev().collect()
    };
    let mut previous = vec![0u32; row_len];
    let mut current = vec![0u32; row_len];

    for (step, &y) in ys.iter().enumerate() {
        let prev_row = &previous;
        current
            .par_chunks_mut(nd)
            .enumerate()
            .for_each(|(x, cell)| {
                let px = x as isize - dx;
                let prior = (step > 0 && px >= 0 && px < w as isize)
                    .then(|| &prev_row[px as usize * nd..(px as usize + 1) * nd]);
                path_step(volume.at(x, y), prior, cell, p1, p2);
            });
        let agg_row = &mut aggregated[y * row_len..(y + 1) * row_len];
        agg_row
            .par_iter_mut()
            .zip(current.par_iter())
            .for_each(|(acc, &l)| *acc = acc.saturating_add(l));
        std::mem::swap(&mut previous, &mut current);
    }
}

/// One step of the SGM recurrence
/// `L(p,d) = C(p,d) + min(L(q,d), L(q,d±1) + P1, min_k L(q,k) + P2) - min_k L(q,k)`.
fn path_step(cost: &[u32], prior: Option<&[u32]>, out: &mut [u32], p1: u32, p2: u32) {
    let Some(prior) = prior else {
        out.copy_from_slice(cost);
        return;
    };
    let nd = cost.len();
    let prior_min = prior.iter().copied().min().unwrap_or(0);
    let jump = prior_min.saturating_add(p2);
    for d in 0..nd {
        let mut best = prior[d].min(jump);
        if d > 0 {
            best = best.min(prior[d - 1].saturating_add(p1));
        }
        if d + 1 < nd {
            best = best.min(prior[d + 1].saturating_add(p1));
        }
        out[d] = cost[d].saturating_add(best - prior_min);
    }
}

struct Selection {
    width: usize,
    num_disparities: usize,
    min_disparity: i32,
    uniqueness_ratio: u64,
    disp12_max_diff: i32,
}

impl Selection {
    /// Winner-take-all with uniqueness, sub-pixel refinement and the
    /// left-right check for one row of aggregated costs.
    fn select_row(&self, costs: &[u32], out: &mut [i16]) {
        let (w, nd) = (self.width, self.num_disparities);
        let mut best_index = vec![None::<usize>; w];

        // Best left pixel per right pixel, for the left-right check.
        let mut right_disp = vec![-1i32; w];
        let mut right_cost = vec![u32::MAX; w];

        for x in 0..w {
            let s = &costs[x * nd..(x + 1) * nd];
            let mut best = 0;
            for d in 1..nd {
                if s[d] < s[best] {
                    best = d;
                }
            }
            let d_abs = self.min_disparity + best as i32;
            let xr = x as i32 - d_abs;
            if xr < 0 {
                continue;
            }

            if self.uniqueness_ratio > 0 {
                let keep = 100u64.saturating_sub(self.uniqueness_ratio);
                let ambiguous = s.iter().enumerate().any(|(d, &cost)| {
                    (d as isize - best as isize).abs() > 1
                        && (cost as u64) * keep < (s[best] as u64) * 100
                });
                if ambiguous {
                    continue;
                }
            }

            if s[best] < right_cost[xr as usize] {
                right_cost[xr as usize] = s[best];
                right_disp[xr as usize] = d_abs;
            }
            best_index[x] = Some(best);
        }

        for x in 0..w {
            let Some(best) = best_index[x] else { continue };
            let s = &costs[x * nd..(x + 1) * nd];
            let offset = if best > 0 && best + 1 < nd {
                subpixel_offset(s[best - 1], s[best], s[best + 1])
            } else {
                0.0
            };
            let value = (self.min_disparity as f32 + best as f32 + offset) * DISPARITY_SCALE as f32;
            let raw = value.round() as i32;

            if self.disp12_max_diff >= 0 && !self.consistent(x, raw, &right_disp) {
                continue;
            }
            out[x] = raw as i16;
        }
    }

    fn consistent(&self, x: usize, raw: i32, right_disp: &[i32]) -> bool {
        let lo = raw.div_euclid(DISPARITY_SCALE);
        let hi = (raw + DISPARITY_SCALE - 1).div_euclid(DISPARITY_SCALE);
        [lo, hi].iter().all(|&d| {
            let xr = x as i32 - d;
            if xr < 0 || xr >= self.width as i32 {
                return true;
            }
            let other = right_disp[xr as usize];
            other < 0 || (other - d).abs() <= self.disp12_max_diff
        })
    }
}
