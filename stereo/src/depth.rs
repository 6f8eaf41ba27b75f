//! Disparity to 3D reprojection and depth filtering.
//!
//! A pixel `(u, v)` with disparity `d` maps to `Q * [u, v, d, 1]^T`, divided
//! by its homogeneous component.

use crate::{DisparityMap, Error, Result};
use cv_core::PointCloud;
use image::RgbImage;
use nalgebra::{Matrix4, Point3, Vector4};
use rayon::prelude::*;
use tracing::debug;

/// Depth assigned to unmatched pixels by OpenCV-style reprojection.
pub const DEFAULT_MISSING_DEPTH: f32 = 10_000.0;

/// How unmatched pixels are reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReprojectOptions {
    /// When set, pixels at or below the no-match sentinel get this `z`
    /// instead of the raw projection of the sentinel disparity.
    pub missing_depth: Option<f32>,
}

impl ReprojectOptions {
    pub fn with_missing_depth(depth: f32) -> Self {
        Self {
            missing_depth: Some(depth),
        }
    }
}

/// Reproject every pixel, row-major. Unmatched pixels are included.
pub fn reproject_image_to_3d(
    disparity: &DisparityMap,
    q: &Matrix4<f64>,
    options: &ReprojectOptions,
) -> Vec<Point3<f32>> {
    let width = disparity.width() as usize;
    let invalid = disparity.invalid_value();
    let mut points = vec![Point3::origin(); disparity.data().len()];
    if width == 0 {
        return points;
    }

    points
        .par_chunks_mut(width)
        .zip(disparity.data().par_chunks(width))
        .enumerate()
        .for_each(|(v, (out, raw))| {
            for (u, (point, &d)) in out.iter_mut().zip(raw).enumerate() {
                let disp = d as f64 / crate::DISPARITY_SCALE as f64;
                let h = q * Vector4::new(u as f64, v as f64, disp, 1.0);
                let w = h[3];
                let mut p = Point3::new((h[0] / w) as f32, (h[1] / w) as f32, (h[2] / w) as f32);
                if d <= invalid {
                    if let Some(z) = options.missing_depth {
                        p.z = z;
                    }
                }
                *point = p;
            }
        });

    points
}

/// Colored point cloud with one entry per pixel, in row-major order.
pub fn reproject(
    disparity: &DisparityMap,
    color: &RgbImage,
    q: &Matrix4<f64>,
    options: &ReprojectOptions,
) -> Result<PointCloud> {
    if color.dimensions() != disparity.dimensions() {
        return Err(Error::DimensionMismatch(format!(
            "Color image is {}x{} but disparity map is {}x{}",
            color.width(),
            color.height(),
            disparity.width(),
            disparity.height()
        )));
    }

    let points = reproject_image_to_3d(disparity, q, options);
    let colors = color.pixels().copied().collect();
    PointCloud::new(points, colors)
}

/// Quantity compared against [`DepthFilter::max_depth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthMetric {
    /// Distance along the optical axis.
    #[default]
    Z,
    /// Distance from the camera center.
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthFilter {
    pub max_depth: f32,
    pub metric: DepthMetric,
}

impl DepthFilter {
    pub fn new(max_depth: f32) -> Self {
        Self {
            max_depth,
            metric: DepthMetric::Z,
        }
    }

    /// Threshold at `multiple` times a scene length such as the board square.
    pub fn from_scene_scale(scale: f32, multiple: f32) -> Self {
        Self::new(scale * multiple)
    }

    pub fn with_metric(mut self, metric: DepthMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn depth_of(&self, p: &Point3<f32>) -> f32 {
        match self.metric {
            DepthMetric::Z => p.z,
            DepthMetric::Euclidean => p.coords.norm(),
        }
    }

    /// True for points whose coordinates are finite and whose depth is below
    /// the threshold.
    pub fn keeps(&self, p: &Point3<f32>) -> bool {
        p.coords.iter().all(|c| c.is_finite()) && self.depth_of(p) < self.max_depth
    }
}

/// Order-preserving copy of `cloud` without the points `filter` rejects.
pub fn filter_infinity(cloud: &PointCloud, filter: &DepthFilter) -> PointCloud {
    let kept: PointCloud = cloud
        .iter()
        .filter(|(p, _)| filter.keeps(p))
        .map(|(p, c)| (*p, *c))
        .collect();
    debug!(
        kept = kept.len(),
        removed = cloud.len() - kept.len(),
        max_depth = filter.max_depth,
        "filtered point cloud"
    );
    kept
}
