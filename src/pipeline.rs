//! Raw stereo pair to filtered, colored point cloud.

use crate::{Error, Result};
use cv_calib3d::{RectifiedPair, StereoCalibration};
use cv_core::PointCloud;
use cv_io::write_ply_file;
use cv_stereo::{
    filter_infinity, reproject, BlockMatcher, DepthFilter, DisparityMap, MatcherKind,
    ReprojectOptions, DEFAULT_MISSING_DEPTH,
};
use image::{Rgb, RgbImage};
use std::path::Path;
use tracing::info;

/// Reprojection and filtering settings of a [`CalibratedPair`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub reproject: ReprojectOptions,
    pub filter: DepthFilter,
}

impl Default for PipelineOptions {
    /// Unmatched pixels are pushed to [`DEFAULT_MISSING_DEPTH`] and removed by
    /// a filter at the same depth.
    fn default() -> Self {
        Self {
            reproject: ReprojectOptions::with_missing_depth(DEFAULT_MISSING_DEPTH),
            filter: DepthFilter::new(DEFAULT_MISSING_DEPTH),
        }
    }
}

impl PipelineOptions {
    /// Keep points closer than `multiple` scene lengths, e.g. board squares.
    pub fn with_scene_scale(mut self, scale: f32, multiple: f32) -> Self {
        self.filter = DepthFilter::from_scene_scale(scale, multiple).with_metric(self.filter.metric);
        self
    }
}

/// A calibrated stereo rig together with the matcher used on its images.
#[derive(Debug, Clone)]
pub struct CalibratedPair {
    pub calibration: StereoCalibration,
    pub block_matcher: BlockMatcher,
    pub options: PipelineOptions,
}

impl CalibratedPair {
    pub fn new(calibration: StereoCalibration, block_matcher: BlockMatcher) -> Self {
        Self {
            calibration,
            block_matcher,
            options: PipelineOptions::default(),
        }
    }

    /// Calibration folder plus an optional matcher settings file.
    pub fn load<P: AsRef<Path>, S: AsRef<Path>>(
        calibration_dir: P,
        kind: MatcherKind,
        settings: Option<S>,
    ) -> Result<Self> {
        let calibration = StereoCalibration::load(calibration_dir)?;
        let block_matcher = match settings {
            Some(path) => BlockMatcher::with_settings(kind, path)?,
            None => BlockMatcher::new(kind),
        };
        Ok(Self::new(calibration, block_matcher))
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Undistorted, rectified pair cropped to the common valid region.
    pub fn rectify(&self, left: &RgbImage, right: &RgbImage) -> Result<RectifiedPair<Rgb<u8>>> {
        self.calibration.rectify(left, right)
    }

    /// Disparity of a rectified pair, matched on luma.
    pub fn disparity(&self, pair: &RectifiedPair<Rgb<u8>>) -> Result<DisparityMap> {
        self.block_matcher.compute_color(&pair.left, &pair.right)
    }

    /// Reproject a disparity map of `pair` and drop points beyond the filter.
    pub fn reproject(
        &self,
        disparity: &DisparityMap,
        pair: &RectifiedPair<Rgb<u8>>,
    ) -> Result<PointCloud> {
        if pair.left.dimensions() != disparity.dimensions() {
            return Err(Error::DimensionMismatch(format!(
                "disparity map is {}x{} but rectified image is {}x{}",
                disparity.width(),
                disparity.height(),
                pair.left.width(),
                pair.left.height()
            )));
        }
        let q = self.calibration.reprojection_matrix_for(&pair.roi);
        let cloud = reproject(disparity, &pair.left, &q, &self.options.reproject)?;
        Ok(filter_infinity(&cloud, &self.options.filter))
    }

    /// Raw pair to filtered point cloud.
    pub fn point_cloud(&self, left: &RgbImage, right: &RgbImage) -> Result<PointCloud> {
        let pair = self.rectify(left, right)?;
        let disparity = self.disparity(&pair)?;
        let cloud = self.reproject(&disparity, &pair)?;
        info!(
            variant = %self.block_matcher.kind(),
            matched = disparity.valid_count(),
            points = cloud.len(),
            "computed point cloud"
        );
        Ok(cloud)
    }

    /// [`CalibratedPair::point_cloud`] written to a PLY file.
    pub fn process<P: AsRef<Path>>(
        &self,
        left: &RgbImage,
        right: &RgbImage,
        output: P,
    ) -> Result<PointCloud> {
        let cloud = self.point_cloud(left, right)?;
        write_ply_file(output, &cloud)?;
        Ok(cloud)
    }
}
