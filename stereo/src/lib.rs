//! Stereo matching and depth estimation
//!
//! Disparity maps from rectified pairs with a local block matcher or a
//! semi-global matcher, reprojection of disparities to colored point clouds,
//! and aggregation of tuned matcher settings.

use image::GrayImage;

pub mod block_matching;
pub mod depth;
pub mod disparity;
pub mod filters;
pub mod matcher;
pub mod params;
pub mod sgm;
pub mod tuning;

pub use block_matching::{BasicBlockMatcher, PreFilter};
pub use depth::*;
pub use disparity::{DisparityMap, DISPARITY_SCALE};
pub use filters::filter_speckles;
pub use matcher::BlockMatcher;
pub use params::{
    Assignment, MatcherKind, ParameterSet, ParameterSpec, BASIC_SCHEMA, SEMI_GLOBAL_SCHEMA,
};
pub use sgm::SemiGlobalMatcher;
pub use tuning::{SettingReport, TuningAggregator};

pub use cv_core::{Error, Result};

/// Stereo matching algorithm trait
pub trait StereoMatcher {
    /// Disparity of every left-image pixel. Deterministic for identical
    /// inputs and parameters.
    fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<DisparityMap>;
}

pub(crate) fn ensure_same_size(left: &GrayImage, right: &GrayImage) -> Result<()> {
    if left.dimensions() != right.dimensions() {
        return Err(Error::DimensionMismatch(format!(
            "Left and right images must have the same dimensions ({}x{} vs {}x{})",
            left.width(),
            left.height(),
            right.width(),
            right.height()
        )));
    }
    Ok(())
}
