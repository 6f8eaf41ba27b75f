use crate::block_matching::BasicBlockMatcher;
use crate::params::{Assignment, MatcherKind, ParameterSet};
use crate::sgm::SemiGlobalMatcher;
use crate::{DisparityMap, Error, Result, StereoMatcher};
use image::{imageops, RgbImage};
use std::path::Path;
use tracing::{info, warn};

/// Block matcher configured through a [`ParameterSet`].
///
/// The active variant is fixed by the parameter set's [`MatcherKind`]; every
/// write is clamped into the declared range and the applied value is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMatcher {
    params: ParameterSet,
}

impl BlockMatcher {
    pub fn new(kind: MatcherKind) -> Self {
        Self {
            params: ParameterSet::new(kind),
        }
    }

    pub fn basic() -> Self {
        Self::new(MatcherKind::Basic)
    }

    pub fn semi_global() -> Self {
        Self::new(MatcherKind::SemiGlobal)
    }

    pub fn from_parameters(params: ParameterSet) -> Self {
        Self { params }
    }

    /// Defaults of `kind` overridden by a settings file.
    pub fn with_settings<P: AsRef<Path>>(kind: MatcherKind, path: P) -> Result<Self> {
        let mut matcher = Self::new(kind);
        matcher.load_settings(path)?;
        Ok(matcher)
    }

    pub fn kind(&self) -> MatcherKind {
        self.params.kind()
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    /// Replace all parameters; the kind must match.
    pub fn set_parameters(&mut self, params: ParameterSet) -> Result<()> {
        if params.kind() != self.kind() {
            return Err(Error::InvalidParameter(format!(
                "cannot apply {} parameters to a {} matcher",
                params.kind(),
                self.kind()
            )));
        }
        self.params = params;
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Result<i32> {
        self.params.get(name)
    }

    pub fn set_parameter(&mut self, name: &str, value: i32) -> Result<Assignment> {
        let assignment = self.params.set(name, value)?;
        log_clamp(&assignment);
        Ok(assignment)
    }

    /// Declared upper bound of every parameter, in declaration order.
    pub fn parameter_maxima(&self) -> Vec<(&'static str, i32)> {
        self.params.parameter_maxima()
    }

    /// Apply a settings file and return the resulting parameters.
    pub fn load_settings<P: AsRef<Path>>(&mut self, path: P) -> Result<ParameterSet> {
        let path = path.as_ref();
        let assignments = self.params.update_from_file(path)?;
        assignments.iter().for_each(log_clamp);
        info!(
            path = %path.display(),
            variant = %self.kind(),
            applied = assignments.len(),
            "loaded matcher settings"
        );
        Ok(self.params.clone())
    }

    pub fn save_settings<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.params.save(path)?;
        info!(path = %path.display(), variant = %self.kind(), "saved matcher settings");
        Ok(())
    }

    /// Match two color images through their luma.
    pub fn compute_color(&self, left: &RgbImage, right: &RgbImage) -> Result<DisparityMap> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::DimensionMismatch(
                "Left and right images must have the same dimensions".to_string(),
            ));
        }
        self.compute(&imageops::grayscale(left), &imageops::grayscale(right))
    }
}

impl StereoMatcher for BlockMatcher {
    fn compute(&self, left: &image::GrayImage, right: &image::GrayImage) -> Result<DisparityMap> {
        match self.kind() {
            MatcherKind::Basic => BasicBlockMatcher::from_parameters(&self.params)?.compute(left, right),
            MatcherKind::SemiGlobal => {
                SemiGlobalMatcher::from_parameters(&self.params)?.compute(left, right)
            }
        }
    }
}

fn log_clamp(assignment: &Assignment) {
    if assignment.was_clamped() {
        warn!(
            parameter = assignment.name,
            requested = assignment.requested,
            applied = assignment.applied,
            "parameter value clamped"
        );
    }
}
