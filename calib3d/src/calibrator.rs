use crate::calibration::generate_chessboard_object_points;
use crate::rig::{CalibrationReport, StereoCalibration, StereoView};
use crate::stereo::StereoCalibrationOptions;
use crate::Result;
use cv_core::Error;
use nalgebra::{Point2, Point3};
use tracing::debug;

/// Accumulates chessboard detections from a stereo rig and calibrates it.
///
/// The board has `rows x columns` interior corners spaced `square_size`
/// apart. Corners must be supplied row by row with x varying fastest, the
/// order produced by common chessboard detectors.
#[derive(Debug, Clone)]
pub struct StereoCalibrator {
    rows: usize,
    columns: usize,
    square_size: f64,
    image_size: (u32, u32),
    object_points: Vec<Point3<f64>>,
    views: Vec<StereoView>,
}

impl StereoCalibrator {
    pub fn new(rows: usize, columns: usize, square_size: f64, image_size: (u32, u32)) -> Result<Self> {
        if rows < 2 || columns < 2 {
            return Err(Error::InvalidInput(format!(
                "chessboard needs at least 2x2 interior corners, got {rows}x{columns}"
            )));
        }
        if !(square_size.is_finite() && square_size > 0.0) {
            return Err(Error::InvalidInput(format!(
                "square size must be positive, got {square_size}"
            )));
        }
        if image_size.0 == 0 || image_size.1 == 0 {
            return Err(Error::InvalidInput("image size must be non-zero".to_string()));
        }
        Ok(Self {
            rows,
            columns,
            square_size,
            image_size,
            object_points: generate_chessboard_object_points((columns, rows), square_size),
            views: Vec::new(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn square_size(&self) -> f64 {
        self.square_size
    }

    pub fn object_points(&self) -> &[Point3<f64>] {
        &self.object_points
    }

    pub fn views(&self) -> &[StereoView] {
        &self.views
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Records the corners detected in one left/right capture.
    pub fn add_corners(&mut self, left: Vec<Point2<f64>>, right: Vec<Point2<f64>>) -> Result<()> {
        let expected = self.rows * self.columns;
        if left.len() != expected || right.len() != expected {
            return Err(Error::InvalidInput(format!(
                "expected {expected} corners per image, got {} left and {} right",
                left.len(),
                right.len()
            )));
        }
        self.views
            .push(StereoView::new(self.object_points.clone(), left, right)?);
        debug!(views = self.views.len(), "added chessboard corners");
        Ok(())
    }

    pub fn calibrate(&self) -> Result<(StereoCalibration, CalibrationReport)> {
        self.calibrate_with_options(StereoCalibrationOptions::default())
    }

    pub fn calibrate_with_options(
        &self,
        options: StereoCalibrationOptions,
    ) -> Result<(StereoCalibration, CalibrationReport)> {
        StereoCalibration::build_with_options(&self.views, self.image_size, options)
    }
}
