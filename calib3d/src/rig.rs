//! Calibrated stereo rig: everything needed to rectify image pairs and
//! reproject disparities, with persistence to a calibration folder.

use crate::distortion::{init_undistort_rectify_map, undistort_points};
use crate::stereo::{stereo_calibrate_with_options, stereo_rectify, StereoCalibrationOptions, StereoRectification};
use crate::storage::{read_array, read_matrix, write_array, write_matrix};
use crate::Result;
use cv_core::{CameraIntrinsics, Distortion, Error, Pose, Roi};
use cv_imgproc::{remap, BorderMode, Interpolation};
use image::{imageops, ImageBuffer, Pixel};
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector3};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// One capture of the calibration board seen by both cameras.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoView {
    pub object_points: Vec<Point3<f64>>,
    pub left: Vec<Point2<f64>>,
    pub right: Vec<Point2<f64>>,
}

impl StereoView {
    pub fn new(
        object_points: Vec<Point3<f64>>,
        left: Vec<Point2<f64>>,
        right: Vec<Point2<f64>>,
    ) -> Result<Self> {
        if left.len() != object_points.len() || right.len() != object_points.len() {
            return Err(Error::DimensionMismatch(format!(
                "view has {} board points but {} left and {} right corners",
                object_points.len(),
                left.len(),
                right.len()
            )));
        }
        Ok(Self {
            object_points,
            left,
            right,
        })
    }
}

/// Quality figures produced when a calibration is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationReport {
    pub views: usize,
    /// RMS reprojection error over both cameras, in pixels.
    pub rms_reprojection_error: f64,
    pub left_rms: f64,
    pub right_rms: f64,
    /// Mean distance in pixels between undistorted corners and their epipolar lines.
    pub epipolar_error: f64,
    pub iterations: usize,
}

impl CalibrationReport {
    /// Fails with [`Error::DegenerateCalibration`] when the RMS error exceeds `bound`.
    pub fn ensure_acceptable(&self, bound: f64) -> Result<()> {
        if self.rms_reprojection_error.is_finite() && self.rms_reprojection_error <= bound {
            Ok(())
        } else {
            Err(Error::DegenerateCalibration {
                rms: self.rms_reprojection_error,
                bound,
            })
        }
    }
}

#[derive(Clone)]
struct RectifyMap {
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

/// Rectified image pair cropped to the region valid in both views.
#[derive(Debug, Clone)]
pub struct RectifiedPair<P: Pixel> {
    pub left: ImageBuffer<P, Vec<P::Subpixel>>,
    pub right: ImageBuffer<P, Vec<P::Subpixel>>,
    /// Crop rectangle in full rectified-image coordinates.
    pub roi: Roi,
}

/// Immutable stereo rig calibration.
#[derive(Clone)]
pub struct StereoCalibration {
    image_size: (u32, u32),
    intrinsics: [CameraIntrinsics; 2],
    distortion: [Distortion; 2],
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
    essential: Matrix3<f64>,
    fundamental: Matrix3<f64>,
    rectification: StereoRectification,
    maps: [RectifyMap; 2],
}

impl fmt::Debug for StereoCalibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StereoCalibration")
            .field("image_size", &self.image_size)
            .field("intrinsics", &self.intrinsics)
            .field("distortion", &self.distortion)
            .field("rotation", &self.rotation)
            .field("translation", &self.translation)
            .field("rectification", &self.rectification)
            .finish_non_exhaustive()
    }
}

impl StereoCalibration {
    pub fn build(views: &[StereoView], image_size: (u32, u32)) -> Result<(Self, CalibrationReport)> {
        Self::build_with_options(views, image_size, StereoCalibrationOptions::default())
    }

    /// Calibrates the rig from matched corner sets, then derives the
    /// rectification and its pixel maps.
    pub fn build_with_options(
        views: &[StereoView],
        image_size: (u32, u32),
        options: StereoCalibrationOptions,
    ) -> Result<(Self, CalibrationReport)> {
        if views.is_empty() {
            return Err(Error::InvalidInput(
                "stereo calibration needs at least one view".to_string(),
            ));
        }
        let object: Vec<_> = views.iter().map(|v| v.object_points.clone()).collect();
        let left: Vec<_> = views.iter().map(|v| v.left.clone()).collect();
        let right: Vec<_> = views.iter().map(|v| v.right.clone()).collect();

        let result = stereo_calibrate_with_options(&object, &left, &right, image_size, options)?;
        let intrinsics = [result.left.intrinsics, result.right.intrinsics];
        let distortion = [result.left.distortion, result.right.distortion];
        let rectification = stereo_rectify(
            &intrinsics[0],
            &distortion[0],
            &intrinsics[1],
            &distortion[1],
            image_size,
            &result.relative_extrinsics,
            options.zero_disparity,
        )?;

        let calibration = Self::from_parts(
            image_size,
            intrinsics,
            distortion,
            result.relative_extrinsics,
            result.essential_matrix,
            result.fundamental_matrix,
            rectification,
        )?;
        let report = CalibrationReport {
            views: views.len(),
            rms_reprojection_error: result.rms_reprojection_error,
            left_rms: result.left.rms_reprojection_error,
            right_rms: result.right.rms_reprojection_error,
            epipolar_error: calibration.epipolar_error(views)?,
            iterations: result.iterations,
        };
        info!(
            views = report.views,
            rms = report.rms_reprojection_error,
            epipolar_error = report.epipolar_error,
            "stereo calibration complete"
        );
        Ok((calibration, report))
    }

    fn from_parts(
        image_size: (u32, u32),
        intrinsics: [CameraIntrinsics; 2],
        distortion: [Distortion; 2],
        relative: Pose,
        essential: Matrix3<f64>,
        fundamental: Matrix3<f64>,
        rectification: StereoRectification,
    ) -> Result<Self> {
        let (w, h) = image_size;
        let left_map = init_undistort_rectify_map(
            image_size,
            &intrinsics[0],
            &distortion[0],
            &rectification.r1,
            &CameraIntrinsics::from_projection(&rectification.p1, w, h),
        )?;
        let right_map = init_undistort_rectify_map(
            image_size,
            &intrinsics[1],
            &distortion[1],
            &rectification.r2,
            &CameraIntrinsics::from_projection(&rectification.p2, w, h),
        )?;
        Ok(Self {
            image_size,
            intrinsics,
            distortion,
            rotation: relative.rotation,
            translation: relative.translation,
            essential,
            fundamental,
            rectification,
            maps: [
                RectifyMap {
                    map_x: left_map.0,
                    map_y: left_map.1,
                },
                RectifyMap {
                    map_x: right_map.0,
                    map_y: right_map.1,
                },
            ],
        })
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    pub fn intrinsics(&self, side: Side) -> &CameraIntrinsics {
        &self.intrinsics[side.index()]
    }

    pub fn distortion(&self, side: Side) -> &Distortion {
        &self.distortion[side.index()]
    }

    /// Rotation from left-camera to right-camera coordinates.
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn essential_matrix(&self) -> &Matrix3<f64> {
        &self.essential
    }

    pub fn fundamental_matrix(&self) -> &Matrix3<f64> {
        &self.fundamental
    }

    pub fn rectification_rotation(&self, side: Side) -> &Matrix3<f64> {
        match side {
            Side::Left => &self.rectification.r1,
            Side::Right => &self.rectification.r2,
        }
    }

    pub fn projection(&self, side: Side) -> &Matrix3x4<f64> {
        match side {
            Side::Left => &self.rectification.p1,
            Side::Right => &self.rectification.p2,
        }
    }

    /// Disparity-to-depth matrix for full-size rectified images.
    pub fn reprojection_matrix(&self) -> &Matrix4<f64> {
        &self.rectification.q
    }

    /// Disparity-to-depth matrix for images cropped to `roi`.
    pub fn reprojection_matrix_for(&self, roi: &Roi) -> Matrix4<f64> {
        let mut shift = Matrix4::identity();
        shift[(0, 3)] = roi.x as f64;
        shift[(1, 3)] = roi.y as f64;
        self.rectification.q * shift
    }

    pub fn valid_roi(&self, side: Side) -> Roi {
        self.rectification.valid_roi[side.index()]
    }

    /// Region of the rectified frame that is valid in both cameras.
    pub fn common_roi(&self) -> Result<Roi> {
        let roi = self.valid_roi(Side::Left).intersect(&self.valid_roi(Side::Right));
        if roi.is_empty() {
            return Err(Error::CalibrationError(
                "valid regions of the two rectified cameras do not overlap".to_string(),
            ));
        }
        Ok(roi)
    }

    pub fn rectify_maps(&self, side: Side) -> (&[f32], &[f32]) {
        let map = &self.maps[side.index()];
        (&map.map_x, &map.map_y)
    }

    /// Rectifies a frame pair with nearest-neighbor sampling.
    pub fn rectify<P>(
        &self,
        left: &ImageBuffer<P, Vec<u8>>,
        right: &ImageBuffer<P, Vec<u8>>,
    ) -> Result<RectifiedPair<P>>
    where
        P: Pixel<Subpixel = u8> + 'static,
    {
        self.rectify_with(left, right, Interpolation::Nearest)
    }

    pub fn rectify_with<P>(
        &self,
        left: &ImageBuffer<P, Vec<u8>>,
        right: &ImageBuffer<P, Vec<u8>>,
        interpolation: Interpolation,
    ) -> Result<RectifiedPair<P>>
    where
        P: Pixel<Subpixel = u8> + 'static,
    {
        for (name, img) in [("left", left), ("right", right)] {
            if img.dimensions() != self.image_size {
                return Err(Error::DimensionMismatch(format!(
                    "{name} image is {}x{}, calibration expects {}x{}",
                    img.width(),
                    img.height(),
                    self.image_size.0,
                    self.image_size.1
                )));
            }
        }
        let roi = self.common_roi()?;
        let (w, h) = self.image_size;

        let mut out = Vec::with_capacity(2);
        for (img, map) in [(left, &self.maps[0]), (right, &self.maps[1])] {
            let full = remap(
                img,
                &map.map_x,
                &map.map_y,
                w,
                h,
                interpolation,
                BorderMode::Constant(0),
            )?;
            out.push(imageops::crop_imm(&full, roi.x, roi.y, roi.width, roi.height).to_image());
        }
        debug!(?roi, "rectified image pair");

        let right = out.pop();
        let left = out.pop();
        match (left, right) {
            (Some(left), Some(right)) => Ok(RectifiedPair { left, right, roi }),
            _ => Err(Error::CalibrationError("rectification produced no output".to_string())),
        }
    }

    /// Mean pixel distance between undistorted corners and the epipolar
    /// lines induced by their partners in the other image.
    pub fn epipolar_error(&self, views: &[StereoView]) -> Result<f64> {
        let f = &self.fundamental;
        let mut total = 0.0;
        let mut count = 0usize;
        for view in views {
            let left = undistort_points(&view.left, &self.intrinsics[0], &self.distortion[0], None, None)?;
            let right = undistort_points(&view.right, &self.intrinsics[1], &self.distortion[1], None, None)?;
            for (l, r) in left.iter().zip(right.iter()) {
                let xl = Vector3::new(l.x, l.y, 1.0);
                let xr = Vector3::new(r.x, r.y, 1.0);
                total += line_distance(&(f * xl), &xr);
                total += line_distance(&(f.transpose() * xr), &xl);
                count += 2;
            }
        }
        if count == 0 {
            return Err(Error::InvalidInput(
                "epipolar check needs at least one corner".to_string(),
            ));
        }
        Ok(total / count as f64)
    }

    /// Writes every calibration field into `dir`, creating it if needed.
    pub fn save<Q: AsRef<Path>>(&self, dir: Q) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_array(
            dir,
            "image_size",
            1,
            2,
            &[self.image_size.0 as f64, self.image_size.1 as f64],
        )?;
        for side in [Side::Left, Side::Right] {
            let p = side.prefix();
            write_matrix(dir, &format!("{p}_intrinsics"), &self.intrinsics(side).matrix())?;
            let coeffs = self.distortion(side).coefficients();
            write_array(dir, &format!("{p}_distortion"), 1, coeffs.len(), coeffs)?;
            write_matrix(dir, &format!("{p}_rectification"), self.rectification_rotation(side))?;
            write_matrix(dir, &format!("{p}_projection"), self.projection(side))?;
            let roi = self.valid_roi(side);
            write_array(
                dir,
                &format!("{p}_valid_roi"),
                1,
                4,
                &[roi.x as f64, roi.y as f64, roi.width as f64, roi.height as f64],
            )?;
        }
        write_matrix(dir, "rotation", &self.rotation)?;
        write_matrix(dir, "translation", &self.translation)?;
        write_matrix(dir, "essential", &self.essential)?;
        write_matrix(dir, "fundamental", &self.fundamental)?;
        write_matrix(dir, "reprojection", &self.rectification.q)?;
        info!(path = %dir.display(), "saved stereo calibration");
        Ok(())
    }

    /// Reads a calibration folder written by [`StereoCalibration::save`].
    pub fn load<Q: AsRef<Path>>(dir: Q) -> Result<Self> {
        let dir = dir.as_ref();
        let size = read_array(dir, "image_size")?;
        let image_size = match (size.rows, size.cols, size.data.as_slice()) {
            (1, 2, &[w, h]) if is_dimension(w) && is_dimension(h) => (w as u32, h as u32),
            _ => {
                return Err(Error::MissingCalibrationData(
                    "image_size must be a 1x2 array of positive integers".to_string(),
                ))
            }
        };

        let mut intrinsics = [CameraIntrinsics::new_ideal(image_size.0, image_size.1); 2];
        let mut distortion = [Distortion::none(), Distortion::none()];
        let mut rect = [Matrix3::identity(); 2];
        let mut proj = [Matrix3x4::zeros(); 2];
        let mut roi = [Roi::default(); 2];
        for side in [Side::Left, Side::Right] {
            let (i, p) = (side.index(), side.prefix());
            let k: Matrix3<f64> = read_matrix(dir, &format!("{p}_intrinsics"))?;
            intrinsics[i] = CameraIntrinsics::from_matrix(&k, image_size.0, image_size.1);

            let d = read_array(dir, &format!("{p}_distortion"))?;
            if d.rows != 1 {
                return Err(Error::MissingCalibrationData(format!(
                    "{p}_distortion must be a single row, found {}x{}",
                    d.rows, d.cols
                )));
            }
            distortion[i] = Distortion::from_coefficients(&d.data).map_err(|e| {
                Error::MissingCalibrationData(format!("{p}_distortion: {e}"))
            })?;

            rect[i] = read_matrix(dir, &format!("{p}_rectification"))?;
            proj[i] = read_matrix(dir, &format!("{p}_projection"))?;

            let r = read_array(dir, &format!("{p}_valid_roi"))?;
            roi[i] = match (r.rows, r.cols, r.data.as_slice()) {
                (1, 4, &[x, y, w, h]) if [x, y, w, h].iter().all(|v| *v >= 0.0 && v.fract() == 0.0) => {
                    Roi::new(x as u32, y as u32, w as u32, h as u32)
                }
                _ => {
                    return Err(Error::MissingCalibrationData(format!(
                        "{p}_valid_roi must be a 1x4 array of non-negative integers"
                    )))
                }
            };
        }

        let rotation: Matrix3<f64> = read_matrix(dir, "rotation")?;
        let translation: Vector3<f64> = read_matrix(dir, "translation")?;
        let essential = read_matrix(dir, "essential")?;
        let fundamental = read_matrix(dir, "fundamental")?;
        let q = read_matrix(dir, "reprojection")?;

        let rectification = StereoRectification {
            r1: rect[0],
            r2: rect[1],
            p1: proj[0],
            p2: proj[1],
            q,
            valid_roi: roi,
        };
        let calibration = Self::from_parts(
            image_size,
            intrinsics,
            distortion,
            Pose::new(rotation, translation),
            essential,
            fundamental,
            rectification,
        )?;
        info!(path = %dir.display(), "loaded stereo calibration");
        Ok(calibration)
    }
}

fn is_dimension(v: f64) -> bool {
    v >= 1.0 && v.fract() == 0.0 && v <= u32::MAX as f64
}

/// Distance from `point` to the line `l`, normalized so that `a^2 + b^2 = 1`.
fn line_distance(line: &Vector3<f64>, point: &Vector3<f64>) -> f64 {
    let norm = (line.x * line.x + line.y * line.y).sqrt();
    if norm <= 1e-300 {
        return 0.0;
    }
    (line.dot(point) / norm).abs()
}
