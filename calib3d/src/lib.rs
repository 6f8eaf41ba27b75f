//! Stereo rig calibration and rectification.
//!
//! Chessboard corners from both cameras go in; a [`StereoCalibration`] holding
//! intrinsics, distortion, the rig pose, the rectification transforms and the
//! precomputed pixel maps comes out. Calibrations round-trip through a folder
//! of JSON array files.

pub use cv_core::{Error, Result};

pub mod calibration;
pub use calibration::{
    calibrate_camera_planar, compute_rms_reprojection, estimate_homography_dlt,
    generate_chessboard_object_points, CameraCalibrationResult,
};

pub mod calibrator;
pub use calibrator::StereoCalibrator;

pub mod distortion;
pub use distortion::{init_undistort_rectify_map, undistort_points};

pub mod project;
pub use project::{project_point, project_points_with_distortion};

pub mod rig;
pub use rig::{CalibrationReport, RectifiedPair, Side, StereoCalibration, StereoView};

pub mod stereo;
pub use stereo::{
    essential_from_extrinsics, fundamental_from_essential, stereo_calibrate,
    stereo_calibrate_with_options, stereo_rectify, StereoCalibrationOptions,
    StereoCalibrationResult, StereoRectification,
};

pub mod storage;
