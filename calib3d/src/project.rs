//! 3D-to-2D projection through a posed, distorted pinhole camera.

use crate::Result;
use cv_core::{CameraIntrinsics, Distortion, Pose};
use nalgebra::{Point2, Point3};
use rayon::prelude::*;

/// Projects a single object point. Returns `None` for points on or behind
/// the camera plane.
#[inline]
pub fn project_point(
    point: &Point3<f64>,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    pose: &Pose,
) -> Option<Point2<f64>> {
    let pc = pose.rotation * point.coords + pose.translation;
    if pc[2].is_nan() || pc[2] <= 1e-12 {
        return None;
    }
    let (xd, yd) = distortion.apply(pc[0] / pc[2], pc[1] / pc[2]);
    Some(Point2::new(
        intrinsics.fx * xd + intrinsics.cx,
        intrinsics.fy * yd + intrinsics.cy,
    ))
}

/// Project 3D points to 2D pixel coordinates including lens distortion.
///
/// # Errors
/// Returns error if any point is behind the camera (depth <= 0) or not finite.
pub fn project_points_with_distortion(
    object_points: &[Point3<f64>],
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    pose: &Pose,
) -> Result<Vec<Point2<f64>>> {
    object_points
        .par_iter()
        .map(|p| {
            project_point(p, intrinsics, distortion, pose)
                .filter(|q| q.x.is_finite() && q.y.is_finite())
                .ok_or_else(|| {
                    cv_core::Error::CalibrationError(
                        "project_points encountered non-finite or near-zero depth point"
                            .to_string(),
                    )
                })
        })
        .collect()
}
