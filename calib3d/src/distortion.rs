//! Lens distortion correction for points and rectification maps.

use crate::Result;
use cv_core::{CameraIntrinsics, Distortion, Error};
use nalgebra::{Matrix3, Matrix3x4, Point2, Vector3};
use rayon::prelude::*;

/// Undistort pixel coordinates into normalized camera coordinates.
pub fn undistort_normalized(
    point: &Point2<f64>,
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
) -> Point2<f64> {
    let xd = (point.x - intrinsics.cx) / intrinsics.fx;
    let yd = (point.y - intrinsics.cy) / intrinsics.fy;
    let (xu, yu) = distortion.remove(xd, yd);
    Point2::new(xu, yu)
}

/// Undistort a set of 2D pixel coordinates, optionally rotating them by
/// `rectification` and re-projecting them with `projection`.
///
/// Without a projection the undistorted points keep the camera's own
/// intrinsics.
pub fn undistort_points(
    distorted_points: &[Point2<f64>],
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    rectification: Option<&Matrix3<f64>>,
    projection: Option<&Matrix3x4<f64>>,
) -> Result<Vec<Point2<f64>>> {
    if intrinsics.fx.abs() <= 1e-12 || intrinsics.fy.abs() <= 1e-12 {
        return Err(Error::InvalidInput(
            "undistort_points requires non-zero focal lengths".to_string(),
        ));
    }

    let r = rectification.copied().unwrap_or_else(Matrix3::identity);
    let k = projection
        .map(|p| p.fixed_view::<3, 3>(0, 0).into_owned())
        .unwrap_or_else(|| intrinsics.matrix());

    let mut out = Vec::with_capacity(distorted_points.len());
    for p in distorted_points {
        let n = undistort_normalized(p, intrinsics, distortion);
        let ray = r * Vector3::new(n.x, n.y, 1.0);
        let pix = k * (ray / ray.z);
        out.push(Point2::new(pix.x, pix.y));
    }
    Ok(out)
}

/// Create remap matrices for undistortion with rectification.
///
/// Entry `y * width + x` holds the source pixel that lands on `(x, y)` in
/// the rectified image. Pixels with no source get `-1`, which the remapper
/// treats as outside the image.
pub fn init_undistort_rectify_map(
    image_size: (u32, u32),
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    rectification: &Matrix3<f64>,
    new_intrinsics: &CameraIntrinsics,
) -> Result<(Vec<f32>, Vec<f32>)> {
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(Error::InvalidInput(
            "init_undistort_rectify_map requires non-zero image size".to_string(),
        ));
    }
    let (width, height) = image_size;
    let len = width as usize * height as usize;
    let mut map_x = vec![-1.0f32; len];
    let mut map_y = vec![-1.0f32; len];

    let k_new_inv = new_intrinsics.inverse_matrix();
    let r_inv = rectification.transpose();

    map_x
        .par_chunks_mut(width as usize)
        .zip(map_y.par_chunks_mut(width as usize))
        .enumerate()
        .for_each(|(y, (row_x, row_y))| {
            for x in 0..width as usize {
                let dst = Vector3::new(x as f64, y as f64, 1.0);
                let original_norm = r_inv * (k_new_inv * dst);

                if original_norm[2].abs() <= 1e-12 {
                    continue;
                }
                let xn = original_norm[0] / original_norm[2];
                let yn = original_norm[1] / original_norm[2];
                let (xd, yd) = distortion.apply(xn, yn);

                row_x[x] = (intrinsics.fx * xd + intrinsics.cx) as f32;
                row_y[x] = (intrinsics.fy * yd + intrinsics.cy) as f32;
            }
        });

    Ok((map_x, map_y))
}
