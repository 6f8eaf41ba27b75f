//! Single-camera calibration from planar patterns.
//!
//! Provides the closed-form homography initialization used to seed the
//! joint stereo refinement, plus the RMS reprojection metric.

use crate::project::project_point;
use crate::Result;
use cv_core::{CameraIntrinsics, Distortion, Error, Pose};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3};
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CameraCalibrationResult {
    pub intrinsics: CameraIntrinsics,
    pub extrinsics: Vec<Pose>,
    pub distortion: Distortion,
    pub rms_reprojection_error: f64,
}

/// Generate 3D object points for a planar chessboard pattern
///
/// The object points are generated in the plane z=0, row by row with x
/// varying fastest: x ranges from 0 to (cols-1)*square_size and y from 0 to
/// (rows-1)*square_size.
pub fn generate_chessboard_object_points(
    pattern_size: (usize, usize),
    square_size: f64,
) -> Vec<Point3<f64>> {
    let (cols, rows) = pattern_size;
    let mut points = Vec::with_capacity(cols * rows);
    for y in 0..rows {
        for x in 0..cols {
            points.push(Point3::new(
                x as f64 * square_size,
                y as f64 * square_size,
                0.0,
            ));
        }
    }
    points
}

/// Closed-form calibration of one camera from planar views.
///
/// With three or more views the full pinhole matrix is recovered from the
/// homographies. With fewer views, or when that solution is not physical,
/// the principal point is pinned to the image center and only a shared focal
/// length is solved. Distortion is returned as zero.
pub fn calibrate_camera_planar(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
) -> Result<CameraCalibrationResult> {
    if object_points.len() != image_points.len() || object_points.is_empty() {
        return Err(Error::CalibrationError(
            "planar calibration needs at least one view with matching point sets".to_string(),
        ));
    }

    let mut homographies = Vec::with_capacity(object_points.len());
    for (obj, img) in object_points.iter().zip(image_points.iter()) {
        if obj.len() != img.len() || obj.len() < 4 {
            return Err(Error::CalibrationError(
                "each calibration view needs >=4 correspondences".to_string(),
            ));
        }
        if obj.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(Error::CalibrationError(
                "planar calibration expects planar object points (z=0)".to_string(),
            ));
        }
        let obj2d: Vec<Point2<f64>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
        homographies.push(estimate_homography_dlt(&obj2d, img)?);
    }

    let (width, height) = image_size;
    let closed_form = if homographies.len() >= 3 {
        intrinsics_from_planar_homographies(&homographies)
            .ok()
            .map(|k| CameraIntrinsics::from_matrix(&k, width, height))
            .filter(|k| is_plausible(k, image_size))
    } else {
        None
    };

    let intrinsics = match closed_form {
        Some(k) => k,
        None => {
            let cx = (width as f64 - 1.0) * 0.5;
            let cy = (height as f64 - 1.0) * 0.5;
            let f = focal_from_planar_homographies(&homographies, cx, cy)
                .unwrap_or_else(|| width.max(height) as f64);
            debug!(views = homographies.len(), focal = f, "using centered-principal-point initialization");
            CameraIntrinsics::new(f, f, cx, cy, width, height)
        }
    };

    let k_inv = intrinsics.inverse_matrix();
    let mut extrinsics = Vec::with_capacity(homographies.len());
    for h in &homographies {
        extrinsics.push(extrinsics_from_homography(&k_inv, h)?);
    }

    let distortion = Distortion::none();
    let rms = compute_rms_reprojection(
        &intrinsics,
        &distortion,
        &extrinsics,
        object_points,
        image_points,
    )?;

    let result = CameraCalibrationResult {
        intrinsics,
        extrinsics,
        distortion,
        rms_reprojection_error: rms,
    };
    if !is_valid_camera_calibration(&result) {
        return Err(Error::CalibrationError(
            "planar calibration produced non-finite or degenerate calibration".to_string(),
        ));
    }
    Ok(result)
}

fn is_plausible(k: &CameraIntrinsics, image_size: (u32, u32)) -> bool {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    k.fx.is_finite()
        && k.fy.is_finite()
        && k.fx > 0.0
        && k.fy > 0.0
        && (k.fx / k.fy - 1.0).abs() < 0.5
        && k.cx > 0.0
        && k.cx < w
        && k.cy > 0.0
        && k.cy < h
}

/// Right singular vector of the smallest singular value.
fn null_vector(m: DMatrix<f64>) -> Result<DVector<f64>> {
    let svd = m.svd(false, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::CalibrationError("SVD failed while solving for a null space".to_string()))?;
    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| Error::CalibrationError("empty system".to_string()))?;
    Ok(vt.row(idx).transpose())
}

/// Estimate homography using Direct Linear Transform (DLT)
pub fn estimate_homography_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>> {
    if src.len() != dst.len() || src.len() < 4 {
        return Err(Error::CalibrationError(
            "estimate_homography_dlt needs >=4 paired points".to_string(),
        ));
    }

    let (src_n, ts) = normalize_points_hartley(src)?;
    let (dst_n, td) = normalize_points_hartley(dst)?;
    let n = src.len();
    // Padded to at least 9 rows so the SVD exposes the full right basis.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for i in 0..n {
        let x = src_n[i].x;
        let y = src_n[i].y;
        let u = dst_n[i].x;
        let v = dst_n[i].y;
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = null_vector(a)?;
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let td_inv = td.try_inverse().ok_or_else(|| {
        Error::CalibrationError("degenerate point normalization".to_string())
    })?;
    let mut hdenorm = td_inv * hn * ts;
    if hdenorm[(2, 2)].abs() > 1e-12 {
        hdenorm /= hdenorm[(2, 2)];
    }
    Ok(hdenorm)
}

/// Compute intrinsic matrix from planar homographies (Zhang's closed form).
pub fn intrinsics_from_planar_homographies(homographies: &[Matrix3<f64>]) -> Result<Matrix3<f64>> {
    if homographies.len() < 3 {
        return Err(Error::CalibrationError(
            "need at least 3 homographies for planar calibration".to_string(),
        ));
    }

    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (i, h) in homographies.iter().enumerate() {
        let v12 = v_ij(h, 0, 1);
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        for j in 0..6 {
            v[(2 * i, j)] = v12[j];
            v[(2 * i + 1, j)] = v11[j] - v22[j];
        }
    }

    let mut b = null_vector(v)?;
    // Nullspace sign is arbitrary; B must be positive definite.
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() < 1e-18 || b11.abs() < 1e-18 {
        return Err(Error::CalibrationError(
            "degenerate calibration system".to_string(),
        ));
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 || denom <= 0.0 {
        return Err(Error::CalibrationError(
            "invalid lambda in planar calibration".to_string(),
        ));
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(Matrix3::new(alpha, gamma, u0, 0.0, beta, v0, 0.0, 0.0, 1.0))
}

/// Least-squares focal length with a known principal point and unit aspect.
///
/// Works from a single view; returns `None` when the views carry no
/// perspective information (e.g. a fronto-parallel board).
pub fn focal_from_planar_homographies(
    homographies: &[Matrix3<f64>],
    cx: f64,
    cy: f64,
) -> Option<f64> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let mut num = 0.0;
    let mut den = 0.0;
    for h in homographies {
        let h = shift * h;
        let h = h / h.norm();
        // h1' W h2 = 0 and h1' W h1 = h2' W h2 with W = diag(x, x, 1), x = 1/f^2
        let eqs = [
            (
                h[(0, 0)] * h[(0, 1)] + h[(1, 0)] * h[(1, 1)],
                h[(2, 0)] * h[(2, 1)],
            ),
            (
                h[(0, 0)].powi(2) + h[(1, 0)].powi(2) - h[(0, 1)].powi(2) - h[(1, 1)].powi(2),
                h[(2, 0)].powi(2) - h[(2, 1)].powi(2),
            ),
        ];
        for (a, b) in eqs {
            num += a * b;
            den += a * a;
        }
    }
    if den <= 1e-300 {
        return None;
    }
    let x = -num / den;
    (x.is_finite() && x > 0.0)
        .then(|| 1.0 / x.sqrt())
        .filter(|f| f.is_finite())
}

/// Compute camera extrinsics from homography
pub fn extrinsics_from_homography(k_inv: &Matrix3<f64>, h: &Matrix3<f64>) -> Result<Pose> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let r1_raw = k_inv * h1;
    let r2_raw = k_inv * h2;
    let t_raw = k_inv * h3;
    let mut scale = 1.0 / r1_raw.norm().max(1e-18);
    // The board must lie in front of the camera.
    if t_raw[2] * scale < 0.0 {
        scale = -scale;
    }

    let r1 = r1_raw * scale;
    let r2 = r2_raw * scale;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = r.svd(true, true);
    let u = svd.u.ok_or_else(|| {
        Error::CalibrationError("SVD U missing in extrinsics_from_homography".to_string())
    })?;
    let vt = svd.v_t.ok_or_else(|| {
        Error::CalibrationError("SVD V^T missing in extrinsics_from_homography".to_string())
    })?;
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        r = -r;
    }

    let t = t_raw * scale;
    Ok(Pose::new(r, t))
}

/// RMS distance in pixels between observed and reprojected corners.
pub fn compute_rms_reprojection(
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    extrinsics: &[Pose],
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
) -> Result<f64> {
    if extrinsics.len() != object_points.len() || object_points.len() != image_points.len() {
        return Err(Error::CalibrationError(
            "compute_rms_reprojection: mismatched batch sizes".to_string(),
        ));
    }

    let (sq_sum, count) = extrinsics
        .par_iter()
        .zip(object_points.par_iter())
        .zip(image_points.par_iter())
        .map(|((ext, obj), img)| {
            let mut local_sq_sum = 0.0f64;
            let mut local_count = 0usize;
            for (p3, p2) in obj.iter().zip(img.iter()) {
                if let Some(p) = project_point(p3, intrinsics, distortion, ext) {
                    local_sq_sum += (p.coords - p2.coords).norm_squared();
                    local_count += 1;
                }
            }
            (local_sq_sum, local_count)
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

    if count == 0 {
        return Err(Error::CalibrationError(
            "compute_rms_reprojection: no valid points".to_string(),
        ));
    }
    Ok((sq_sum / count as f64).sqrt())
}

fn is_valid_camera_calibration(result: &CameraCalibrationResult) -> bool {
    let k = &result.intrinsics;
    let intrinsics_valid = k.fx.is_finite()
        && k.fy.is_finite()
        && k.cx.is_finite()
        && k.cy.is_finite()
        && k.fx.abs() > 1e-12
        && k.fy.abs() > 1e-12;
    if !intrinsics_valid || !result.rms_reprojection_error.is_finite() {
        return false;
    }

    result.extrinsics.iter().all(|ext| {
        ext.rotation.iter().all(|v| v.is_finite()) && ext.translation.iter().all(|v| v.is_finite())
    })
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    [
        h[(0, i)] * h[(0, j)],
        h[(0, i)] * h[(1, j)] + h[(1, i)] * h[(0, j)],
        h[(1, i)] * h[(1, j)],
        h[(2, i)] * h[(0, j)] + h[(0, i)] * h[(2, j)],
        h[(2, i)] * h[(1, j)] + h[(1, i)] * h[(2, j)],
        h[(2, i)] * h[(2, j)],
    ]
}

/// Normalize points using Hartley normalization
fn normalize_points_hartley(points: &[Point2<f64>]) -> Result<(Vec<Point2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return Err(Error::CalibrationError(
            "normalize_points_hartley: empty points array".to_string(),
        ));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mean_x).powi(2) + (p.y - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let scale = if mean_dist.abs() > 1e-18 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let normalized = points
        .iter()
        .map(|p| Point2::new((p.x - mean_x) * scale, (p.y - mean_y) * scale))
        .collect();

    let t = Matrix3::new(
        scale,
        0.0,
        -mean_x * scale,
        0.0,
        scale,
        -mean_y * scale,
        0.0,
        0.0,
        1.0,
    );

    Ok((normalized, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::geometry::rotation_from_vector;
    use nalgebra::Vector3;

    fn synthetic_views(k: &CameraIntrinsics, rvecs: &[Vector3<f64>]) -> (Vec<Vec<Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
        let board = generate_chessboard_object_points((8, 6), 0.03);
        let mut obj = Vec::new();
        let mut img = Vec::new();
        for r in rvecs {
            let pose = Pose::new(rotation_from_vector(r), Vector3::new(-0.1, -0.07, 0.7));
            obj.push(board.clone());
            img.push(board.iter().map(|p| k.project(&pose.transform_point(p))).collect());
        }
        (obj, img)
    }

    #[test]
    fn object_points_are_row_major() {
        let pts = generate_chessboard_object_points((3, 2), 0.5);
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[1], Point3::new(0.5, 0.0, 0.0));
        assert_eq!(pts[3], Point3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn homography_maps_correspondences() {
        let src = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst: Vec<_> = src.iter().map(|p| Point2::new(2.0 * p.x + 3.0, p.y - 1.0)).collect();
        let h = estimate_homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let q = h * Vector3::new(s.x, s.y, 1.0);
            assert!((q.x / q.z - d.x).abs() < 1e-9);
            assert!((q.y / q.z - d.y).abs() < 1e-9);
        }
    }

    #[test]
    fn closed_form_recovers_intrinsics() {
        let k = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0, 640, 480);
        let rvecs = [
            Vector3::new(0.3, 0.0, 0.0),
            Vector3::new(0.0, 0.35, 0.05),
            Vector3::new(-0.25, -0.2, 0.0),
            Vector3::new(0.1, -0.3, -0.1),
        ];
        let (obj, img) = synthetic_views(&k, &rvecs);
        let calib = calibrate_camera_planar(&obj, &img, (640, 480)).unwrap();
        assert!((calib.intrinsics.fx - 600.0).abs() < 1e-3);
        assert!((calib.intrinsics.cy - 240.0).abs() < 1e-3);
        assert!(calib.rms_reprojection_error < 1e-4);
        assert!(calib.extrinsics.iter().all(|p| p.translation.z > 0.0));
    }

    #[test]
    fn single_view_uses_centered_focal_estimate() {
        let k = CameraIntrinsics::new(550.0, 550.0, 319.5, 239.5, 640, 480);
        let (obj, img) = synthetic_views(&k, &[Vector3::new(0.3, 0.25, 0.0)]);
        let calib = calibrate_camera_planar(&obj, &img, (640, 480)).unwrap();
        assert!((calib.intrinsics.fx - 550.0).abs() < 1e-3);
        assert_eq!(calib.intrinsics.cx, 319.5);
        assert!(calib.rms_reprojection_error < 1e-4);
    }
}
