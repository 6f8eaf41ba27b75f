//! Joint stereo calibration and Bouguet rectification.

use crate::calibration::{calibrate_camera_planar, compute_rms_reprojection, CameraCalibrationResult};
use crate::distortion::undistort_normalized;
use crate::project::project_point;
use crate::Result;
use cv_core::geometry::{rotation_from_vector, rotation_to_vector, skew_symmetric};
use cv_core::{CameraIntrinsics, Distortion, Error, Pose, Roi};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

/// Residual assigned to a coordinate whose point falls behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1.0e4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoCalibrationOptions {
    /// Both cameras share one focal length pair.
    pub same_focal_length: bool,
    /// `fx = fy` for every camera.
    pub fix_aspect_ratio: bool,
    /// Tangential coefficients `p1`, `p2` stay zero.
    pub zero_tangent_dist: bool,
    /// Number of radial coefficients refined (`k1`, `k2`, `k3`), at most 3.
    pub radial_terms: usize,
    /// Rectified principal points coincide horizontally, so infinity maps to zero disparity.
    pub zero_disparity: bool,
    pub max_iterations: usize,
    /// Relative parameter step below which refinement stops.
    pub epsilon: f64,
}

impl Default for StereoCalibrationOptions {
    fn default() -> Self {
        Self {
            same_focal_length: true,
            fix_aspect_ratio: true,
            zero_tangent_dist: true,
            radial_terms: 3,
            zero_disparity: false,
            max_iterations: 100,
            epsilon: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StereoCalibrationResult {
    pub left: CameraCalibrationResult,
    pub right: CameraCalibrationResult,
    /// Maps left-camera coordinates into right-camera coordinates.
    pub relative_extrinsics: Pose,
    pub essential_matrix: Matrix3<f64>,
    pub fundamental_matrix: Matrix3<f64>,
    /// RMS over every corner of both cameras, in pixels.
    pub rms_reprojection_error: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoRectification {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
    pub q: Matrix4<f64>,
    pub valid_roi: [Roi; 2],
}

pub fn essential_from_extrinsics(relative: &Pose) -> Matrix3<f64> {
    skew_symmetric(&relative.translation) * relative.rotation
}

pub fn fundamental_from_essential(
    essential: &Matrix3<f64>,
    left: &CameraIntrinsics,
    right: &CameraIntrinsics,
) -> Matrix3<f64> {
    let mut f = right.inverse_matrix().transpose() * essential * left.inverse_matrix();
    if f[(2, 2)].abs() > 1e-12 {
        f /= f[(2, 2)];
    }
    f
}

pub fn stereo_calibrate(
    object_points: &[Vec<Point3<f64>>],
    left_image_points: &[Vec<Point2<f64>>],
    right_image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
) -> Result<StereoCalibrationResult> {
    stereo_calibrate_with_options(
        object_points,
        left_image_points,
        right_image_points,
        image_size,
        StereoCalibrationOptions::default(),
    )
}

/// Calibrates both cameras and their relative pose in one Levenberg-Marquardt
/// refinement over every corner of every view.
pub fn stereo_calibrate_with_options(
    object_points: &[Vec<Point3<f64>>],
    left_image_points: &[Vec<Point2<f64>>],
    right_image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
    options: StereoCalibrationOptions,
) -> Result<StereoCalibrationResult> {
    if object_points.len() != left_image_points.len()
        || object_points.len() != right_image_points.len()
    {
        return Err(Error::InvalidInput(
            "stereo calibration expects matching batch sizes".to_string(),
        ));
    }
    if object_points.is_empty() {
        return Err(Error::InvalidInput(
            "stereo calibration needs at least one view".to_string(),
        ));
    }
    for ((obj, l), r) in object_points
        .iter()
        .zip(left_image_points)
        .zip(right_image_points)
    {
        if obj.len() != l.len() || obj.len() != r.len() || obj.len() < 4 {
            return Err(Error::InvalidInput(
                "each stereo view needs the same >=4 corners in both images".to_string(),
            ));
        }
    }
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(Error::InvalidInput(
            "stereo calibration requires non-zero image size".to_string(),
        ));
    }
    if options.radial_terms > 3 {
        return Err(Error::InvalidInput(format!(
            "at most 3 radial terms can be refined, got {}",
            options.radial_terms
        )));
    }

    let left = calibrate_camera_planar(object_points, left_image_points, image_size)?;
    let right = calibrate_camera_planar(object_points, right_image_points, image_size)?;
    let relative = average_relative_pose(&left.extrinsics, &right.extrinsics)?;
    info!(
        views = object_points.len(),
        left_rms = left.rms_reprojection_error,
        right_rms = right.rms_reprojection_error,
        "initialized stereo calibration"
    );

    let mut intrinsics = [left.intrinsics, right.intrinsics];
    if options.fix_aspect_ratio {
        for k in intrinsics.iter_mut() {
            let f = 0.5 * (k.fx + k.fy);
            k.fx = f;
            k.fy = f;
        }
    }
    if options.same_focal_length {
        let fx = 0.5 * (intrinsics[0].fx + intrinsics[1].fx);
        let fy = 0.5 * (intrinsics[0].fy + intrinsics[1].fy);
        for k in intrinsics.iter_mut() {
            k.fx = fx;
            k.fy = fy;
        }
    }

    let initial = RigState {
        intrinsics,
        distortion: [Distortion::none(), Distortion::none()],
        relative,
        boards: left.extrinsics.clone(),
    };
    let layout = ParameterLayout::new(&options, image_size, object_points.len());
    let observations = Observations::new(object_points, left_image_points, right_image_points);
    let (state, iterations, rms) = refine(&layout, &observations, initial, &options)?;

    let right_poses: Vec<Pose> = state
        .boards
        .iter()
        .map(|b| state.relative.compose(b))
        .collect();
    let left_rms = compute_rms_reprojection(
        &state.intrinsics[0],
        &state.distortion[0],
        &state.boards,
        object_points,
        left_image_points,
    )?;
    let right_rms = compute_rms_reprojection(
        &state.intrinsics[1],
        &state.distortion[1],
        &right_poses,
        object_points,
        right_image_points,
    )?;

    let essential_matrix = essential_from_extrinsics(&state.relative);
    let fundamental_matrix =
        fundamental_from_essential(&essential_matrix, &state.intrinsics[0], &state.intrinsics[1]);

    let [left_k, right_k] = state.intrinsics;
    let [left_d, right_d] = state.distortion;
    Ok(StereoCalibrationResult {
        left: CameraCalibrationResult {
            intrinsics: left_k,
            extrinsics: state.boards,
            distortion: left_d,
            rms_reprojection_error: left_rms,
        },
        right: CameraCalibrationResult {
            intrinsics: right_k,
            extrinsics: right_poses,
            distortion: right_d,
            rms_reprojection_error: right_rms,
        },
        relative_extrinsics: state.relative,
        essential_matrix,
        fundamental_matrix,
        rms_reprojection_error: rms,
        iterations,
    })
}

fn average_relative_pose(left: &[Pose], right: &[Pose]) -> Result<Pose> {
    let n = left.len().min(right.len());
    if n == 0 {
        return Err(Error::CalibrationError(
            "stereo calibration: no usable extrinsics".to_string(),
        ));
    }

    let mut t_sum = Vector3::zeros();
    let mut r_sum = Matrix3::<f64>::zeros();
    for (l, r) in left.iter().zip(right.iter()) {
        let r_rel = r.rotation * l.rotation.transpose();
        let t_rel = r.translation - r_rel * l.translation;
        r_sum += r_rel;
        t_sum += t_rel;
    }
    t_sum /= n as f64;

    let svd = r_sum.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::CalibrationError("SVD U missing in relative pose".to_string()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| Error::CalibrationError("SVD V^T missing in relative pose".to_string()))?;
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        r = -r;
    }
    Ok(Pose::new(r, t_sum))
}

#[derive(Debug, Clone)]
struct RigState {
    intrinsics: [CameraIntrinsics; 2],
    distortion: [Distortion; 2],
    relative: Pose,
    boards: Vec<Pose>,
}

/// Maps the free calibration unknowns to a flat parameter vector.
///
/// Layout: per camera `[fy | fx fy] cx cy` (the right focal block is absent
/// with a shared focal length), then per camera the refined distortion
/// slots, then the relative pose, then one pose per view. Poses are stored
/// as rotation vector followed by translation.
struct ParameterLayout {
    same_focal: bool,
    fix_aspect: bool,
    distortion_slots: Vec<usize>,
    image_size: (u32, u32),
    views: usize,
}

impl ParameterLayout {
    fn new(options: &StereoCalibrationOptions, image_size: (u32, u32), views: usize) -> Self {
        // Coefficient order is k1 k2 p1 p2 k3.
        let mut distortion_slots = Vec::new();
        if options.radial_terms >= 1 {
            distortion_slots.push(0);
        }
        if options.radial_terms >= 2 {
            distortion_slots.push(1);
        }
        if !options.zero_tangent_dist {
            distortion_slots.extend([2, 3]);
        }
        if options.radial_terms >= 3 {
            distortion_slots.push(4);
        }
        Self {
            same_focal: options.same_focal_length,
            fix_aspect: options.fix_aspect_ratio,
            distortion_slots,
            image_size,
            views,
        }
    }

    fn focal_len(&self, cam: usize) -> usize {
        if cam == 1 && self.same_focal {
            0
        } else if self.fix_aspect {
            1
        } else {
            2
        }
    }

    fn global_len(&self) -> usize {
        self.focal_len(0) + self.focal_len(1) + 4 + 2 * self.distortion_slots.len() + 6
    }

    fn len(&self) -> usize {
        self.global_len() + 6 * self.views
    }

    /// View whose pose owns parameter `index`, if any.
    fn view_of(&self, index: usize) -> Option<usize> {
        index.checked_sub(self.global_len()).map(|i| i / 6)
    }

    fn pack(&self, state: &RigState) -> DVector<f64> {
        let mut p = Vec::with_capacity(self.len());
        for (cam, k) in state.intrinsics.iter().enumerate() {
            match self.focal_len(cam) {
                1 => p.push(k.fy),
                2 => p.extend([k.fx, k.fy]),
                _ => {}
            }
            p.extend([k.cx, k.cy]);
        }
        for d in &state.distortion {
            let coeffs = padded(d);
            p.extend(self.distortion_slots.iter().map(|&s| coeffs[s]));
        }
        push_pose(&mut p, &state.relative);
        for b in &state.boards {
            push_pose(&mut p, b);
        }
        DVector::from_vec(p)
    }

    fn unpack(&self, params: &DVector<f64>) -> RigState {
        let (w, h) = self.image_size;
        let mut i = 0;
        let mut next = || {
            let v = params[i];
            i += 1;
            v
        };

        let mut intrinsics = [CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0, w, h); 2];
        for cam in 0..2 {
            let (fx, fy) = match self.focal_len(cam) {
                0 => (intrinsics[0].fx, intrinsics[0].fy),
                1 => {
                    let f = next();
                    (f, f)
                }
                _ => {
                    let fx = next();
                    (fx, next())
                }
            };
            let cx = next();
            let cy = next();
            intrinsics[cam] = CameraIntrinsics::new(fx, fy, cx, cy, w, h);
        }

        let mut distortion = [Distortion::none(), Distortion::none()];
        for d in distortion.iter_mut() {
            let mut coeffs = [0.0; 5];
            for &slot in &self.distortion_slots {
                coeffs[slot] = next();
            }
            *d = Distortion::new(coeffs[0], coeffs[1], coeffs[2], coeffs[3], coeffs[4]);
        }

        let mut read_pose = || {
            let r = Vector3::new(next(), next(), next());
            let t = Vector3::new(next(), next(), next());
            Pose::from_rotation_vector(&r, t)
        };
        let relative = read_pose();
        let boards = (0..self.views).map(|_| read_pose()).collect();

        RigState {
            intrinsics,
            distortion,
            relative,
            boards,
        }
    }
}

fn padded(d: &Distortion) -> [f64; 5] {
    [d.k1(), d.k2(), d.p1(), d.p2(), d.k3()]
}

fn push_pose(p: &mut Vec<f64>, pose: &Pose) {
    let r = pose.rotation_vector();
    p.extend([r.x, r.y, r.z]);
    p.extend(pose.translation.iter().copied());
}

struct Observations<'a> {
    object: &'a [Vec<Point3<f64>>],
    left: &'a [Vec<Point2<f64>>],
    right: &'a [Vec<Point2<f64>>],
    offsets: Vec<usize>,
    rows: usize,
}

impl<'a> Observations<'a> {
    fn new(
        object: &'a [Vec<Point3<f64>>],
        left: &'a [Vec<Point2<f64>>],
        right: &'a [Vec<Point2<f64>>],
    ) -> Self {
        let mut offsets = Vec::with_capacity(object.len());
        let mut rows = 0;
        for obj in object {
            offsets.push(rows);
            rows += 4 * obj.len();
        }
        Self {
            object,
            left,
            right,
            offsets,
            rows,
        }
    }

    fn view_rows(&self, view: usize) -> (usize, usize) {
        (self.offsets[view], 4 * self.object[view].len())
    }

    fn view_residuals(&self, state: &RigState, view: usize, out: &mut [f64]) {
        let left_pose = state.boards[view];
        let right_pose = state.relative.compose(&left_pose);
        let cams = [
            (&state.intrinsics[0], &state.distortion[0], &left_pose, &self.left[view]),
            (&state.intrinsics[1], &state.distortion[1], &right_pose, &self.right[view]),
        ];
        for (j, p) in self.object[view].iter().enumerate() {
            for (c, (k, d, pose, observed)) in cams.iter().enumerate() {
                let r = &mut out[4 * j + 2 * c..4 * j + 2 * c + 2];
                match project_point(p, k, d, pose) {
                    Some(q) => {
                        r[0] = q.x - observed[j].x;
                        r[1] = q.y - observed[j].y;
                    }
                    None => r.fill(BEHIND_CAMERA_PENALTY),
                }
            }
        }
    }

    fn residuals(&self, state: &RigState) -> DVector<f64> {
        let mut out = DVector::zeros(self.rows);
        for view in 0..self.object.len() {
            let (start, len) = self.view_rows(view);
            self.view_residuals(state, view, &mut out.as_mut_slice()[start..start + len]);
        }
        out
    }
}

/// Central-difference Jacobian. Pose columns only touch the rows of their view.
fn jacobian(layout: &ParameterLayout, obs: &Observations<'_>, params: &DVector<f64>) -> DMatrix<f64> {
    let rows = obs.rows;
    let columns: Vec<DVector<f64>> = (0..params.len())
        .into_par_iter()
        .map(|k| {
            let h = 1e-6 * params[k].abs().max(1.0);
            let mut plus = params.clone();
            plus[k] += h;
            let mut minus = params.clone();
            minus[k] -= h;
            let (sp, sm) = (layout.unpack(&plus), layout.unpack(&minus));

            let mut col = DVector::zeros(rows);
            match layout.view_of(k) {
                Some(view) => {
                    let (start, len) = obs.view_rows(view);
                    let mut rp = vec![0.0; len];
                    let mut rm = vec![0.0; len];
                    obs.view_residuals(&sp, view, &mut rp);
                    obs.view_residuals(&sm, view, &mut rm);
                    for i in 0..len {
                        col[start + i] = (rp[i] - rm[i]) / (2.0 * h);
                    }
                }
                None => {
                    col = (obs.residuals(&sp) - obs.residuals(&sm)) / (2.0 * h);
                }
            }
            col
        })
        .collect();
    DMatrix::from_columns(&columns)
}

fn refine(
    layout: &ParameterLayout,
    obs: &Observations<'_>,
    initial: RigState,
    options: &StereoCalibrationOptions,
) -> Result<(RigState, usize, f64)> {
    let observations = (obs.rows / 2) as f64;
    let mut params = layout.pack(&initial);
    let mut residual = obs.residuals(&initial);
    let mut cost = residual.norm_squared();
    if !cost.is_finite() {
        return Err(Error::CalibrationError(
            "initial stereo estimate produced non-finite residuals".to_string(),
        ));
    }

    let mut lambda = 1e-3;
    let mut iterations = 0;
    for iteration in 0..options.max_iterations {
        iterations = iteration + 1;
        let j = jacobian(layout, obs, &params);
        let jtj = j.tr_mul(&j);
        let gradient = j.tr_mul(&residual);

        let mut accepted = None;
        while lambda < 1e12 {
            let mut a = jtj.clone();
            for i in 0..a.nrows() {
                a[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
            }
            if let Some(delta) = a.lu().solve(&(-&gradient)) {
                let candidate = &params + &delta;
                let candidate_residual = obs.residuals(&layout.unpack(&candidate));
                let candidate_cost = candidate_residual.norm_squared();
                if candidate_cost.is_finite() && candidate_cost < cost {
                    accepted = Some((delta.norm(), candidate, candidate_residual, candidate_cost));
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((step, candidate, candidate_residual, candidate_cost)) = accepted else {
            break;
        };
        let relative_step = step / (params.norm() + options.epsilon);
        let relative_gain = (cost - candidate_cost) / cost.max(f64::MIN_POSITIVE);
        params = candidate;
        residual = candidate_residual;
        cost = candidate_cost;
        lambda = (lambda * 0.1).max(1e-12);
        debug!(
            iteration,
            rms = (cost / observations).sqrt(),
            lambda,
            "stereo refinement step"
        );
        if relative_step <= options.epsilon || relative_gain <= 1e-12 {
            break;
        }
    }

    let rms = (cost / observations).sqrt();
    Ok((layout.unpack(&params), iterations, rms))
}

/// Bouguet rectification: splits the relative rotation between the two
/// cameras and aligns the baseline with the image rows.
pub fn stereo_rectify(
    left_intrinsics: &CameraIntrinsics,
    left_distortion: &Distortion,
    right_intrinsics: &CameraIntrinsics,
    right_distortion: &Distortion,
    image_size: (u32, u32),
    relative: &Pose,
    zero_disparity: bool,
) -> Result<StereoRectification> {
    let t_raw = relative.translation;
    if t_raw.norm() <= 1e-12 {
        return Err(Error::CalibrationError(
            "stereo rectification requires a non-zero baseline".to_string(),
        ));
    }

    let om = rotation_to_vector(&relative.rotation) * -0.5;
    let r_r = rotation_from_vector(&om);
    let t = r_r * t_raw;
    if t.x.abs() <= t.y.abs() {
        return Err(Error::CalibrationError(
            "vertical stereo rigs are not supported".to_string(),
        ));
    }

    let c = t.x;
    let uu = Vector3::new(if c > 0.0 { 1.0 } else { -1.0 }, 0.0, 0.0);
    let mut ww = t.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / t.norm()).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = rotation_from_vector(&ww);
    let r1 = w_r * r_r.transpose();
    let r2 = w_r * r_r;
    let t_new = r2 * t_raw;

    let fc = left_intrinsics.fy.min(right_intrinsics.fy);
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let cameras = [
        (left_intrinsics, left_distortion, &r1),
        (right_intrinsics, right_distortion, &r2),
    ];
    let mut cc = [Point2::origin(); 2];
    for (k, (intr, dist, rot)) in cameras.iter().enumerate() {
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(w - 1.0, 0.0),
            Point2::new(0.0, h - 1.0),
            Point2::new(w - 1.0, h - 1.0),
        ];
        let mut mean = Vector3::zeros();
        for corner in &corners {
            let n = undistort_normalized(corner, intr, dist);
            let ray = *rot * Vector3::new(n.x, n.y, 1.0);
            mean += Vector3::new(ray.x / ray.z, ray.y / ray.z, 0.0);
        }
        mean /= corners.len() as f64;
        cc[k] = Point2::new((w - 1.0) * 0.5 - mean.x * fc, (h - 1.0) * 0.5 - mean.y * fc);
    }
    if zero_disparity {
        let avg = Point2::from((cc[0].coords + cc[1].coords) * 0.5);
        cc = [avg, avg];
    } else {
        let cy = 0.5 * (cc[0].y + cc[1].y);
        cc[0].y = cy;
        cc[1].y = cy;
    }

    let (cx1, cx2, cy) = (cc[0].x, cc[1].x, cc[0].y);
    let p1 = Matrix3x4::new(
        fc, 0.0, cx1, 0.0, //
        0.0, fc, cy, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    );
    let p2 = Matrix3x4::new(
        fc, 0.0, cx2, t_new.x * fc, //
        0.0, fc, cy, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    );

    let tx = t_new.x;
    let mut q = Matrix4::<f64>::zeros();
    q[(0, 0)] = 1.0;
    q[(0, 3)] = -cx1;
    q[(1, 1)] = 1.0;
    q[(1, 3)] = -cy;
    q[(2, 3)] = fc;
    q[(3, 2)] = -1.0 / tx;
    q[(3, 3)] = (cx1 - cx2) / tx;

    let valid_roi = [
        valid_region(left_intrinsics, left_distortion, &r1, &p1, image_size),
        valid_region(right_intrinsics, right_distortion, &r2, &p2, image_size),
    ];
    debug!(?valid_roi, focal = fc, baseline = tx, "computed rectification");

    Ok(StereoRectification {
        r1,
        r2,
        p1,
        p2,
        q,
        valid_roi,
    })
}

/// Largest axis-aligned rectangle of the rectified image that only contains
/// pixels mapped from inside the source image.
fn valid_region(
    intrinsics: &CameraIntrinsics,
    distortion: &Distortion,
    rotation: &Matrix3<f64>,
    projection: &Matrix3x4<f64>,
    image_size: (u32, u32),
) -> Roi {
    const GRID: usize = 9;
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let (mut x0, mut x1) = (f64::NEG_INFINITY, f64::INFINITY);
    let (mut y0, mut y1) = (f64::NEG_INFINITY, f64::INFINITY);

    for j in 0..GRID {
        for i in 0..GRID {
            if i != 0 && i != GRID - 1 && j != 0 && j != GRID - 1 {
                continue;
            }
            let src = Point2::new(
                i as f64 * (w - 1.0) / (GRID - 1) as f64,
                j as f64 * (h - 1.0) / (GRID - 1) as f64,
            );
            let n = undistort_normalized(&src, intrinsics, distortion);
            let ray = rotation * Vector3::new(n.x, n.y, 1.0);
            if ray.z <= 1e-12 {
                continue;
            }
            let u = projection[(0, 0)] * ray.x / ray.z + projection[(0, 2)];
            let v = projection[(1, 1)] * ray.y / ray.z + projection[(1, 2)];
            if i == 0 {
                x0 = x0.max(u);
            }
            if i == GRID - 1 {
                x1 = x1.min(u);
            }
            if j == 0 {
                y0 = y0.max(v);
            }
            if j == GRID - 1 {
                y1 = y1.min(v);
            }
        }
    }

    let left = x0.ceil().max(0.0);
    let top = y0.ceil().max(0.0);
    let right = x1.floor().min(w - 1.0);
    let bottom = y1.floor().min(h - 1.0);
    if !(right >= left && bottom >= top) {
        return Roi::new(0, 0, 0, 0);
    }
    Roi::new(
        left as u32,
        top as u32,
        (right - left) as u32 + 1,
        (bottom - top) as u32 + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectify_parallel_rig_keeps_geometry() {
        let k = CameraIntrinsics::new(500.0, 500.0, 319.5, 239.5, 640, 480);
        let relative = Pose::new(Matrix3::identity(), Vector3::new(-0.1, 0.0, 0.0));
        let rect = stereo_rectify(&k, &Distortion::none(), &k, &Distortion::none(), (640, 480), &relative, false).unwrap();

        assert!((rect.r1 - Matrix3::identity()).norm() < 1e-12);
        assert!((rect.r2 - Matrix3::identity()).norm() < 1e-12);
        assert!((rect.p1[(0, 2)] - 319.5).abs() < 1e-9);
        assert!((rect.p2[(0, 3)] + 50.0).abs() < 1e-9);
        assert!((rect.q[(2, 3)] - 500.0).abs() < 1e-9);
        assert!((rect.q[(3, 2)] - 10.0).abs() < 1e-9);
        assert_eq!(rect.valid_roi[0], Roi::new(0, 0, 640, 480));

        // Z = f * B / d
        let disparity = 25.0;
        let v = rect.q * nalgebra::Vector4::new(100.0, 200.0, disparity, 1.0);
        assert!((v.z / v.w - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_vertical_rig() {
        let k = CameraIntrinsics::new_ideal(64, 48);
        let relative = Pose::new(Matrix3::identity(), Vector3::new(0.0, 0.1, 0.0));
        assert!(stereo_rectify(&k, &Distortion::none(), &k, &Distortion::none(), (64, 48), &relative, false).is_err());
    }

    #[test]
    fn essential_satisfies_epipolar_constraint() {
        let relative = Pose::from_rotation_vector(&Vector3::new(0.01, -0.02, 0.0), Vector3::new(-0.12, 0.003, 0.001));
        let e = essential_from_extrinsics(&relative);
        let p = Point3::new(0.3, -0.2, 2.0);
        let x1 = p.coords / p.z;
        let q = relative.transform_point(&p);
        let x2 = q.coords / q.z;
        assert!((x2.transpose() * e * x1)[(0, 0)].abs() < 1e-12);
    }

    #[test]
    fn layout_round_trips_state() {
        let options = StereoCalibrationOptions {
            same_focal_length: false,
            fix_aspect_ratio: false,
            zero_tangent_dist: false,
            ..Default::default()
        };
        let layout = ParameterLayout::new(&options, (640, 480), 2);
        let state = RigState {
            intrinsics: [
                CameraIntrinsics::new(500.0, 505.0, 320.0, 240.0, 640, 480),
                CameraIntrinsics::new(510.0, 498.0, 318.0, 242.0, 640, 480),
            ],
            distortion: [
                Distortion::new(-0.1, 0.01, 0.001, 0.002, 0.003),
                Distortion::new(-0.2, 0.02, 0.0, -0.001, 0.0),
            ],
            relative: Pose::from_rotation_vector(&Vector3::new(0.0, 0.01, 0.0), Vector3::new(-0.1, 0.0, 0.0)),
            boards: vec![Pose::default(), Pose::from_rotation_vector(&Vector3::new(0.2, 0.0, 0.1), Vector3::new(0.0, 0.0, 1.0))],
        };
        let params = layout.pack(&state);
        assert_eq!(params.len(), layout.len());
        let back = layout.unpack(&params);
        assert_eq!(back.intrinsics, state.intrinsics);
        assert_eq!(back.distortion, state.distortion);
        assert_eq!(layout.view_of(layout.global_len() + 7), Some(1));
        assert_eq!(layout.view_of(0), None);
    }
}
