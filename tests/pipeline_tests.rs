use cv_stereovision::calib3d::{project_points_with_distortion, StereoCalibrator};
use cv_stereovision::core::{CameraIntrinsics, Distortion, Pose};
use cv_stereovision::io::read_ply_file;
use cv_stereovision::stereo::{BlockMatcher, DepthFilter, MatcherKind};
use cv_stereovision::{CalibratedPair, PipelineOptions};
use image::{Rgb, RgbImage};
use nalgebra::{Rotation3, Vector3};
use std::fs;
use tempfile::tempdir;

const SIZE: (u32, u32) = (320, 240);
const PLANE_DEPTH: f64 = 1.0;
const CELL: f64 = 0.006;

fn texture(x: i64, y: i64) -> u8 {
    let mut h = (x as u32).wrapping_mul(374_761_393) ^ (y as u32).wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as u8
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(350.0, 350.0, 160.0, 120.0, SIZE.0, SIZE.1)
}

fn relative() -> Pose {
    Pose::new(
        Rotation3::from_euler_angles(0.004, -0.008, 0.002).into_inner(),
        Vector3::new(-0.12, 0.0005, 0.0),
    )
}

fn calibrate() -> (cv_stereovision::calib3d::StereoCalibration, f64) {
    let k = intrinsics();
    let none = Distortion::none();
    let angles = [
        (0.30, -0.10, 0.02),
        (-0.25, 0.20, -0.05),
        (0.10, 0.35, -0.02),
        (-0.15, -0.30, 0.04),
        (0.20, 0.25, 0.00),
        (-0.30, 0.05, 0.03),
    ];
    let mut calibrator = StereoCalibrator::new(6, 9, 0.03, SIZE).unwrap();
    for (i, &(r, p, y)) in angles.iter().enumerate() {
        let board = Pose::new(
            Rotation3::from_euler_angles(r, p, y).into_inner(),
            Vector3::new(-0.14, -0.10, 1.0 + 0.1 * i as f64),
        );
        let object = calibrator.object_points().to_vec();
        let left = project_points_with_distortion(&object, &k, &none, &board).unwrap();
        let right =
            project_points_with_distortion(&object, &k, &none, &relative().compose(&board))
                .unwrap();
        calibrator.add_corners(left, right).unwrap();
    }
    let (calibration, report) = calibrator.calibrate().unwrap();
    (calibration, report.rms_reprojection_error)
}

/// Textured plane `z = PLANE_DEPTH` in the left camera frame, seen by a
/// camera whose pose maps left-frame points into its own frame.
fn render_plane(view: &Pose) -> RgbImage {
    let k_inv = intrinsics().inverse_matrix();
    let rt = view.rotation.transpose();
    let offset = rt * view.translation;
    RgbImage::from_fn(SIZE.0, SIZE.1, |u, v| {
        let ray = rt * (k_inv * Vector3::new(u as f64, v as f64, 1.0));
        let s = (PLANE_DEPTH + offset.z) / ray.z;
        let p = ray * s - offset;
        let g = texture((p.x / CELL).floor() as i64, (p.y / CELL).floor() as i64);
        Rgb([g, g, g])
    })
}

fn matcher() -> BlockMatcher {
    let mut matcher = BlockMatcher::basic();
    matcher.set_parameter("search_range", 64).unwrap();
    matcher.set_parameter("window_size", 11).unwrap();
    matcher
}

#[test]
fn test_plane_reconstruction_end_to_end() {
    let (calibration, rms) = calibrate();
    assert!(rms < 1e-3, "rms {}", rms);

    let left = render_plane(&Pose::default());
    let right = render_plane(&relative());

    let options = PipelineOptions {
        filter: DepthFilter::new(5.0),
        ..PipelineOptions::default()
    };
    let pair = CalibratedPair::new(calibration.clone(), matcher()).with_options(options);

    let rectified = pair.rectify(&left, &right).unwrap();
    assert_eq!(rectified.left.dimensions(), rectified.right.dimensions());
    assert_eq!(
        rectified.left.dimensions(),
        (rectified.roi.width, rectified.roi.height)
    );

    let dir = tempdir().unwrap();
    let ply = dir.path().join("plane.ply");
    let cloud = pair.process(&left, &right, &ply).unwrap();
    assert!(cloud.len() > 5000, "only {} points", cloud.len());
    assert!(cloud.points().iter().all(|p| p.z < 5.0));

    let mut depths: Vec<f32> = cloud.points().iter().map(|p| p.z).collect();
    depths.sort_by(|a, b| a.total_cmp(b));
    let median = depths[depths.len() / 2] as f64;
    assert!((median - PLANE_DEPTH).abs() < 0.05, "median depth {}", median);

    let text = fs::read_to_string(&ply).unwrap();
    assert!(text.contains(&format!("element vertex {}\n", cloud.len())));
    assert_eq!(text.lines().count(), 10 + cloud.len());
    let read_back = read_ply_file(&ply).unwrap();
    assert_eq!(read_back.len(), cloud.len());
    assert_eq!(read_back.colors(), cloud.colors());

    // Persisted calibration and settings reproduce the same cloud.
    let calib_dir = dir.path().join("calibration");
    calibration.save(&calib_dir).unwrap();
    let settings = dir.path().join("bm.txt");
    matcher().save_settings(&settings).unwrap();

    let reloaded = CalibratedPair::load(&calib_dir, MatcherKind::Basic, Some(&settings))
        .unwrap()
        .with_options(options);
    assert_eq!(reloaded.block_matcher, pair.block_matcher);
    assert_eq!(reloaded.point_cloud(&left, &right).unwrap(), cloud);
}

#[test]
fn test_rectify_is_idempotent() {
    let (calibration, _) = calibrate();
    let pair = CalibratedPair::new(calibration, matcher());
    let left = render_plane(&Pose::default());
    let right = render_plane(&relative());

    let a = pair.rectify(&left, &right).unwrap();
    let b = pair.rectify(&left, &right).unwrap();
    assert_eq!(a.left, b.left);
    assert_eq!(a.right, b.right);
    assert_eq!(a.roi, b.roi);
}

#[test]
fn test_wrong_image_size_is_rejected() {
    let (calibration, _) = calibrate();
    let pair = CalibratedPair::new(calibration, matcher());
    let small = RgbImage::new(100, 100);
    assert!(matches!(
        pair.point_cloud(&small, &small),
        Err(cv_stereovision::Error::DimensionMismatch(_))
    ));
}

#[test]
fn test_load_without_settings_uses_defaults() {
    let dir = tempdir().unwrap();
    let (calibration, _) = calibrate();
    calibration.save(dir.path()).unwrap();

    let pair = CalibratedPair::load(dir.path(), MatcherKind::SemiGlobal, None::<&str>).unwrap();
    assert_eq!(pair.block_matcher, BlockMatcher::semi_global());
    assert_eq!(pair.options, PipelineOptions::default());
}
