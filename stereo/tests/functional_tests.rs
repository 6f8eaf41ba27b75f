use cv_stereo::*;
use image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::Matrix4;
use std::fs;
use tempfile::tempdir;

fn texture(x: u32, y: u32) -> u8 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as u8
}

/// Left pixel `x` appears at `x - shift` in the right view.
fn shifted_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
    let left = GrayImage::from_fn(width, height, |x, y| Luma([texture(x, y)]));
    let right = GrayImage::from_fn(width, height, |x, y| Luma([texture(x + shift, y)]));
    (left, right)
}

#[test]
fn test_basic_matcher_recovers_shift() {
    let (left, right) = shifted_pair(80, 48, 7);
    let mut matcher = BlockMatcher::basic();
    matcher.set_parameter("search_range", 16).unwrap();
    matcher.set_parameter("window_size", 9).unwrap();

    let disparity = matcher.compute(&left, &right).unwrap();
    assert_eq!(disparity.dimensions(), (80, 48));

    let mut close = 0;
    let mut checked = 0;
    for y in 10..38 {
        for x in 30..70 {
            checked += 1;
            if let Some(d) = disparity.disparity(x, y) {
                if (d - 7.0).abs() < 1.0 {
                    close += 1;
                }
            }
        }
    }
    assert!(close * 10 >= checked * 9, "{} of {} near 7", close, checked);
}

#[test]
fn test_basic_matcher_sobel_prefilter() {
    let (left, right) = shifted_pair(64, 40, 4);
    let mut matcher = BlockMatcher::basic();
    matcher.set_parameter("pre_filter_type", 1).unwrap();
    matcher.set_parameter("search_range", 16).unwrap();
    matcher.set_parameter("window_size", 11).unwrap();

    let disparity = matcher.compute(&left, &right).unwrap();
    let d = disparity.disparity(40, 20).unwrap();
    assert!((d - 4.0).abs() < 1.0, "disparity {}", d);
}

#[test]
fn test_semi_global_matcher_recovers_shift() {
    let (left, right) = shifted_pair(64, 40, 5);
    let mut matcher = BlockMatcher::semi_global();
    matcher.set_parameter("min_disparity", 0).unwrap();
    matcher.set_parameter("num_disparities", 16).unwrap();
    matcher.set_parameter("block_size", 5).unwrap();
    matcher.set_parameter("p1", 200).unwrap();
    matcher.set_parameter("p2", 800).unwrap();

    let disparity = matcher.compute(&left, &right).unwrap();
    assert_eq!(disparity.min_disparity, 0);
    assert_eq!(disparity.num_disparities, 16);

    for (x, y) in [(32, 20), (40, 10), (50, 30)] {
        let d = disparity.disparity(x, y).unwrap();
        assert!((d - 5.0).abs() < 1.0, "disparity {} at ({}, {})", d, x, y);
    }
}

#[test]
fn test_semi_global_full_dp_is_deterministic() {
    let (left, right) = shifted_pair(48, 32, 3);
    let matcher = SemiGlobalMatcher::new()
        .with_disparity_range(0, 16)
        .with_block_size(3)
        .with_full_dp(true);

    let a = matcher.compute(&left, &right).unwrap();
    let b = matcher.compute(&left, &right).unwrap();
    assert_eq!(a, b);
    assert!(a.valid_count() > 0);
}

#[test]
fn test_mismatched_pair_is_rejected() {
    let left = GrayImage::new(32, 32);
    let right = GrayImage::new(32, 31);
    for matcher in [BlockMatcher::basic(), BlockMatcher::semi_global()] {
        assert!(matches!(
            matcher.compute(&left, &right),
            Err(Error::DimensionMismatch(_))
        ));
    }
}

#[test]
fn test_color_pair_matches_luma_pair() {
    let (left, right) = shifted_pair(64, 40, 6);
    let to_rgb = |g: &GrayImage| {
        RgbImage::from_fn(g.width(), g.height(), |x, y| {
            let v = g.get_pixel(x, y)[0];
            Rgb([v, v, v])
        })
    };
    let mut matcher = BlockMatcher::basic();
    matcher.set_parameter("search_range", 16).unwrap();
    matcher.set_parameter("window_size", 9).unwrap();

    let gray = matcher.compute(&left, &right).unwrap();
    let color = matcher
        .compute_color(&to_rgb(&left), &to_rgb(&right))
        .unwrap();
    assert_eq!(gray, color);
}

#[test]
fn test_clamped_values_are_observable() {
    let mut matcher = BlockMatcher::semi_global();

    let below = matcher.set_parameter("num_disparities", 3).unwrap();
    assert_eq!(below.requested, 3);
    assert_eq!(below.applied, 16);
    assert_eq!(matcher.parameter("num_disparities").unwrap(), 16);

    let above = matcher.set_parameter("uniqueness_ratio", 250).unwrap();
    assert_eq!(above.applied, 100);
    assert_eq!(matcher.parameter("uniqueness_ratio").unwrap(), 100);
}

#[test]
fn test_settings_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sgbm.txt");

    let mut matcher = BlockMatcher::semi_global();
    matcher.set_parameter("block_size", 7).unwrap();
    matcher.set_parameter("p1", 300).unwrap();
    matcher.set_parameter("p2", 1200).unwrap();
    matcher.set_parameter("disp12_max_diff", -1).unwrap();
    matcher.set_parameter("full_dp", 1).unwrap();
    matcher.save_settings(&path).unwrap();

    let loaded = BlockMatcher::with_settings(MatcherKind::SemiGlobal, &path).unwrap();
    assert_eq!(loaded, matcher);

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), SEMI_GLOBAL_SCHEMA.len());
    assert!(text.starts_with("min_disparity 16\n"));
}

#[test]
fn test_minima_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm.txt");

    let minima = ParameterSet::minima(MatcherKind::Basic);
    minima.save(&path).unwrap();
    let loaded = ParameterSet::load(MatcherKind::Basic, &path).unwrap();
    assert_eq!(loaded, minima);
    for spec in BASIC_SCHEMA {
        assert_eq!(loaded.get(spec.name).unwrap(), spec.min);
    }
}

#[test]
fn test_every_admissible_value_round_trips() {
    let dir = tempdir().unwrap();
    for kind in [MatcherKind::Basic, MatcherKind::SemiGlobal] {
        let path = dir.path().join(format!("{}.txt", kind));
        for spec in kind.schema() {
            let mid = spec.value_at(spec.levels() / 2);
            for value in [spec.min, mid, spec.max] {
                let mut params = ParameterSet::new(kind);
                let assignment = params.set(spec.name, value).unwrap();
                assert!(!assignment.was_clamped(), "{} = {}", spec.name, value);
                params.save(&path).unwrap();

                let loaded = ParameterSet::load(kind, &path).unwrap();
                assert_eq!(loaded, params, "{} = {}", spec.name, value);
                assert_eq!(loaded.get(spec.name).unwrap(), value);
            }
        }
    }
}

#[test]
fn test_settings_with_unknown_name_fail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm.txt");
    fs::write(&path, "window_size 9\np2 100\n").unwrap();

    let mut matcher = BlockMatcher::basic();
    let err = matcher.load_settings(&path).unwrap_err();
    assert!(matches!(err, Error::UnknownSettingName { ref name, .. } if name == "p2"));
    assert_eq!(matcher.parameter("window_size").unwrap(), 21);
}

#[test]
fn test_settings_out_of_range_are_clamped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bm.txt");
    fs::write(&path, "search_range 1000\nwindow_size 2\n").unwrap();

    let mut matcher = BlockMatcher::basic();
    let params = matcher.load_settings(&path).unwrap();
    assert_eq!(params.get("search_range").unwrap(), 256);
    assert_eq!(params.get("window_size").unwrap(), 5);
    assert_eq!(matcher.parameters(), &params);
}

#[test]
fn test_missing_settings_file() {
    let dir = tempdir().unwrap();
    let mut matcher = BlockMatcher::basic();
    assert!(matches!(
        matcher.load_settings(dir.path().join("absent.txt")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_tuning_run_persists_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tuned.txt");

    let mut matcher = BlockMatcher::semi_global();
    let mut aggregator = TuningAggregator::new(matcher.kind());
    for block_size in [3, 3, 5, 3, 5] {
        matcher.set_parameter("block_size", block_size).unwrap();
        aggregator.record(matcher.parameters()).unwrap();
    }
    assert_eq!(aggregator.report_settings("block_size").unwrap(), Some(3));
    assert_eq!(matcher.parameter("block_size").unwrap(), 5);

    let recommended = aggregator.recommended(matcher.parameters()).unwrap();
    matcher.set_parameters(recommended).unwrap();
    matcher.save_settings(&path).unwrap();

    let reloaded = ParameterSet::load(MatcherKind::SemiGlobal, &path).unwrap();
    assert_eq!(reloaded.get("block_size").unwrap(), 3);
}

#[test]
fn test_single_pixel_cloud_and_filter() {
    // f = 500, cx = 1, cy = 1, baseline 0.2 (Tx = -0.2)
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -1.0, //
        0.0, 1.0, 0.0, -1.0, //
        0.0, 0.0, 0.0, 500.0, //
        0.0, 0.0, 5.0, 0.0,
    );
    let mut disparity = DisparityMap::new(3, 3, 0, 16);
    disparity.set(2, 0, 10.0);
    let color = RgbImage::from_pixel(3, 3, Rgb([200, 100, 50]));

    let options = ReprojectOptions::with_missing_depth(DEFAULT_MISSING_DEPTH);
    let cloud = reproject(&disparity, &color, &q, &options).unwrap();
    assert_eq!(cloud.len(), 9);

    let filtered = filter_infinity(&cloud, &DepthFilter::new(DEFAULT_MISSING_DEPTH));
    assert_eq!(filtered.len(), 1);
    let p = filtered.points()[0];
    // w = 5 * 10 = 50: X = 1/50, Y = -1/50, Z = 500/50
    assert!((p.x - 0.02).abs() < 1e-6);
    assert!((p.y + 0.02).abs() < 1e-6);
    assert!((p.z - 10.0).abs() < 1e-5);
    assert_eq!(filtered.colors()[0], Rgb([200, 100, 50]));

    let excluded = filter_infinity(&filtered, &DepthFilter::new(5.0));
    assert!(excluded.is_empty());
}
