//! Benchmarks for the two block matcher variants and point cloud reprojection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cv_stereovision::stereo::{
    filter_infinity, reproject, BlockMatcher, DepthFilter, ReprojectOptions, StereoMatcher,
};
use image::{GrayImage, Luma, RgbImage};
use nalgebra::Matrix4;
use std::time::Duration;

fn texture(x: u32, y: u32) -> u8 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as u8
}

/// Create synthetic stereo pair with known disparity
fn create_stereo_pair(width: u32, height: u32, disparity: u32) -> (GrayImage, GrayImage) {
    let left = GrayImage::from_fn(width, height, |x, y| Luma([texture(x / 2, y / 2)]));
    let right = GrayImage::from_fn(width, height, |x, y| {
        Luma([texture((x + disparity) / 2, y / 2)])
    });
    (left, right)
}

fn benchmark_matchers(c: &mut Criterion) {
    let mut group = c.benchmark_group("stereo_matching");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    for &(width, height) in &[(160u32, 120u32), (320, 240)] {
        let (left, right) = create_stereo_pair(width, height, 12);
        let label = format!("{}x{}", width, height);

        let mut basic = BlockMatcher::basic();
        basic.set_parameter("search_range", 32).unwrap();
        basic.set_parameter("window_size", 11).unwrap();
        group.bench_with_input(BenchmarkId::new("basic", &label), &(), |b, _| {
            b.iter(|| basic.compute(black_box(&left), black_box(&right)).unwrap())
        });

        let mut sgbm = BlockMatcher::semi_global();
        sgbm.set_parameter("min_disparity", 0).unwrap();
        sgbm.set_parameter("num_disparities", 32).unwrap();
        group.bench_with_input(BenchmarkId::new("semi_global", &label), &(), |b, _| {
            b.iter(|| sgbm.compute(black_box(&left), black_box(&right)).unwrap())
        });
    }

    group.finish();
}

fn benchmark_reprojection(c: &mut Criterion) {
    let (left, right) = create_stereo_pair(320, 240, 12);
    let mut matcher = BlockMatcher::basic();
    matcher.set_parameter("search_range", 32).unwrap();
    let disparity = matcher.compute(&left, &right).unwrap();
    let color = RgbImage::new(320, 240);
    let q = Matrix4::new(
        1.0, 0.0, 0.0, -160.0, //
        0.0, 1.0, 0.0, -120.0, //
        0.0, 0.0, 0.0, 350.0, //
        0.0, 0.0, 8.0, 0.0,
    );
    let options = ReprojectOptions::with_missing_depth(10_000.0);
    let filter = DepthFilter::new(10_000.0);

    c.bench_function("reproject_and_filter_320x240", |b| {
        b.iter(|| {
            let cloud = reproject(black_box(&disparity), &color, &q, &options).unwrap();
            filter_infinity(&cloud, &filter)
        })
    });
}

criterion_group!(benches, benchmark_matchers, benchmark_reprojection);
criterion_main!(benches);
