use cv_core::{Error, PointCloud};
use image::Rgb;
use nalgebra::Point3;

#[test]
fn test_point_cloud_rejects_mismatched_colors() {
    let points = vec![Point3::new(0.0, 0.0, 1.0), Point3::new(1.0, 0.0, 1.0)];
    let colors = vec![Rgb([255, 0, 0])];
    match PointCloud::new(points, colors) {
        Err(Error::DimensionMismatch(msg)) => assert!(msg.contains("does not match")),
        other => panic!("expected dimension mismatch, got {other:?}"),
    }
}

#[test]
fn test_point_cloud_keeps_order() {
    let mut cloud = PointCloud::with_capacity(3);
    for i in 0..3 {
        cloud.push(Point3::new(i as f32, 0.0, 1.0), Rgb([i as u8, 0, 0]));
    }
    assert_eq!(cloud.len(), 3);
    let xs: Vec<f32> = cloud.points().iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    assert_eq!(cloud.colors()[2], Rgb([2, 0, 0]));
}

#[test]
fn test_point_cloud_from_iterator() {
    let cloud: PointCloud = (0..4)
        .map(|i| (Point3::new(0.0, i as f32, 2.0), Rgb([0, 0, i as u8])))
        .collect();
    assert_eq!(cloud.len(), 4);
    assert!(cloud.iter().all(|(p, c)| p.y as u8 == c.0[2]));
}
