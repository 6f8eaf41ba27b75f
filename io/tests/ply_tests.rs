use cv_core::PointCloud;
use cv_io::*;
use image::Rgb;
use nalgebra::Point3;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_two_point_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cloud.ply");
    let cloud = PointCloud::new(
        vec![Point3::new(0.5, -1.0, 2.0), Point3::new(3.0, 4.0, 5.25)],
        vec![Rgb([10, 20, 30]), Rgb([40, 50, 60])],
    )
    .unwrap();

    write_ply_file(&path, &cloud).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[2], "element vertex 2");
    let end = lines.iter().position(|l| *l == "end_header").unwrap();
    assert_eq!(&lines[end + 1..], &[
        "0.500000 -1.000000 2.000000 10 20 30",
        "3.000000 4.000000 5.250000 40 50 60",
    ]);

    let read = read_ply_file(&path).unwrap();
    assert_eq!(read, cloud);
}

#[test]
fn test_identical_clouds_write_identical_bytes() {
    let dir = tempdir().unwrap();
    let cloud: PointCloud = (0..50)
        .map(|i| {
            let f = i as f32 * 0.37;
            (Point3::new(f, -f, f * f), Rgb([i as u8, 255 - i as u8, 7]))
        })
        .collect();

    let a = dir.path().join("a.ply");
    let b = dir.path().join("b.ply");
    write_ply_file(&a, &cloud).unwrap();
    write_ply_file(&b, &cloud.clone()).unwrap();
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}

#[test]
fn test_missing_file() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        read_ply_file(dir.path().join("none.ply")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_header_template_counts() {
    assert_eq!(PLY_HEADER_TEMPLATE.lines().count(), 10);
    assert!(PLY_HEADER_TEMPLATE.contains("element vertex {}"));
}
