//! PLY (Polygon File Format) I/O
//!
//! Output is byte-stable: a fixed header followed by one
//! `x y z red green blue` line per point, positions printed with six
//! decimals, in point cloud order.

use crate::{Error, Result};
use cv_core::PointCloud;
use image::Rgb;
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Header written before the vertex list; `{}` is the vertex count.
pub const PLY_HEADER_TEMPLATE: &str = "ply\n\
format ascii 1.0\n\
element vertex {}\n\
property float x\n\
property float y\n\
property float z\n\
property uchar red\n\
property uchar green\n\
property uchar blue\n\
end_header\n";

/// Write a point cloud in ASCII PLY format
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    write!(
        writer,
        "{}",
        PLY_HEADER_TEMPLATE.replace("{}", &cloud.len().to_string())
    )?;
    for (p, c) in cloud.iter() {
        writeln!(
            writer,
            "{:.6} {:.6} {:.6} {} {} {}",
            p.x, p.y, p.z, c[0], c[1], c[2]
        )?;
    }
    Ok(())
}

pub fn write_ply_file<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_ply(&mut writer, cloud)?;
    writer.flush()?;
    info!(path = %path.display(), points = cloud.len(), "wrote point cloud");
    Ok(())
}

/// Read the vertex element of an ASCII PLY stream.
///
/// Positions come from the `x`, `y`, `z` properties and colors from
/// `red`, `green`, `blue` when present (black otherwise). Elements after the
/// vertex list, such as faces, are ignored.
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud> {
    parse_ply(reader, Path::new("<stream>"))
}

pub fn read_ply_file<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    parse_ply(BufReader::new(File::open(path)?), path)
}

struct VertexLayout {
    count: usize,
    /// Vertex element follows this many data lines of earlier elements.
    skip: usize,
    properties: Vec<String>,
}

impl VertexLayout {
    fn index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p == name)
    }
}

fn parse_ply<R: BufRead>(reader: R, path: &Path) -> Result<PointCloud> {
    let mut lines = reader.lines().enumerate();
    let parse_error = |line: usize, message: String| Error::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    let magic = match lines.next() {
        Some((_, line)) => line?,
        None => String::new(),
    };
    if magic.trim() != "ply" {
        return Err(parse_error(1, "missing 'ply' magic".into()));
    }

    let mut format_seen = false;
    let mut vertex: Option<VertexLayout> = None;
    let mut preceding = 0usize;
    let mut current_is_vertex = false;

    loop {
        let (index, line) = lines
            .next()
            .ok_or_else(|| parse_error(0, "unexpected end of header".into()))?;
        let line = line?;
        let line_no = index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            ["end_header"] => break,
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["format", "ascii", _] => format_seen = true,
            ["format", other, ..] => {
                return Err(parse_error(
                    line_no,
                    format!("unsupported format '{}', only ascii is read", other),
                ))
            }
            ["element", name, count] => {
                let count: usize = count
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("invalid count '{}'", count)))?;
                current_is_vertex = *name == "vertex";
                if current_is_vertex {
                    vertex = Some(VertexLayout {
                        count,
                        skip: preceding,
                        properties: Vec::new(),
                    });
                } else if vertex.is_none() {
                    preceding += count;
                }
            }
            ["property", "list", ..] if current_is_vertex => {
                return Err(parse_error(line_no, "list properties on vertices".into()))
            }
            ["property", .., name] => {
                if current_is_vertex {
                    if let Some(layout) = vertex.as_mut() {
                        layout.properties.push(name.to_string());
                    }
                }
            }
            _ => return Err(parse_error(line_no, format!("unexpected header line '{}'", line))),
        }
    }

    if !format_seen {
        return Err(parse_error(0, "missing format line".into()));
    }
    let layout = vertex.ok_or_else(|| parse_error(0, "no vertex element".into()))?;
    let position = ["x", "y", "z"]
        .iter()
        .map(|axis| {
            layout
                .index(axis)
                .ok_or_else(|| parse_error(0, format!("vertex property '{}' missing", axis)))
        })
        .collect::<Result<Vec<_>>>()?;
    let color: Option<Vec<usize>> = ["red", "green", "blue"]
        .iter()
        .map(|c| layout.index(c))
        .collect();

    for _ in 0..layout.skip {
        lines
            .next()
            .ok_or_else(|| parse_error(0, "unexpected end of data".into()))?
            .1?;
    }

    let mut cloud = PointCloud::with_capacity(layout.count);
    for _ in 0..layout.count {
        let (index, line) = lines
            .next()
            .ok_or_else(|| parse_error(0, "unexpected end of vertex data".into()))?;
        let line = line?;
        let line_no = index + 1;
        let values = line
            .split_whitespace()
            .map(|s| {
                s.parse::<f32>()
                    .map_err(|_| parse_error(line_no, format!("invalid number '{}'", s)))
            })
            .collect::<Result<Vec<f32>>>()?;
        if values.len() < layout.properties.len() {
            return Err(parse_error(
                line_no,
                format!(
                    "expected {} values, found {}",
                    layout.properties.len(),
                    values.len()
                ),
            ));
        }

        let point = Point3::new(values[position[0]], values[position[1]], values[position[2]]);
        let rgb = match &color {
            Some(idx) => Rgb([
                values[idx[0]].clamp(0.0, 255.0) as u8,
                values[idx[1]].clamp(0.0, 255.0) as u8,
                values[idx[2]].clamp(0.0, 255.0) as u8,
            ]),
            None => Rgb([0, 0, 0]),
        };
        cloud.push(point, rgb);
    }

    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn two_points() -> PointCloud {
        [
            (Point3::new(1.0, 2.0, 3.0), Rgb([255, 0, 10])),
            (Point3::new(-0.5, 0.25, 7.125), Rgb([1, 2, 3])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn writes_fixed_header_and_rows() {
        let mut buf = Vec::new();
        write_ply(&mut buf, &two_points()).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let expected = "ply\n\
format ascii 1.0\n\
element vertex 2\n\
property float x\n\
property float y\n\
property float z\n\
property uchar red\n\
property uchar green\n\
property uchar blue\n\
end_header\n\
1.000000 2.000000 3.000000 255 0 10\n\
-0.500000 0.250000 7.125000 1 2 3\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn empty_cloud() {
        let mut buf = Vec::new();
        write_ply(&mut buf, &PointCloud::default()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("element vertex 0\n"));
        assert!(text.ends_with("end_header\n"));
    }

    #[test]
    fn reads_back_written_cloud() {
        let mut buf = Vec::new();
        write_ply(&mut buf, &two_points()).unwrap();
        let cloud = read_ply(Cursor::new(buf)).unwrap();
        assert_eq!(cloud, two_points());
    }

    #[test]
    fn reads_reordered_properties_and_faces() {
        let text = "ply\nformat ascii 1.0\ncomment made elsewhere\n\
element vertex 1\nproperty uchar blue\nproperty float z\nproperty float x\n\
property float y\nproperty uchar green\nproperty uchar red\n\
element face 1\nproperty list uchar int vertex_indices\nend_header\n\
9 3.0 1.0 2.0 8 7\n3 0 0 0\n";
        let cloud = read_ply(Cursor::new(text)).unwrap();
        assert_eq!(cloud.points(), &[Point3::new(1.0, 2.0, 3.0)]);
        assert_eq!(cloud.colors(), &[Rgb([7, 8, 9])]);
    }

    #[test]
    fn rejects_binary_and_truncated_files() {
        let binary = "ply\nformat binary_little_endian 1.0\nend_header\n";
        assert!(matches!(
            read_ply(Cursor::new(binary)),
            Err(Error::Parse { line: 2, .. })
        ));

        let truncated = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\n\
property float y\nproperty float z\nend_header\n1 2 3\n";
        assert!(read_ply(Cursor::new(truncated)).is_err());

        assert!(read_ply(Cursor::new("not a ply\n")).is_err());
    }
}
