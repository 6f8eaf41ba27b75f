use image::Rgb;
use nalgebra::Point3;

/// Ordered set of 3D points with one RGB color per point.
///
/// The two vectors always have the same length; constructors that receive
/// them separately reject mismatched counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f32>>,
    colors: Vec<Rgb<u8>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>, colors: Vec<Rgb<u8>>) -> crate::Result<Self> {
        if colors.len() == points.len() {
            Ok(Self { points, colors })
        } else {
            Err(crate::Error::DimensionMismatch(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                points.len()
            )))
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: Point3<f32>, color: Rgb<u8>) {
        self.points.push(point);
        self.colors.push(color);
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn colors(&self) -> &[Rgb<u8>] {
        &self.colors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Point3<f32>, &Rgb<u8>)> + '_ {
        self.points.iter().zip(self.colors.iter())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Point3<f32>>, Vec<Rgb<u8>>) {
        (self.points, self.colors)
    }
}

impl FromIterator<(Point3<f32>, Rgb<u8>)> for PointCloud {
    fn from_iter<I: IntoIterator<Item = (Point3<f32>, Rgb<u8>)>>(iter: I) -> Self {
        let (points, colors) = iter.into_iter().unzip();
        Self { points, colors }
    }
}
