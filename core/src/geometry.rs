use crate::{Error, Result};
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, Rotation3, Vector3};

/// Pinhole intrinsics without skew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Focal length equal to the image width, principal point at the image center.
    pub fn new_ideal(width: u32, height: u32) -> Self {
        let f = width as f64;
        Self::new(
            f,
            f,
            (width as f64 - 1.0) * 0.5,
            (height as f64 - 1.0) * 0.5,
            width,
            height,
        )
    }

    pub fn from_matrix(k: &Matrix3<f64>, width: u32, height: u32) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], width, height)
    }

    /// Intrinsics embedded in the left 3x3 block of a rectified projection matrix.
    pub fn from_projection(p: &Matrix3x4<f64>, width: u32, height: u32) -> Self {
        Self::new(p[(0, 0)], p[(1, 1)], p[(0, 2)], p[(1, 2)], width, height)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let x = point.x / point.z;
        let y = point.y / point.z;
        Point2::new(x * self.fx + self.cx, y * self.fy + self.cy)
    }

    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let x = (pixel.x - self.cx) / self.fx;
        let y = (pixel.y - self.cy) / self.fy;
        Point3::new(x * depth, y * depth, depth)
    }
}

/// Rigid transform mapping points from one frame into another: `x' = R x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Builds a pose from an axis-angle rotation vector (Rodrigues form).
    pub fn from_rotation_vector(rvec: &Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: rotation_from_vector(rvec),
            translation,
        }
    }

    pub fn rotation_vector(&self) -> Vector3<f64> {
        rotation_to_vector(&self.rotation)
    }

    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }

    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.transpose();
        Self {
            rotation: r_inv,
            translation: -r_inv * self.translation,
        }
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Pose) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

pub fn rotation_from_vector(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*rvec).into_inner()
}

pub fn rotation_to_vector(rotation: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(rotation).scaled_axis()
}

pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}

/// Lens distortion coefficients in the order
/// `k1 k2 p1 p2 [k3 [k4 k5 k6 [s1 s2 s3 s4]]]`.
///
/// Four, five, eight and twelve coefficient vectors are accepted. Missing
/// trailing terms are zero. Tilted-sensor vectors (fourteen terms) are
/// accepted only when both tilt angles are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Distortion {
    coeffs: Vec<f64>,
}

impl Distortion {
    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64, k3: f64) -> Self {
        Self {
            coeffs: vec![k1, k2, p1, p2, k3],
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0)
    }

    pub fn from_coefficients(coeffs: &[f64]) -> Result<Self> {
        match coeffs.len() {
            4 | 5 | 8 | 12 => {}
            14 => {
                if coeffs[12] != 0.0 || coeffs[13] != 0.0 {
                    return Err(Error::InvalidInput(
                        "tilted sensor distortion is not supported".into(),
                    ));
                }
            }
            n => {
                return Err(Error::InvalidInput(format!(
                    "distortion vector must have 4, 5, 8, 12 or 14 coefficients, got {n}"
                )))
            }
        }
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidInput(
                "distortion coefficients must be finite".into(),
            ));
        }
        let len = coeffs.len().min(12);
        Ok(Self {
            coeffs: coeffs[..len].to_vec(),
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    fn coeff(&self, i: usize) -> f64 {
        self.coeffs.get(i).copied().unwrap_or(0.0)
    }

    pub fn k1(&self) -> f64 {
        self.coeff(0)
    }

    pub fn k2(&self) -> f64 {
        self.coeff(1)
    }

    pub fn p1(&self) -> f64 {
        self.coeff(2)
    }

    pub fn p2(&self) -> f64 {
        self.coeff(3)
    }

    pub fn k3(&self) -> f64 {
        self.coeff(4)
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|c| *c == 0.0)
    }

    fn radial_ratio(&self, r2: f64) -> f64 {
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + self.coeff(0) * r2 + self.coeff(1) * r4 + self.coeff(4) * r6;
        let den = 1.0 + self.coeff(5) * r2 + self.coeff(6) * r4 + self.coeff(7) * r6;
        num / den
    }

    fn offsets(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        let r4 = r2 * r2;
        let (p1, p2) = (self.coeff(2), self.coeff(3));
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x) + self.coeff(8) * r2 + self.coeff(9) * r4;
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y + self.coeff(10) * r2 + self.coeff(11) * r4;
        (dx, dy)
    }

    /// Maps ideal normalized coordinates to distorted normalized coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = self.radial_ratio(r2);
        let (dx, dy) = self.offsets(x, y, r2);
        (x * radial + dx, y * radial + dy)
    }

    /// Inverts [`Distortion::apply`] by fixed-point iteration.
    pub fn remove(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_zero() {
            return (x, y);
        }
        let mut xu = x;
        let mut yu = y;
        for _ in 0..20 {
            let r2 = xu * xu + yu * yu;
            let radial = self.radial_ratio(r2);
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return (x, y);
            }
            let (dx, dy) = self.offsets(xu, yu, r2);
            xu = (x - dx) / radial;
            yu = (y - dy) / radial;
        }
        (xu, yu)
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::none()
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }

    pub fn intersect(&self, other: &Roi) -> Roi {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            return Roi::new(x0, y0, 0, 0);
        }
        Roi::new(x0, y0, x1 - x0, y1 - y0)
    }
}
