//! Math utilities and types
//!
//! [`AffineMatrix`] describes the 2D transforms the affine filter applies to its
//! input. Coordinates are normalized: `(0, 0)` is the bottom-left corner and
//! `(1, 1)` the top-right corner of the frame.

use nalgebra::Matrix3;
pub use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors building a transform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Reframing to a zero-sized rectangle
    #[error("Cannot reframe to an empty area: {width}x{height}")]
    EmptyReframe {
        /// Requested width
        width: f64,
        /// Requested height
        height: f64,
    },

    /// Orthogonal rotation outside 0..=3 quarter turns
    #[error("Invalid rotation: {0}")]
    InvalidRotation(i32),
}

/// 2D affine transform
///
/// ```text
/// / a c e \
/// | b d f |
/// \ 0 0 1 /
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineMatrix {
    m: Matrix3<f64>,
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Display for AffineMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, ff] = self.coefficients();
        write!(f, "[{a}, {c}, {e}; {b}, {d}, {ff}]")
    }
}

impl AffineMatrix {
    /// Build from the six affine coefficients
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self {
            m: Matrix3::new(
                a, c, e, //
                b, d, f, //
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// The identity transform
    pub fn identity() -> Self {
        Self { m: Matrix3::identity() }
    }

    /// Coefficients in `[a, b, c, d, e, f]` order
    pub fn coefficients(&self) -> [f64; 6] {
        let m = &self.m;
        [m[(0, 0)], m[(1, 0)], m[(0, 1)], m[(1, 1)], m[(0, 2)], m[(1, 2)]]
    }

    /// Underlying homogeneous matrix
    pub fn as_matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Translation by `(x, y)`
    pub fn translate(x: f64, y: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    /// Scaling by `(x, y)`
    pub fn scale(x: f64, y: f64) -> Self {
        Self::new(x, 0.0, 0.0, y, 0.0, 0.0)
    }

    /// Scaling that maps a `from` size onto a `to` size
    pub fn scale_between(from: (u32, u32), to: (u32, u32)) -> Self {
        Self::scale(
            f64::from(to.0) / f64::from(from.0),
            f64::from(to.1) / f64::from(from.1),
        )
    }

    /// Counter-clockwise rotation in degrees around the origin
    pub fn rotate(ccw_degrees: f64) -> Self {
        let (sin, cos) = ccw_degrees.to_radians().sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// Counter-clockwise rotation by quarter turns, around the frame center
    pub fn rotate_ortho(quarter_turns: i32) -> Result<Self, TransformError> {
        match quarter_turns {
            0 => Ok(Self::identity()),
            1 => Ok(Self::new(0.0, 1.0, -1.0, 0.0, 1.0, 0.0)),
            2 => Ok(Self::new(-1.0, 0.0, 0.0, -1.0, 1.0, 1.0)),
            3 => Ok(Self::new(0.0, -1.0, 1.0, 0.0, 0.0, 1.0)),
            other => Err(TransformError::InvalidRotation(other)),
        }
    }

    /// Horizontal flip
    pub fn hflip() -> Self {
        Self::new(-1.0, 0.0, 0.0, 1.0, 1.0, 0.0)
    }

    /// Vertical flip
    pub fn vflip() -> Self {
        Self::new(1.0, 0.0, 0.0, -1.0, 0.0, 1.0)
    }

    /// Crop to the rectangle with bottom-left corner `(x, y)` and size `(w, h)`
    pub fn reframe(x: f64, y: f64, w: f64, h: f64) -> Result<Self, TransformError> {
        if w == 0.0 || h == 0.0 {
            return Err(TransformError::EmptyReframe { width: w, height: h });
        }
        Ok(Self::scale(1.0 / w, 1.0 / h).multiply(&Self::translate(-x, -y)))
    }

    /// Pixels to normalized coordinates for a frame of `width` x `height`
    pub fn ndc_from_pixels(width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        Self::new(1.0 / w, 0.0, 0.0, -1.0 / h, 0.0, 1.0)
    }

    /// Normalized coordinates to pixels for a frame of `width` x `height`
    pub fn ndc_to_pixels(width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        Self::new(w, 0.0, 0.0, -h, 0.0, h)
    }

    /// `self * rhs`
    pub fn multiply(&self, rhs: &Self) -> Self {
        Self { m: self.m * rhs.m }
    }

    /// Multiply left to right, skipping `None` entries
    pub fn multiply_all(matrices: &[Option<Self>]) -> Option<Self> {
        matrices
            .iter()
            .flatten()
            .fold(None, |acc: Option<Self>, m| Some(acc.map_or(*m, |acc| acc.multiply(m))))
    }

    /// Inverse transform, or `None` when singular
    pub fn invert(&self) -> Option<Self> {
        let [a, b, c, d, e, f] = self.coefficients();
        let det = a * d - c * b;
        if det == 0.0 {
            return None;
        }
        Some(Self::new(
            d / det,
            -b / det,
            -c / det,
            a / det,
            (c * f - d * e) / det,
            (b * e - a * f) / det,
        ))
    }

    /// This transform applied around the frame center `(0.5, 0.5)`
    pub fn from_center(&self) -> Self {
        Self::translate(0.5, 0.5)
            .multiply(self)
            .multiply(&Self::translate(-0.5, -0.5))
    }

    /// This transform corrected for a frame aspect ratio `ar = width / height`
    pub fn with_aspect_ratio(&self, ar: f64) -> Self {
        Self::scale(1.0 / ar, 1.0)
            .multiply(self)
            .multiply(&Self::scale(ar, 1.0))
    }

    /// This transform corrected for the aspect ratio of a `width` x `height` frame
    pub fn with_aspect_ratio_of(&self, width: u32, height: u32) -> Self {
        self.with_aspect_ratio(f64::from(width) / f64::from(height))
    }

    /// Transform a point
    pub fn apply(&self, point: Point2<f64>) -> Point2<f64> {
        self.m.transform_point(&point)
    }

    /// Column-major 4x4 matrix as consumed by the vertex shader
    pub fn to_4x4(&self) -> [f32; 16] {
        let [a, b, c, d, e, f] = self.coefficients();
        #[allow(clippy::cast_possible_truncation)]
        let [a, b, c, d, e, f] = [a as f32, b as f32, c as f32, d as f32, e as f32, f as f32];
        [
            a, b, 0.0, 0.0, //
            c, d, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            e, f, 0.0, 1.0,
        ]
    }
}

/// Column-major identity 4x4 matrix
pub const IDENTITY_4X4: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_matrix_eq(lhs: &AffineMatrix, rhs: &AffineMatrix) {
        for (l, r) in lhs.coefficients().iter().zip(rhs.coefficients()) {
            assert_relative_eq!(*l, r, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inverse_round_trips_to_identity() {
        let m = AffineMatrix::rotate(30.0)
            .multiply(&AffineMatrix::scale(2.0, 0.5))
            .multiply(&AffineMatrix::translate(0.25, -1.0));
        let inv = m.invert().expect("invertible");
        assert_matrix_eq(&m.multiply(&inv), &AffineMatrix::identity());
    }

    #[test]
    fn test_singular_matrix_has_no_inverse() {
        assert!(AffineMatrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn test_quarter_turn_matches_centered_rotation() {
        let ortho = AffineMatrix::rotate_ortho(1).unwrap();
        assert_matrix_eq(&ortho, &AffineMatrix::rotate(90.0).from_center());

        let half = AffineMatrix::rotate_ortho(2).unwrap();
        assert_matrix_eq(&half, &AffineMatrix::rotate(180.0).from_center());
    }

    #[test]
    fn test_centered_transform_keeps_center_fixed() {
        let m = AffineMatrix::rotate(37.0).from_center();
        let center = m.apply(Point2::new(0.5, 0.5));
        assert_relative_eq!(center.x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(center.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_ortho_rotation() {
        assert_eq!(AffineMatrix::rotate_ortho(4), Err(TransformError::InvalidRotation(4)));
    }

    #[test]
    fn test_reframe_maps_rectangle_to_unit_square() {
        let m = AffineMatrix::reframe(0.25, 0.25, 0.5, 0.5).unwrap();
        let corner = m.apply(Point2::new(0.75, 0.75));
        assert_relative_eq!(corner.x, 1.0);
        assert_relative_eq!(corner.y, 1.0);

        assert!(AffineMatrix::reframe(0.0, 0.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_ndc_pixel_conversions_cancel() {
        let m = AffineMatrix::ndc_to_pixels(1920, 1080).multiply(&AffineMatrix::ndc_from_pixels(1920, 1080));
        assert_matrix_eq(&m, &AffineMatrix::identity());
    }

    #[test]
    fn test_multiply_all_skips_none() {
        let t = AffineMatrix::translate(1.0, 2.0);
        let s = AffineMatrix::scale(3.0, 3.0);
        let product = AffineMatrix::multiply_all(&[None, Some(t), None, Some(s)]).unwrap();
        assert_matrix_eq(&product, &t.multiply(&s));
        assert!(AffineMatrix::multiply_all(&[None, None]).is_none());
    }

    #[test]
    fn test_to_4x4_is_column_major() {
        let m = AffineMatrix::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0).to_4x4();
        assert_eq!(&m[0..2], &[1.0, 2.0]);
        assert_eq!(&m[4..6], &[3.0, 4.0]);
        assert_eq!(&m[12..14], &[5.0, 6.0]);
        assert_eq!(m[10], 1.0);
        assert_eq!(m[15], 1.0);
        assert_eq!(AffineMatrix::identity().to_4x4(), IDENTITY_4X4);
    }
}
