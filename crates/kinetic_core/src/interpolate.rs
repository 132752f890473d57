//! Interpolation traits
//!
//! Linear interpolation for scalars, vectors, matrices and colors, plus
//! spherical interpolation for quaternions. `t` is not clamped: easing curves
//! that overshoot (back, elastic) are allowed to extrapolate.

use crate::math::{Color, Mat4, Quat, Vec2, Vec3, Vec4};

/// Trait for values that can be linearly interpolated
pub trait Interpolate: Clone {
    /// Linearly interpolate between self and other by factor t (0.0 to 1.0)
    fn lerp(&self, other: &Self, t: f32) -> Self;

    /// Check if two values are approximately equal
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;
}

/// Trait for values that use spherical interpolation (quaternions)
pub trait SphericalInterpolate: Clone {
    /// Spherically interpolate between self and other by factor t (0.0 to 1.0)
    fn slerp(&self, other: &Self, t: f32) -> Self;
}

#[inline]
fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ============================================================================
// Scalar and Vectors
// ============================================================================

impl Interpolate for f32 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        mix(*self, *other, t)
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self - other).abs() < epsilon
    }
}

impl Interpolate for Vec2 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Vec2::new(mix(self.x, other.x, t), mix(self.y, other.y, t))
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.x - other.x).abs() < epsilon && (self.y - other.y).abs() < epsilon
    }
}

impl Interpolate for Vec3 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Vec3::new(
            mix(self.x, other.x, t),
            mix(self.y, other.y, t),
            mix(self.z, other.z, t),
        )
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.x - other.x).abs() < epsilon
            && (self.y - other.y).abs() < epsilon
            && (self.z - other.z).abs() < epsilon
    }
}

impl Interpolate for Vec4 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Vec4::new(
            mix(self.x, other.x, t),
            mix(self.y, other.y, t),
            mix(self.z, other.z, t),
            mix(self.w, other.w, t),
        )
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .all(|(a, b)| (a - b).abs() < epsilon)
    }
}

// ============================================================================
// Color
// ============================================================================

impl Interpolate for Color {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Color::rgba(
            mix(self.r, other.r, t),
            mix(self.g, other.g, t),
            mix(self.b, other.b, t),
            mix(self.a, other.a, t),
        )
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self.r - other.r).abs() < epsilon
            && (self.g - other.g).abs() < epsilon
            && (self.b - other.b).abs() < epsilon
            && (self.a - other.a).abs() < epsilon
    }
}

// ============================================================================
// Matrix
// ============================================================================

/// Component-wise blend. Good for translation/scale transforms; rotations
/// should be animated as [`Quat`] instead.
impl Interpolate for Mat4 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut cols = [[0.0f32; 4]; 4];
        for (c, col) in cols.iter_mut().enumerate() {
            for (r, cell) in col.iter_mut().enumerate() {
                *cell = mix(self.cols[c][r], other.cols[c][r], t);
            }
        }
        Mat4 { cols }
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.cols
            .iter()
            .flatten()
            .zip(other.cols.iter().flatten())
            .all(|(a, b)| (a - b).abs() < epsilon)
    }
}

// ============================================================================
// Quaternion
// ============================================================================

/// Normalized lerp (nlerp) along the shorter arc
impl Interpolate for Quat {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let sign = if self.dot(other) < 0.0 { -1.0 } else { 1.0 };
        Quat::new(
            mix(self.x, other.x * sign, t),
            mix(self.y, other.y * sign, t),
            mix(self.z, other.z * sign, t),
            mix(self.w, other.w * sign, t),
        )
        .normalize()
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        // q and -q are the same rotation
        (self.dot(other).abs() - 1.0).abs() < epsilon
    }
}

impl SphericalInterpolate for Quat {
    fn slerp(&self, other: &Self, t: f32) -> Self {
        let mut cos_theta = self.dot(other);
        let mut end = *other;
        if cos_theta < 0.0 {
            cos_theta = -cos_theta;
            end = Quat::new(-end.x, -end.y, -end.z, -end.w);
        }

        // Nearly parallel: sin(theta) -> 0, fall back to nlerp
        if cos_theta > 0.9995 {
            return self.lerp(&end, t);
        }

        let theta = cos_theta.clamp(-1.0, 1.0).acos();
        let sin_theta = theta.sin();
        let wa = ((1.0 - t) * theta).sin() / sin_theta;
        let wb = (t * theta).sin() / sin_theta;

        Quat::new(
            self.x * wa + end.x * wb,
            self.y * wa + end.y * wb,
            self.z * wa + end.z * wb,
            self.w * wa + end.w * wb,
        )
    }
}
