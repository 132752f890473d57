//! Kinetic Core
//!
//! Value types and the per-type interpolation math consumed by the tween
//! engine in `kinetic_tween`.
//!
//! - **Value Types**: [`Vec2`], [`Vec3`], [`Vec4`], [`Quat`], [`Mat4`], [`Color`]
//! - **Interpolation**: [`Interpolate`] for linear blends and
//!   [`SphericalInterpolate`] for rotations
//!
//! # Example
//!
//! ```rust
//! use kinetic_core::{Interpolate, Vec3};
//!
//! let a = Vec3::new(0.0, 0.0, 0.0);
//! let b = Vec3::new(10.0, 20.0, 30.0);
//! assert_eq!(a.lerp(&b, 0.5), Vec3::new(5.0, 10.0, 15.0));
//! ```

pub mod interpolate;
pub mod math;

pub use interpolate::{Interpolate, SphericalInterpolate};
pub use math::{Color, Mat4, Quat, Vec2, Vec3, Vec4};
