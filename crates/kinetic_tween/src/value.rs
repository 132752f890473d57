//! Animatable values
//!
//! A value tween carries its endpoints as a [`TweenValue`], a closed set of
//! the value kinds the engine knows how to drive. The interpolation itself
//! is delegated to a [`LerpFn`]; by default that is [`default_lerp`], which
//! dispatches to the `kinetic_core` implementation for the variant.

use kinetic_core::{Color, Interpolate, Mat4, Quat, SphericalInterpolate, Vec2, Vec3, Vec4};

use crate::events::{guard, CallbackFault};

/// A value that can be tweened
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TweenValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Color(Color),
    Mat4(Mat4),
    Quat(Quat),
}

impl TweenValue {
    /// Variant name, used in tween descriptions
    pub fn kind(&self) -> &'static str {
        match self {
            TweenValue::Float(_) => "float",
            TweenValue::Vec2(_) => "vec2",
            TweenValue::Vec3(_) => "vec3",
            TweenValue::Vec4(_) => "vec4",
            TweenValue::Color(_) => "color",
            TweenValue::Mat4(_) => "mat4",
            TweenValue::Quat(_) => "quat",
        }
    }

    /// Whether both values are the same variant
    pub fn same_kind(&self, other: &TweenValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            TweenValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            TweenValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            TweenValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec4(&self) -> Option<Vec4> {
        match self {
            TweenValue::Vec4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            TweenValue::Color(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mat4(&self) -> Option<Mat4> {
        match self {
            TweenValue::Mat4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_quat(&self) -> Option<Quat> {
        match self {
            TweenValue::Quat(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f32> for TweenValue {
    fn from(v: f32) -> Self {
        TweenValue::Float(v)
    }
}

impl From<Vec2> for TweenValue {
    fn from(v: Vec2) -> Self {
        TweenValue::Vec2(v)
    }
}

impl From<Vec3> for TweenValue {
    fn from(v: Vec3) -> Self {
        TweenValue::Vec3(v)
    }
}

impl From<Vec4> for TweenValue {
    fn from(v: Vec4) -> Self {
        TweenValue::Vec4(v)
    }
}

impl From<Color> for TweenValue {
    fn from(v: Color) -> Self {
        TweenValue::Color(v)
    }
}

impl From<Mat4> for TweenValue {
    fn from(v: Mat4) -> Self {
        TweenValue::Mat4(v)
    }
}

impl From<Quat> for TweenValue {
    fn from(v: Quat) -> Self {
        TweenValue::Quat(v)
    }
}

/// Per-type interpolation: `(from, to, t) -> value`
pub type LerpFn = fn(&TweenValue, &TweenValue, f32) -> TweenValue;

/// Receives every evaluated value of a tween
pub type ValueSink = Box<dyn FnMut(&TweenValue) -> anyhow::Result<()>>;

/// Lerp through `kinetic_core`; quaternions use slerp.
///
/// Mismatched variants return `from` unchanged. The scheduler never gets
/// here with mismatched endpoints: such tweens are invalid from creation.
pub fn default_lerp(from: &TweenValue, to: &TweenValue, t: f32) -> TweenValue {
    match (from, to) {
        (TweenValue::Float(a), TweenValue::Float(b)) => TweenValue::Float(a.lerp(b, t)),
        (TweenValue::Vec2(a), TweenValue::Vec2(b)) => TweenValue::Vec2(a.lerp(b, t)),
        (TweenValue::Vec3(a), TweenValue::Vec3(b)) => TweenValue::Vec3(a.lerp(b, t)),
        (TweenValue::Vec4(a), TweenValue::Vec4(b)) => TweenValue::Vec4(a.lerp(b, t)),
        (TweenValue::Color(a), TweenValue::Color(b)) => TweenValue::Color(a.lerp(b, t)),
        (TweenValue::Mat4(a), TweenValue::Mat4(b)) => TweenValue::Mat4(a.lerp(b, t)),
        (TweenValue::Quat(a), TweenValue::Quat(b)) => TweenValue::Quat(a.slerp(b, t)),
        _ => *from,
    }
}

/// Endpoints, last evaluated value and output of a value tween
pub(crate) struct ValueTrack {
    pub from: TweenValue,
    pub to: TweenValue,
    pub current: TweenValue,
    pub lerp: LerpFn,
    pub sink: Option<ValueSink>,
}

impl ValueTrack {
    pub fn new(from: TweenValue, to: TweenValue) -> Self {
        Self {
            from,
            to,
            current: from,
            lerp: default_lerp,
            sink: None,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.from.same_kind(&self.to)
    }

    /// Evaluate at eased time `t`, swapping endpoints on yoyo return passes,
    /// and push the result to the sink.
    pub fn evaluate(&mut self, t: f32, switched: bool) -> Result<(), CallbackFault> {
        let (from, to) = if switched {
            (&self.to, &self.from)
        } else {
            (&self.from, &self.to)
        };
        let lerp = self.lerp;
        self.current = guard(|| Ok(lerp(from, to, t)))?;

        if let Some(sink) = self.sink.as_mut() {
            let current = &self.current;
            guard(|| sink(current))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lerp_float() {
        let v = default_lerp(&TweenValue::Float(0.0), &TweenValue::Float(8.0), 0.25);
        assert_eq!(v.as_float(), Some(2.0));
    }

    #[test]
    fn test_default_lerp_mismatch_returns_from() {
        let from = TweenValue::Float(3.0);
        let to = TweenValue::Vec2(Vec2::ONE);
        assert_eq!(default_lerp(&from, &to, 0.5), from);
        assert!(!ValueTrack::new(from, to).is_consistent());
    }

    #[test]
    fn test_track_yoyo_swaps_endpoints() {
        let mut track = ValueTrack::new(0.0_f32.into(), 10.0_f32.into());

        track.evaluate(0.25, false).unwrap();
        assert_eq!(track.current.as_float(), Some(2.5));

        track.evaluate(0.25, true).unwrap();
        assert_eq!(track.current.as_float(), Some(7.5));
    }

    #[test]
    fn test_track_sink_fault() {
        let mut track = ValueTrack::new(0.0_f32.into(), 1.0_f32.into());
        track.sink = Some(Box::new(|_: &TweenValue| -> anyhow::Result<()> {
            anyhow::bail!("target dropped")
        }));

        let fault = track.evaluate(0.5, false).unwrap_err();
        assert!(fault.to_string().contains("target dropped"));
    }

    #[test]
    fn test_custom_lerp() {
        fn snap(from: &TweenValue, to: &TweenValue, t: f32) -> TweenValue {
            if t < 1.0 {
                *from
            } else {
                *to
            }
        }

        let mut track = ValueTrack::new(1.0_f32.into(), 2.0_f32.into());
        track.lerp = snap;
        track.evaluate(0.9, false).unwrap();
        assert_eq!(track.current.as_float(), Some(1.0));
        track.evaluate(1.0, false).unwrap();
        assert_eq!(track.current.as_float(), Some(2.0));
    }
}
