//! Kinetic Tween Engine
//!
//! Tick-driven tweens, loops and priority-grouped sequences.
//!
//! # Features
//!
//! - **Tweens**: delay, duration, speed, reset or yoyo loops, easing
//! - **Typed Values**: floats, vectors, colors, matrices and quaternions with
//!   pluggable lerp functions
//! - **Sequences**: tweens grouped by priority, each group launched once the
//!   previous one has had its time
//! - **Lifecycle Events**: play, start, tick, repeat, pause, end and stop
//!   handlers plus a per-tick condition
//! - **Fault Isolation**: a failing callback stops its own tween and nothing
//!   else
//! - **Tick Sources**: variable and fixed channels, driven by the host
//!
//! The [`Scheduler`] is an ordinary value owned by the host. Nothing in this
//! crate is global.

pub mod clock;
pub mod easing;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod sequence;
pub mod timing;
pub mod tween;
pub mod value;

pub use clock::{ClockConfig, FrameClock, ManualClock, TickSource};
pub use easing::Easing;
pub use error::{Result, TweenError};
pub use events::{Handler, HandlerId, TickCondition, TickDirective, TweenEvent};
pub use scheduler::Scheduler;
pub use timing::{LoopType, TickChannel, TweenTiming};
pub use tween::{Progress, TweenBuilder, TweenId, TweenPhase};
pub use value::{default_lerp, LerpFn, TweenValue, ValueSink};

pub use kinetic_core::{Color, Mat4, Quat, Vec2, Vec3, Vec4};
