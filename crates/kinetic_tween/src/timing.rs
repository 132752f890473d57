//! Author-set timing parameters
//!
//! [`TweenTiming`] is plain data: it can be built in code, or deserialized
//! from a TOML preset:
//!
//! ```rust
//! use kinetic_tween::{LoopType, TweenTiming};
//!
//! let timing = TweenTiming::from_toml_str(
//!     r#"
//!     duration = 0.4
//!     delay = 0.1
//!     loop_count = 2
//!     loop_type = "yoyo"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(timing.loop_type, LoopType::Yoyo);
//! assert_eq!(timing.speed, 1.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, TweenError};

/// What happens at a loop boundary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    /// Every pass runs from start value to end value
    #[default]
    Reset,
    /// Every pass runs in the opposite direction of the previous one
    Yoyo,
}

/// Which host tick drives a tween
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickChannel {
    /// Once per rendered frame, variable delta time
    #[default]
    Variable,
    /// Once per fixed-rate step
    Fixed,
}

/// Timing parameters of a tween
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweenTiming {
    /// Seconds of active animation per pass
    pub duration: f32,
    /// Seconds to wait before the first evaluation
    pub delay: f32,
    /// 0 plays once, n > 0 repeats n more times, negative repeats forever
    pub loop_count: i32,
    pub loop_type: LoopType,
    /// Multiplier on elapsed time accumulation
    pub speed: f32,
    /// Use unscaled delta time, ignoring the host time scale
    pub ignore_time_scale: bool,
    pub tick_affinity: TickChannel,
}

impl Default for TweenTiming {
    fn default() -> Self {
        Self {
            duration: 1.0,
            delay: 0.0,
            loop_count: 0,
            loop_type: LoopType::Reset,
            speed: 1.0,
            ignore_time_scale: false,
            tick_affinity: TickChannel::Variable,
        }
    }
}

impl TweenTiming {
    /// Timing with the given duration and defaults elsewhere
    pub fn with_duration(duration: f32) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    /// Parse a TOML preset; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let timing: TweenTiming = toml::from_str(source)?;
        timing.validate()?;
        Ok(timing)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(TweenError::InvalidTiming(format!(
                "duration must be finite and >= 0, got {}",
                self.duration
            )));
        }
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(TweenError::InvalidTiming(format!(
                "delay must be finite and >= 0, got {}",
                self.delay
            )));
        }
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(TweenError::InvalidTiming(format!(
                "speed must be finite and >= 0, got {}",
                self.speed
            )));
        }
        Ok(())
    }

    pub fn is_infinite(&self) -> bool {
        self.loop_count < 0
    }

    /// Number of passes counted for scheduling; infinite loops count as one
    pub fn scheduled_passes(&self) -> i32 {
        (self.loop_count + 1).max(1)
    }

    /// Time this tween occupies inside a sequence group:
    /// `duration * max(loop_count + 1, 1) + delay`
    pub fn scheduled_span(&self) -> f32 {
        self.duration * self.scheduled_passes() as f32 + self.delay
    }
}
