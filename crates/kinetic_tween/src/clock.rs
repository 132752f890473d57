//! Tick sources
//!
//! The scheduler does not own a frame loop. A [`TickSource`] tells it how
//! much time passed and how time is scaled; the host calls
//! [`Scheduler::on_variable_tick`](crate::Scheduler::on_variable_tick) and
//! [`Scheduler::on_fixed_tick`](crate::Scheduler::on_fixed_tick) from its own
//! loop.
//!
//! Two sources ship with the crate:
//!
//! - [`ManualClock`]: deltas set by the caller (tests, offline stepping,
//!   hosts that already measure frame time)
//! - [`FrameClock`]: measures wall-clock time between variable ticks

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::timing::TickChannel;

/// Host timing as seen by the scheduler
pub trait TickSource {
    /// Number of ticks fired so far (both channels)
    fn tick_count(&self) -> u64;

    /// Unscaled seconds since the previous variable tick
    fn delta_time(&self) -> f32;

    /// Unscaled seconds per fixed step
    fn fixed_delta_time(&self) -> f32;

    /// Global time scale applied to tweens that do not ignore it
    fn time_scale(&self) -> f32;

    /// Whether this source drives the fixed channel at all
    fn supports_fixed_tick(&self) -> bool;

    /// Called by the scheduler at the start of each tick of `channel`
    fn begin_tick(&mut self, _channel: TickChannel) {}
}

/// Settings for [`FrameClock`]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Seconds per fixed step; 0 disables the fixed channel
    pub fixed_delta: f32,
    /// Upper bound on a single variable delta (stalls, debugger breaks)
    pub max_delta: f32,
    pub time_scale: f32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fixed_delta: 1.0 / 60.0,
            max_delta: 0.25,
            time_scale: 1.0,
        }
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

#[derive(Debug)]
struct ManualState {
    ticks: Cell<u64>,
    delta: Cell<f32>,
    fixed_delta: Cell<f32>,
    time_scale: Cell<f32>,
    supports_fixed: Cell<bool>,
}

/// Deterministic tick source
///
/// Clones share state, so a test can keep a clone to adjust deltas after
/// binding another clone to the scheduler.
///
/// ```rust
/// use kinetic_tween::{ManualClock, Scheduler, TickSource};
///
/// let clock = ManualClock::new(1.0 / 60.0);
/// let mut scheduler = Scheduler::with_tick_source(clock.clone());
///
/// clock.set_delta(0.5);
/// scheduler.on_variable_tick();
/// assert_eq!(clock.tick_count(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Rc<ManualState>,
}

impl ManualClock {
    pub fn new(delta: f32) -> Self {
        Self {
            state: Rc::new(ManualState {
                ticks: Cell::new(0),
                delta: Cell::new(delta),
                fixed_delta: Cell::new(delta),
                time_scale: Cell::new(1.0),
                supports_fixed: Cell::new(true),
            }),
        }
    }

    pub fn set_delta(&self, delta: f32) {
        self.state.delta.set(delta);
    }

    pub fn set_fixed_delta(&self, delta: f32) {
        self.state.fixed_delta.set(delta);
    }

    pub fn set_time_scale(&self, scale: f32) {
        self.state.time_scale.set(scale);
    }

    pub fn set_supports_fixed_tick(&self, supported: bool) {
        self.state.supports_fixed.set(supported);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1.0 / 60.0)
    }
}

impl TickSource for ManualClock {
    fn tick_count(&self) -> u64 {
        self.state.ticks.get()
    }

    fn delta_time(&self) -> f32 {
        self.state.delta.get()
    }

    fn fixed_delta_time(&self) -> f32 {
        self.state.fixed_delta.get()
    }

    fn time_scale(&self) -> f32 {
        self.state.time_scale.get()
    }

    fn supports_fixed_tick(&self) -> bool {
        self.state.supports_fixed.get()
    }

    fn begin_tick(&mut self, _channel: TickChannel) {
        self.state.ticks.set(self.state.ticks.get() + 1);
    }
}

// ============================================================================
// Frame Clock
// ============================================================================

/// Wall-clock tick source
///
/// The variable delta is the time elapsed since the previous variable tick,
/// clamped to `max_delta`. The first tick after creation measures from
/// construction time.
#[derive(Debug)]
pub struct FrameClock {
    config: ClockConfig,
    last_frame: Instant,
    delta: f32,
    ticks: u64,
}

impl FrameClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            last_frame: Instant::now(),
            delta: 0.0,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.config.time_scale = scale;
    }

    /// Restart delta measurement from now, e.g. after the host was suspended
    pub fn resync(&mut self) {
        self.last_frame = Instant::now();
    }

    fn sample(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_frame);
        let max = Duration::from_secs_f32(self.config.max_delta.max(0.0));
        self.delta = elapsed.min(max).as_secs_f32();
        self.last_frame = now;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl TickSource for FrameClock {
    fn tick_count(&self) -> u64 {
        self.ticks
    }

    fn delta_time(&self) -> f32 {
        self.delta
    }

    fn fixed_delta_time(&self) -> f32 {
        self.config.fixed_delta
    }

    fn time_scale(&self) -> f32 {
        self.config.time_scale
    }

    fn supports_fixed_tick(&self) -> bool {
        self.config.fixed_delta > 0.0
    }

    fn begin_tick(&mut self, channel: TickChannel) {
        self.ticks += 1;
        if channel == TickChannel::Variable {
            self.sample(Instant::now());
        }
    }
}
