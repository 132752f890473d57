//! Tween data and construction
//!
//! A tween lives in the scheduler's arena and is addressed by a [`TweenId`].
//! Build one with [`TweenBuilder`] and hand it to the scheduler:
//!
//! ```rust
//! use kinetic_tween::{Easing, LoopType, Scheduler, TweenBuilder};
//!
//! let mut scheduler = Scheduler::new();
//! let fade = TweenBuilder::float(0.0, 1.0)
//!     .duration(0.3)
//!     .easing(Easing::EaseOutCubic)
//!     .loops(1, LoopType::Yoyo)
//!     .label("fade")
//!     .spawn(&mut scheduler);
//!
//! assert!(scheduler.contains(fade));
//! ```

use slotmap::new_key_type;

use crate::easing::Easing;
use crate::events::{EventHandlers, TickCondition, TickDirective, TweenEvent};
use crate::scheduler::Scheduler;
use crate::sequence::Sequence;
use crate::timing::{LoopType, TickChannel, TweenTiming};
use crate::value::{LerpFn, TweenValue, ValueTrack};

new_key_type! {
    /// Handle to a tween owned by a [`Scheduler`]
    pub struct TweenId;
}

/// Lifecycle state of a tween
///
/// `Idle → Delaying → Active → Completed`, with loop boundaries going back to
/// `Active`. `Paused` and `Stopped` are reachable from any non-terminal
/// state. `Completed` and `Stopped` are terminal until the tween is reset or
/// played again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TweenPhase {
    #[default]
    Idle,
    Delaying,
    Active,
    Paused,
    Completed,
    Stopped,
}

impl TweenPhase {
    pub fn is_playing(self) -> bool {
        matches!(self, TweenPhase::Delaying | TweenPhase::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TweenPhase::Completed | TweenPhase::Stopped)
    }
}

/// Progress counters, mutated every tick
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Progress {
    /// Fraction of the delay consumed, 0.0 to 1.0
    pub delay_elapsed: f32,
    /// Fraction of the current pass consumed, 0.0 to 1.0
    pub current_elapsed: f32,
    /// Completed loop passes
    pub loops_elapsed: u32,
    /// Yoyo direction: start and end values are swapped for this pass
    pub values_switched: bool,
}

/// Why a tween stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// The final pass reached the end; fires `End` then `Stop`
    Completed,
    /// `stop()` or a tick condition; fires `Stop`
    Cancelled,
    /// Invalid tween detected by the scheduler; fires `Stop`
    Invalid,
    /// A user callback failed; fires nothing further
    Faulted,
}

/// What a tween drives when evaluated
pub(crate) enum TweenBody {
    Value(ValueTrack),
    /// Pure wait, nothing is evaluated
    Interval,
    Sequence(Sequence),
}

impl TweenBody {
    pub fn kind(&self) -> &'static str {
        match self {
            TweenBody::Value(track) => track.from.kind(),
            TweenBody::Interval => "interval",
            TweenBody::Sequence(_) => "sequence",
        }
    }
}

/// Arena entry of a tween
pub(crate) struct TweenState {
    pub owner_key: i32,
    pub label: Option<String>,
    pub timing: TweenTiming,
    pub easing: Easing,
    pub progress: Progress,
    pub phase: TweenPhase,
    pub valid: bool,
    pub body: TweenBody,
    pub handlers: EventHandlers,
    pub tick_condition: Option<TickCondition>,
    /// Sequence this tween was appended or joined into (non-owning)
    pub parent: Option<TweenId>,
}

impl TweenState {
    pub fn is_sequence(&self) -> bool {
        matches!(self.body, TweenBody::Sequence(_))
    }

    pub fn sequence(&self) -> Option<&Sequence> {
        match &self.body {
            TweenBody::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn sequence_mut(&mut self) -> Option<&mut Sequence> {
        match &mut self.body {
            TweenBody::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// Zero all progress counters and the yoyo direction
    pub fn reset_progress(&mut self) {
        self.progress = Progress::default();
        if let Some(seq) = self.sequence_mut() {
            seq.rewind();
        }
    }
}

/// Builder for a tween
///
/// Unset timing fields keep the [`TweenTiming`] defaults (1 second, no
/// delay, no loops, variable tick).
pub struct TweenBuilder {
    timing: TweenTiming,
    easing: Easing,
    owner_key: i32,
    label: Option<String>,
    body: TweenBody,
    handlers: Vec<(TweenEvent, crate::events::Handler)>,
    tick_condition: Option<TickCondition>,
}

impl TweenBuilder {
    fn with_body(body: TweenBody) -> Self {
        Self {
            timing: TweenTiming::default(),
            easing: Easing::Linear,
            owner_key: 0,
            label: None,
            body,
            handlers: Vec::new(),
            tick_condition: None,
        }
    }

    /// Tween between two values of the same kind
    pub fn new(from: impl Into<TweenValue>, to: impl Into<TweenValue>) -> Self {
        Self::with_body(TweenBody::Value(ValueTrack::new(from.into(), to.into())))
    }

    /// Tween between two scalars
    pub fn float(from: f32, to: f32) -> Self {
        Self::new(from, to)
    }

    /// A wait of `duration` seconds that evaluates nothing
    pub fn interval(duration: f32) -> Self {
        Self::with_body(TweenBody::Interval).duration(duration)
    }

    /// An empty sequence; fill it with [`Scheduler::append`] and friends.
    /// Its duration is derived from its children.
    pub fn sequence() -> Self {
        Self::with_body(TweenBody::Sequence(Sequence::default()))
    }

    pub fn timing(mut self, timing: TweenTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn duration(mut self, seconds: f32) -> Self {
        self.timing.duration = seconds;
        self
    }

    pub fn delay(mut self, seconds: f32) -> Self {
        self.timing.delay = seconds;
        self
    }

    /// Repeat `count` more times (negative for forever)
    pub fn loops(mut self, count: i32, loop_type: LoopType) -> Self {
        self.timing.loop_count = count;
        self.timing.loop_type = loop_type;
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.timing.speed = speed;
        self
    }

    pub fn ignore_time_scale(mut self, ignore: bool) -> Self {
        self.timing.ignore_time_scale = ignore;
        self
    }

    pub fn tick_affinity(mut self, channel: TickChannel) -> Self {
        self.timing.tick_affinity = channel;
        self
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// External owner key used by [`Scheduler::find_by_key`]; 0 means none
    pub fn owner_key(mut self, key: i32) -> Self {
        self.owner_key = key;
        self
    }

    /// Name shown in log output
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Replace the interpolation function. Ignored for intervals and sequences.
    pub fn lerp(mut self, lerp: LerpFn) -> Self {
        if let TweenBody::Value(track) = &mut self.body {
            track.lerp = lerp;
        }
        self
    }

    /// Receive each evaluated value. Ignored for intervals and sequences.
    pub fn on_update<F>(mut self, sink: F) -> Self
    where
        F: FnMut(&TweenValue) -> anyhow::Result<()> + 'static,
    {
        if let TweenBody::Value(track) = &mut self.body {
            track.sink = Some(Box::new(sink));
        }
        self
    }

    /// Register a lifecycle handler
    pub fn on<F>(mut self, event: TweenEvent, handler: F) -> Self
    where
        F: FnMut(&mut Scheduler, TweenId) -> anyhow::Result<()> + 'static,
    {
        self.handlers.push((event, Box::new(handler)));
        self
    }

    pub fn tick_condition<F>(mut self, condition: F) -> Self
    where
        F: FnMut(&mut Scheduler, TweenId) -> anyhow::Result<TickDirective> + 'static,
    {
        self.tick_condition = Some(Box::new(condition));
        self
    }

    /// Hand the tween to `scheduler`. The tween starts idle.
    pub fn spawn(self, scheduler: &mut Scheduler) -> TweenId {
        scheduler.create(self)
    }

    /// Split into the arena entry and the handlers still to be registered
    pub(crate) fn into_parts(self) -> (TweenState, Vec<(TweenEvent, crate::events::Handler)>) {
        let valid = match &self.body {
            TweenBody::Value(track) => track.is_consistent(),
            _ => true,
        } && self.timing.validate().is_ok();

        let state = TweenState {
            owner_key: self.owner_key,
            label: self.label,
            timing: self.timing,
            easing: self.easing,
            progress: Progress::default(),
            phase: TweenPhase::Idle,
            valid,
            body: self.body,
            handlers: EventHandlers::default(),
            tick_condition: self.tick_condition,
            parent: None,
        };
        (state, self.handlers)
    }
}
