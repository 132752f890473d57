//! Tween scheduler
//!
//! Owns every tween created through it and drives the active ones once per
//! host tick. Tweens are stored in an arena keyed by [`TweenId`]; the
//! registry of active tweens is a separate list of ids that never owns
//! anything. A tween stays in the arena until [`Scheduler::remove`] is
//! called, however many times it is played and stopped.
//!
//! # Ticking
//!
//! ```rust
//! use kinetic_tween::{ManualClock, Scheduler, TweenBuilder, TweenPhase};
//!
//! let clock = ManualClock::new(0.5);
//! let mut scheduler = Scheduler::with_tick_source(clock.clone());
//!
//! let tween = TweenBuilder::float(0.0, 10.0).duration(1.0).spawn(&mut scheduler);
//! scheduler.play(tween).unwrap();
//!
//! scheduler.on_variable_tick(); // delay phase, 0.5s carried over
//! scheduler.on_variable_tick(); // evaluates at t = 0.5, reaches the end
//! assert_eq!(scheduler.phase(tween), Some(TweenPhase::Completed));
//! assert_eq!(scheduler.value(tween).and_then(|v| v.as_float()), Some(10.0));
//! ```
//!
//! # Faults
//!
//! User callbacks run inside the tick. An error or panic from one of them
//! is logged and stops only the tween it belongs to; the tick carries on
//! with the remaining tweens.

use rustc_hash::FxHashSet;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::clock::TickSource;
use crate::easing::Easing;
use crate::error::{Result, TweenError};
use crate::events::{guard, CallbackFault, HandlerId, TickDirective, TweenEvent};
use crate::timing::{LoopType, TickChannel, TweenTiming};
use crate::tween::{Progress, StopReason, TweenBody, TweenBuilder, TweenId, TweenPhase, TweenState};
use crate::value::TweenValue;

/// The tween scheduler
pub struct Scheduler {
    pub(crate) tweens: SlotMap<TweenId, TweenState>,
    /// Active tweens in registration order
    registry: Vec<TweenId>,
    registered: FxHashSet<TweenId>,
    tick_source: Option<Box<dyn TickSource>>,
    next_handler: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tweens: SlotMap::with_key(),
            registry: Vec::new(),
            registered: FxHashSet::default(),
            tick_source: None,
            next_handler: 0,
        }
    }

    pub fn with_tick_source(source: impl TickSource + 'static) -> Self {
        let mut scheduler = Self::new();
        scheduler.bind_tick_source(source);
        scheduler
    }

    // =========================================================================
    // Tick Source Binding
    // =========================================================================

    /// Bind the host tick source, replacing any previous one
    pub fn bind_tick_source(&mut self, source: impl TickSource + 'static) {
        if self.tick_source.is_some() {
            tracing::debug!("Scheduler: replacing bound tick source");
        }
        self.tick_source = Some(Box::new(source));
    }

    pub fn unbind_tick_source(&mut self) -> Option<Box<dyn TickSource>> {
        self.tick_source.take()
    }

    pub fn tick_source(&self) -> Option<&dyn TickSource> {
        self.tick_source.as_deref()
    }

    // =========================================================================
    // Arena
    // =========================================================================

    /// Take ownership of a built tween. It starts idle and unregistered.
    pub fn create(&mut self, builder: TweenBuilder) -> TweenId {
        let (state, handlers) = builder.into_parts();
        let valid = state.valid;
        let id = self.tweens.insert(state);

        for (event, handler) in handlers {
            let handler_id = self.next_handler_id();
            self.tweens[id].handlers.add(event, handler_id, handler);
        }

        if !valid {
            tracing::warn!(
                tween = %self.describe(id),
                "created an invalid tween; it will be rejected when ticked"
            );
        }
        id
    }

    /// Cancel a tween, detach it from any sequence and free it.
    ///
    /// Returns `false` if the id was already gone.
    pub fn remove(&mut self, id: TweenId) -> bool {
        if !self.tweens.contains_key(id) {
            return false;
        }

        self.stop_with(id, StopReason::Cancelled);

        if let Some(parent) = self.tweens.get(id).and_then(|s| s.parent) {
            self.detach_child(parent, id);
        }
        let children = self.child_ids(id);
        for child in children {
            if let Some(state) = self.tweens.get_mut(child) {
                state.parent = None;
            }
        }

        self.unregister(id);
        self.tweens.remove(id);
        true
    }

    pub fn contains(&self, id: TweenId) -> bool {
        self.tweens.contains_key(id)
    }

    /// Number of tweens owned by the scheduler
    pub fn len(&self) -> usize {
        self.tweens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweens.is_empty()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Add a tween to the active registry. Registering twice is a no-op.
    pub fn register(&mut self, id: TweenId) {
        if !self.tweens.contains_key(id) {
            tracing::warn!(?id, "register() on an unknown tween");
            return;
        }
        if self.registered.insert(id) {
            self.registry.push(id);
        }
    }

    /// Remove a tween from the active registry. Absent ids are ignored.
    pub fn unregister(&mut self, id: TweenId) {
        if self.registered.remove(&id) {
            if let Some(pos) = self.registry.iter().position(|&r| r == id) {
                self.registry.remove(pos);
            }
        }
    }

    pub fn is_registered(&self, id: TweenId) -> bool {
        self.registered.contains(&id)
    }

    /// Active tweens in registry order
    pub fn registered(&self) -> &[TweenId] {
        &self.registry
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// First registered tween with the given owner key.
    ///
    /// Owner keys are assigned externally and need not be unique.
    pub fn find_by_key(&self, key: i32) -> Option<TweenId> {
        self.registry
            .iter()
            .copied()
            .find(|&id| self.tweens.get(id).is_some_and(|s| s.owner_key == key))
    }

    /// Every registered tween with the given owner key, in registry order
    pub fn find_all_by_key(&self, key: i32) -> Vec<TweenId> {
        self.registry
            .iter()
            .copied()
            .filter(|&id| self.tweens.get(id).is_some_and(|s| s.owner_key == key))
            .collect()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn phase(&self, id: TweenId) -> Option<TweenPhase> {
        self.tweens.get(id).map(|s| s.phase)
    }

    pub fn is_playing(&self, id: TweenId) -> bool {
        self.tweens.get(id).is_some_and(|s| s.phase.is_playing())
    }

    pub fn is_valid(&self, id: TweenId) -> bool {
        self.tweens.get(id).is_some_and(|s| self.check_valid(s))
    }

    pub fn progress(&self, id: TweenId) -> Option<Progress> {
        self.tweens.get(id).map(|s| s.progress)
    }

    /// Last evaluated value of a value tween
    pub fn value(&self, id: TweenId) -> Option<TweenValue> {
        match &self.tweens.get(id)?.body {
            TweenBody::Value(track) => Some(track.current),
            _ => None,
        }
    }

    pub fn timing(&self, id: TweenId) -> Option<TweenTiming> {
        self.tweens.get(id).map(|s| s.timing)
    }

    pub fn owner_key(&self, id: TweenId) -> Option<i32> {
        self.tweens.get(id).map(|s| s.owner_key)
    }

    pub fn label(&self, id: TweenId) -> Option<&str> {
        self.tweens.get(id)?.label.as_deref()
    }

    /// Sequence the tween was appended or joined into
    pub fn parent(&self, id: TweenId) -> Option<TweenId> {
        self.tweens.get(id)?.parent
    }

    /// Seconds of one pass. For sequences this is the sum of their groups.
    pub fn duration(&mut self, id: TweenId) -> Option<f32> {
        self.tweens.contains_key(id).then(|| self.effective_duration(id))
    }

    /// Human-readable description used in log output
    pub fn describe(&self, id: TweenId) -> String {
        match self.tweens.get(id) {
            Some(state) => {
                let mut out = String::new();
                if let Some(label) = &state.label {
                    out.push_str(&format!("'{label}' "));
                }
                out.push_str(&format!("{} tween {id:?}", state.body.kind()));
                if state.owner_key != 0 {
                    out.push_str(&format!(" key={}", state.owner_key));
                }
                out
            }
            None => format!("removed tween {id:?}"),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace the timing of a tween.
    ///
    /// If the tween belongs to a sequence, the sequence's cached duration for
    /// the tween's group is dropped.
    pub fn set_timing(&mut self, id: TweenId, timing: TweenTiming) -> Result<()> {
        timing.validate()?;
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.timing = timing;
        if let Some(parent) = state.parent {
            self.invalidate_membership(parent, id);
        }
        Ok(())
    }

    pub fn set_easing(&mut self, id: TweenId, easing: Easing) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.easing = easing;
        Ok(())
    }

    pub fn set_owner_key(&mut self, id: TweenId, key: i32) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.owner_key = key;
        Ok(())
    }

    /// Mark a tween invalid. A registered invalid tween is removed from the
    /// registry and stopped on its next tick.
    pub fn invalidate(&mut self, id: TweenId) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.valid = false;
        Ok(())
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Register a lifecycle handler; handlers fire in registration order.
    ///
    /// A handler that causes the same event on the same tween (a stop
    /// handler that replays and stops its tween, say) does not recurse: the
    /// nested emission fires after the current handlers have all run.
    pub fn on<F>(&mut self, id: TweenId, event: TweenEvent, handler: F) -> Result<HandlerId>
    where
        F: FnMut(&mut Scheduler, TweenId) -> anyhow::Result<()> + 'static,
    {
        if !self.tweens.contains_key(id) {
            return Err(TweenError::UnknownTween(id));
        }
        let handler_id = self.next_handler_id();
        self.tweens[id]
            .handlers
            .add(event, handler_id, Box::new(handler));
        Ok(handler_id)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&mut self, id: TweenId, event: TweenEvent, handler: HandlerId) -> bool {
        self.tweens
            .get_mut(id)
            .is_some_and(|s| s.handlers.remove(event, handler))
    }

    pub fn handler_count(&self, id: TweenId, event: TweenEvent) -> usize {
        self.tweens.get(id).map_or(0, |s| s.handlers.count(event))
    }

    pub fn set_tick_condition<F>(&mut self, id: TweenId, condition: F) -> Result<()>
    where
        F: FnMut(&mut Scheduler, TweenId) -> anyhow::Result<TickDirective> + 'static,
    {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.tick_condition = Some(Box::new(condition));
        Ok(())
    }

    pub fn clear_tick_condition(&mut self, id: TweenId) {
        if let Some(state) = self.tweens.get_mut(id) {
            state.tick_condition = None;
        }
    }

    fn next_handler_id(&mut self) -> HandlerId {
        self.next_handler += 1;
        HandlerId(self.next_handler)
    }

    /// Fire every handler of `event`, stopping at the first fault. Emissions
    /// of the same event made by those handlers run after them, in order.
    pub(crate) fn emit(&mut self, id: TweenId, event: TweenEvent) -> std::result::Result<(), CallbackFault> {
        loop {
            let Some(mut taken) = self.tweens.get_mut(id).and_then(|s| s.handlers.take(event)) else {
                return Ok(());
            };

            let mut outcome = Ok(());
            for (_, handler) in taken.iter_mut() {
                if let Err(fault) = guard(|| handler(self, id)) {
                    outcome = Err(fault);
                    break;
                }
            }

            let Some(state) = self.tweens.get_mut(id) else {
                return outcome;
            };
            state.handlers.restore(event, taken);
            if outcome.is_err() {
                state.handlers.discard_deferred(event);
                return outcome;
            }
            if !state.handlers.take_deferred(event) {
                return Ok(());
            }
        }
    }

    fn run_tick_condition(&mut self, id: TweenId) -> Option<std::result::Result<TickDirective, CallbackFault>> {
        let mut condition = self.tweens.get_mut(id)?.tick_condition.take()?;
        let result = guard(|| condition(self, id));

        if let Some(state) = self.tweens.get_mut(id) {
            if state.tick_condition.is_none() {
                state.tick_condition = Some(condition);
            }
        }
        Some(result)
    }

    fn report_fault(&self, id: TweenId, source: &str, fault: &CallbackFault) {
        tracing::error!(
            tween = %self.describe(id),
            source,
            error = %fault,
            "tween callback failed"
        );
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a tween.
    ///
    /// - idle: starts from zero
    /// - playing, completed or stopped: restarts from zero
    /// - paused: resumes where it left off
    ///
    /// Restarting a sequence cancels its children that are still running or
    /// paused. Playing an empty sequence is an error.
    pub fn play(&mut self, id: TweenId) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        if state.sequence().is_some_and(|seq| seq.is_empty()) {
            return Err(TweenError::EmptySequence(id));
        }

        let resuming = state.phase == TweenPhase::Paused;
        let restarting = !resuming && state.phase != TweenPhase::Idle;
        if restarting && state.is_sequence() {
            // Children still out from the previous run are launched again on schedule
            for child in self.child_ids(id) {
                self.stop_with(child, StopReason::Cancelled);
            }
        }

        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        if restarting {
            state.reset_progress();
        }
        state.phase = if state.progress.delay_elapsed < 1.0 {
            TweenPhase::Delaying
        } else {
            TweenPhase::Active
        };
        let is_sequence = state.is_sequence();

        self.register(id);
        tracing::trace!(tween = %self.describe(id), resuming, "play");

        if let Err(fault) = self.emit(id, TweenEvent::Play) {
            self.fail(id, "play", fault);
            return Ok(());
        }

        if resuming && is_sequence {
            for child in self.child_ids(id) {
                if self.phase(child) == Some(TweenPhase::Paused) {
                    self.play(child)?;
                }
            }
        }
        Ok(())
    }

    /// Resume a paused tween. Anything else is left alone with a warning.
    pub fn resume(&mut self, id: TweenId) -> Result<()> {
        match self.phase(id) {
            None => Err(TweenError::UnknownTween(id)),
            Some(TweenPhase::Paused) => self.play(id),
            Some(phase) => {
                tracing::warn!(tween = %self.describe(id), ?phase, "resume() on a tween that is not paused");
                Ok(())
            }
        }
    }

    /// Pause a playing tween, keeping its progress.
    ///
    /// Pausing a tween that is not playing only logs a warning. Pausing a
    /// sequence also pauses its children that are still running.
    pub fn pause(&mut self, id: TweenId) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        if !state.phase.is_playing() {
            let phase = state.phase;
            tracing::warn!(tween = %self.describe(id), ?phase, "pause() on a tween that is not playing");
            return Ok(());
        }

        state.phase = TweenPhase::Paused;
        let is_sequence = state.is_sequence();
        self.unregister(id);

        if let Err(fault) = self.emit(id, TweenEvent::Pause) {
            self.fail(id, "pause", fault);
            return Ok(());
        }

        if is_sequence {
            for child in self.child_ids(id) {
                if self.is_playing(child) {
                    self.pause(child)?;
                }
            }
        }
        Ok(())
    }

    /// Cancel a tween.
    ///
    /// Fires `Stop` (never `End`) and unregisters the tween. Safe to call on
    /// any id: stopping an idle, stopped, completed or removed tween does
    /// nothing. Stopping a sequence also stops its children.
    pub fn stop(&mut self, id: TweenId) {
        self.stop_with(id, StopReason::Cancelled);
    }

    /// Zero the progress counters; timing is untouched.
    ///
    /// A playing tween keeps playing from the start of its delay; a finished
    /// tween becomes idle.
    pub fn reset(&mut self, id: TweenId) -> Result<()> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.reset_progress();
        state.phase = match state.phase {
            TweenPhase::Delaying | TweenPhase::Active => TweenPhase::Delaying,
            TweenPhase::Completed | TweenPhase::Stopped => TweenPhase::Idle,
            phase => phase,
        };
        Ok(())
    }

    pub(crate) fn stop_with(&mut self, id: TweenId, reason: StopReason) {
        let Some(state) = self.tweens.get_mut(id) else {
            self.unregister(id);
            return;
        };
        if state.phase == TweenPhase::Idle || state.phase.is_terminal() {
            self.unregister(id);
            return;
        }

        state.phase = if reason == StopReason::Completed {
            TweenPhase::Completed
        } else {
            TweenPhase::Stopped
        };
        let is_sequence = state.is_sequence();
        self.unregister(id);
        tracing::trace!(tween = %self.describe(id), ?reason, "stop");

        match reason {
            StopReason::Completed => match self.emit(id, TweenEvent::End) {
                Ok(()) => {
                    if let Err(fault) = self.emit(id, TweenEvent::Stop) {
                        self.report_fault(id, "stop", &fault);
                    }
                }
                Err(fault) => self.report_fault(id, "end", &fault),
            },
            StopReason::Cancelled | StopReason::Invalid => {
                if let Err(fault) = self.emit(id, TweenEvent::Stop) {
                    self.report_fault(id, "stop", &fault);
                }
            }
            StopReason::Faulted => {}
        }

        // A sequence that ran to its end leaves its children to finish on their own
        if is_sequence && reason != StopReason::Completed {
            for child in self.child_ids(id) {
                self.stop_with(child, StopReason::Cancelled);
            }
        }
    }

    /// Resolve a user-callback fault: log it and stop without further callbacks
    fn fail(&mut self, id: TweenId, source: &str, fault: CallbackFault) {
        self.report_fault(id, source, &fault);
        self.stop_with(id, StopReason::Faulted);
    }

    /// Stop every registered tween, last registered first, then clear the
    /// registry.
    pub fn stop_all(&mut self) {
        let mut index = self.registry.len();
        while index > 0 {
            index -= 1;
            let Some(&id) = self.registry.get(index) else {
                // Stopping shrank the registry past this index
                index = self.registry.len();
                continue;
            };
            self.stop_with(id, StopReason::Cancelled);
        }

        // Registered by stop callbacks after their slot was visited
        for id in std::mem::take(&mut self.registry) {
            if let Some(state) = self.tweens.get_mut(id) {
                if state.phase.is_playing() {
                    state.phase = TweenPhase::Stopped;
                }
            }
            tracing::debug!(tween = %self.describe(id), "stop_all: dropped late registration");
        }
        self.registered.clear();
    }

    /// Stop everything and release the tick source. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.stop_all();
        if self.tick_source.take().is_some() {
            tracing::info!("Scheduler: tick source released");
        }
    }

    // =========================================================================
    // Tick Entry Points
    // =========================================================================

    /// Variable-rate tick, once per host frame
    pub fn on_variable_tick(&mut self) {
        self.tick(TickChannel::Variable);
    }

    /// Fixed-rate tick, once per host fixed step
    pub fn on_fixed_tick(&mut self) {
        self.tick(TickChannel::Fixed);
    }

    /// Host exit notification. A full teardown also releases the tick source.
    pub fn on_exit(&mut self, is_full_teardown: bool) {
        tracing::info!(
            is_full_teardown,
            active = self.registry.len(),
            "Scheduler: host exit"
        );
        if is_full_teardown {
            self.teardown();
        } else {
            self.stop_all();
        }
    }

    /// Advance every registered tween whose affinity matches `channel` by
    /// one step.
    ///
    /// Iterates a snapshot of the registry: tweens unregistered during the
    /// tick are skipped, tweens registered during the tick first advance on
    /// the next tick.
    pub fn tick(&mut self, channel: TickChannel) {
        let Some(source) = self.tick_source.as_mut() else {
            tracing::warn!(?channel, "tick with no tick source bound");
            return;
        };
        if channel == TickChannel::Fixed && !source.supports_fixed_tick() {
            tracing::warn!("fixed tick on a tick source without fixed tick support");
            return;
        }

        source.begin_tick(channel);
        let base_delta = match channel {
            TickChannel::Variable => source.delta_time(),
            TickChannel::Fixed => source.fixed_delta_time(),
        };
        let time_scale = source.time_scale();
        let _span = tracing::trace_span!("tween_tick", ?channel, tick = source.tick_count()).entered();

        let snapshot: SmallVec<[TweenId; 32]> = self.registry.iter().copied().collect();
        for id in snapshot {
            if !self.registered.contains(&id) {
                continue;
            }
            let Some(affinity) = self.tweens.get(id).map(|s| s.timing.tick_affinity) else {
                self.unregister(id);
                continue;
            };
            if affinity == channel {
                self.step(id, base_delta, time_scale);
            }
        }
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    fn check_valid(&self, state: &TweenState) -> bool {
        state.valid && !state.sequence().is_some_and(|seq| seq.is_empty())
    }

    pub(crate) fn effective_duration(&mut self, id: TweenId) -> f32 {
        match self.tweens.get(id) {
            Some(state) if state.is_sequence() => self.sequence_total(id),
            Some(state) => state.timing.duration,
            None => 0.0,
        }
    }

    fn is_active(&self, id: TweenId) -> bool {
        self.phase(id) == Some(TweenPhase::Active)
    }

    /// One state transition of a registered tween
    fn step(&mut self, id: TweenId, base_delta: f32, time_scale: f32) {
        let Some(state) = self.tweens.get(id) else {
            return;
        };
        if !self.check_valid(state) {
            tracing::error!(tween = %self.describe(id), "invalid tween removed from the scheduler");
            self.unregister(id);
            self.stop_with(id, StopReason::Invalid);
            return;
        }
        if !state.phase.is_playing() {
            tracing::warn!(tween = %self.describe(id), phase = ?state.phase, "ticked a tween that is not playing");
            self.unregister(id);
            return;
        }

        let duration = self.effective_duration(id);
        if duration <= 0.0 {
            self.complete_instantly(id);
            return;
        }

        match self.run_tick_condition(id) {
            None | Some(Ok(TickDirective::Continue)) => {}
            Some(Ok(TickDirective::SkipTick)) => return,
            Some(Ok(TickDirective::Pause)) => {
                if let Err(err) = self.pause(id) {
                    tracing::error!(tween = %self.describe(id), error = %err, "tick condition failed to pause tween");
                }
                return;
            }
            Some(Ok(TickDirective::Stop)) => {
                self.stop_with(id, StopReason::Cancelled);
                return;
            }
            Some(Err(fault)) => {
                self.report_fault(id, "tick condition", &fault);
                self.stop_with(id, StopReason::Cancelled);
                return;
            }
        }
        if !self.is_playing(id) {
            return;
        }

        let state = &mut self.tweens[id];
        let timing = state.timing;
        let scale = if timing.ignore_time_scale { 1.0 } else { time_scale };
        let delta = base_delta * scale * timing.speed;

        if state.progress.delay_elapsed < 1.0 {
            self.advance_delay(id, delta, duration);
            return;
        }

        if state.progress.current_elapsed < 1.0 {
            let t = state.progress.current_elapsed;
            if let Err(fault) = self.evaluate(id, t) {
                self.fail(id, "evaluate", fault);
                return;
            }
            if let Err(fault) = self.emit(id, TweenEvent::Tick) {
                self.fail(id, "tick", fault);
                return;
            }
            if !self.is_active(id) {
                return;
            }

            let progress = &mut self.tweens[id].progress;
            progress.current_elapsed = (progress.current_elapsed + delta / duration).clamp(0.0, 1.0);
            if progress.current_elapsed < 1.0 {
                return;
            }
        }

        self.finish_pass(id);
    }

    /// Delay phase. Always costs one tick; time left over once the delay is
    /// exhausted is carried into the first pass.
    fn advance_delay(&mut self, id: TweenId, delta: f32, duration: f32) {
        let state = &mut self.tweens[id];
        let delay = state.timing.delay;

        let carry = if delay <= 0.0 {
            state.progress.delay_elapsed = 1.0;
            delta
        } else {
            let raw = state.progress.delay_elapsed + delta / delay;
            state.progress.delay_elapsed = raw.clamp(0.0, 1.0);
            ((raw - 1.0) * delay).max(0.0)
        };

        if state.progress.delay_elapsed < 1.0 {
            return;
        }

        state.phase = TweenPhase::Active;
        state.progress.current_elapsed = (state.progress.current_elapsed + carry / duration).clamp(0.0, 1.0);

        if let Err(fault) = self.emit(id, TweenEvent::Start) {
            self.fail(id, "start", fault);
        }
    }

    /// Zero-length tween: start, land on the end value, complete
    fn complete_instantly(&mut self, id: TweenId) {
        let state = &mut self.tweens[id];
        state.phase = TweenPhase::Active;
        state.progress.delay_elapsed = 1.0;
        state.progress.current_elapsed = 1.0;

        if let Err(fault) = self.emit(id, TweenEvent::Start) {
            self.fail(id, "start", fault);
            return;
        }
        if !self.is_active(id) {
            return;
        }
        if let Err(fault) = self.evaluate(id, 1.0) {
            self.fail(id, "evaluate", fault);
            return;
        }
        self.stop_with(id, StopReason::Completed);
    }

    /// Loop boundary: land exactly on the end value, then either start the
    /// next pass or complete.
    fn finish_pass(&mut self, id: TweenId) {
        if let Err(fault) = self.evaluate(id, 1.0) {
            self.fail(id, "evaluate", fault);
            return;
        }
        if !self.is_active(id) {
            return;
        }

        let state = &mut self.tweens[id];
        let timing = state.timing;
        let more_passes =
            timing.is_infinite() || i64::from(state.progress.loops_elapsed) < i64::from(timing.loop_count);

        if !more_passes {
            self.stop_with(id, StopReason::Completed);
            return;
        }

        if !timing.is_infinite() {
            state.progress.loops_elapsed += 1;
        }
        if let Err(fault) = self.emit(id, TweenEvent::Repeat) {
            self.fail(id, "repeat", fault);
            return;
        }
        if !self.is_active(id) {
            return;
        }

        let state = &mut self.tweens[id];
        state.progress.current_elapsed = 0.0;
        if timing.loop_type == LoopType::Yoyo {
            state.progress.values_switched = !state.progress.values_switched;
        }
        if let Some(seq) = state.sequence_mut() {
            seq.rewind();
        }
        tracing::trace!(tween = %self.describe(id), loops = self.tweens[id].progress.loops_elapsed, "repeat");
    }

    /// Evaluate the tween body at raw time `t`
    fn evaluate(&mut self, id: TweenId, t: f32) -> std::result::Result<(), CallbackFault> {
        if self.tweens.get(id).is_some_and(|s| s.is_sequence()) {
            self.evaluate_sequence(id, t);
            return Ok(());
        }
        let Some(state) = self.tweens.get_mut(id) else {
            return Ok(());
        };
        match &mut state.body {
            TweenBody::Value(track) => {
                // The end of a pass is exact, whatever the easing does at 1.0
                let eased = if t >= 1.0 { 1.0 } else { state.easing.apply(t) };
                track.evaluate(eased, state.progress.values_switched)
            }
            TweenBody::Interval | TweenBody::Sequence(_) => Ok(()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tweens", &self.tweens.len())
            .field("registered", &self.registry.len())
            .field("tick_source", &self.tick_source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn record(scheduler: &mut Scheduler, id: TweenId, log: &Log) {
        for (event, name) in [
            (TweenEvent::Play, "play"),
            (TweenEvent::Start, "start"),
            (TweenEvent::Repeat, "repeat"),
            (TweenEvent::Pause, "pause"),
            (TweenEvent::End, "end"),
            (TweenEvent::Stop, "stop"),
        ] {
            let log = Rc::clone(log);
            scheduler
                .on(id, event, move |_, _| {
                    log.borrow_mut().push(name);
                    Ok(())
                })
                .unwrap();
        }
    }

    fn setup(delta: f32) -> (Scheduler, ManualClock) {
        let clock = ManualClock::new(delta);
        (Scheduler::with_tick_source(clock.clone()), clock)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);

        scheduler.register(id);
        scheduler.register(id);
        assert_eq!(scheduler.active_count(), 1);

        scheduler.unregister(id);
        scheduler.unregister(id);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_play_registers_and_fires_play() {
        let (mut scheduler, _) = setup(0.1);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);

        scheduler.play(id).unwrap();
        assert!(scheduler.is_registered(id));
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Delaying));
        assert_eq!(*log.borrow(), vec!["play"]);
    }

    #[test]
    fn test_delay_costs_a_tick_and_carries_time() {
        let (mut scheduler, _) = setup(0.25);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0)
            .duration(1.0)
            .delay(0.5)
            .spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        let p = scheduler.progress(id).unwrap();
        assert!((p.delay_elapsed - 0.5).abs() < 1e-6);
        assert_eq!(p.current_elapsed, 0.0);

        scheduler.on_variable_tick();
        let p = scheduler.progress(id).unwrap();
        assert_eq!(p.delay_elapsed, 1.0);
        assert_eq!(p.current_elapsed, 0.0);
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Active));
        assert_eq!(*log.borrow(), vec!["play", "start"]);

        // First evaluation happens on the following tick
        assert_eq!(scheduler.value(id).and_then(|v| v.as_float()), Some(0.0));
        scheduler.on_variable_tick();
        assert!((scheduler.progress(id).unwrap().current_elapsed - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_time_scale_and_speed() {
        let (mut scheduler, clock) = setup(0.1);
        clock.set_time_scale(2.0);

        let scaled = TweenBuilder::float(0.0, 1.0).duration(1.0).spawn(&mut scheduler);
        let unscaled = TweenBuilder::float(0.0, 1.0)
            .duration(1.0)
            .ignore_time_scale(true)
            .speed(3.0)
            .spawn(&mut scheduler);
        scheduler.play(scaled).unwrap();
        scheduler.play(unscaled).unwrap();

        clock.set_delta(0.0);
        scheduler.on_variable_tick(); // delay tick, nothing carried
        clock.set_delta(0.1);
        scheduler.on_variable_tick();

        assert!((scheduler.progress(scaled).unwrap().current_elapsed - 0.2).abs() < 1e-6);
        assert!((scheduler.progress(unscaled).unwrap().current_elapsed - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_easing_applies_to_evaluation() {
        let (mut scheduler, clock) = setup(0.0);
        let id = TweenBuilder::float(0.0, 100.0)
            .duration(1.0)
            .easing(Easing::EaseInQuad)
            .spawn(&mut scheduler);
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        clock.set_delta(0.5);
        scheduler.on_variable_tick(); // evaluates at 0.0
        scheduler.on_variable_tick(); // evaluates at 0.5

        let v = scheduler.value(id).and_then(|v| v.as_float()).unwrap();
        assert!((v - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_fixed_affinity_only_advances_on_fixed_tick() {
        let (mut scheduler, clock) = setup(0.5);
        clock.set_fixed_delta(0.25);

        let variable = TweenBuilder::interval(10.0).spawn(&mut scheduler);
        let fixed = TweenBuilder::interval(10.0)
            .tick_affinity(TickChannel::Fixed)
            .spawn(&mut scheduler);
        scheduler.play(variable).unwrap();
        scheduler.play(fixed).unwrap();

        scheduler.on_fixed_tick();
        assert_eq!(scheduler.progress(variable).unwrap().delay_elapsed, 0.0);
        assert_eq!(scheduler.progress(fixed).unwrap().delay_elapsed, 1.0);

        scheduler.on_variable_tick();
        assert_eq!(scheduler.progress(variable).unwrap().delay_elapsed, 1.0);
        assert!((scheduler.progress(fixed).unwrap().current_elapsed - 0.025).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_tick_unsupported_is_ignored() {
        let (mut scheduler, clock) = setup(0.5);
        clock.set_supports_fixed_tick(false);
        let id = TweenBuilder::interval(1.0)
            .tick_affinity(TickChannel::Fixed)
            .spawn(&mut scheduler);
        scheduler.play(id).unwrap();

        scheduler.on_fixed_tick();
        assert_eq!(clock.tick_count(), 0);
        assert_eq!(scheduler.progress(id).unwrap().delay_elapsed, 0.0);
    }

    #[test]
    fn test_tick_without_source_is_noop() {
        let mut scheduler = Scheduler::new();
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        assert_eq!(scheduler.progress(id), Some(Progress::default()));
    }

    #[test]
    fn test_pause_and_resume_keep_progress() {
        let (mut scheduler, _) = setup(0.25);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0).duration(1.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        scheduler.on_variable_tick();
        let before = scheduler.progress(id).unwrap();

        scheduler.pause(id).unwrap();
        assert!(!scheduler.is_registered(id));
        scheduler.on_variable_tick();
        assert_eq!(scheduler.progress(id).unwrap(), before);

        scheduler.resume(id).unwrap();
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Active));
        assert_eq!(scheduler.progress(id).unwrap(), before);
        assert_eq!(*log.borrow(), vec!["play", "start", "pause", "play"]);
    }

    #[test]
    fn test_pause_when_not_playing_only_warns() {
        let (mut scheduler, _) = setup(0.25);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);

        assert!(scheduler.pause(id).is_ok());
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Idle));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_play_while_playing_restarts() {
        let (mut scheduler, _) = setup(0.25);
        let id = TweenBuilder::float(0.0, 1.0).duration(1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();
        scheduler.on_variable_tick();
        scheduler.on_variable_tick();
        assert!(scheduler.progress(id).unwrap().current_elapsed > 0.0);

        scheduler.play(id).unwrap();
        assert_eq!(scheduler.progress(id), Some(Progress::default()));
        assert_eq!(scheduler.active_count(), 1);
    }

    #[test]
    fn test_manual_stop_fires_stop_not_end() {
        let (mut scheduler, _) = setup(0.25);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        scheduler.play(id).unwrap();

        scheduler.stop(id);
        scheduler.stop(id);
        assert_eq!(*log.borrow(), vec!["play", "stop"]);
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Stopped));
        assert!(!scheduler.is_registered(id));
    }

    #[test]
    fn test_reset_finished_tween_goes_idle() {
        let (mut scheduler, _) = setup(1.0);
        let id = TweenBuilder::float(0.0, 1.0).duration(1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();
        scheduler.on_variable_tick();
        scheduler.on_variable_tick();
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Completed));

        scheduler.reset(id).unwrap();
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Idle));
        assert_eq!(scheduler.progress(id), Some(Progress::default()));
        assert_eq!(scheduler.timing(id).unwrap().duration, 1.0);
    }

    #[test]
    fn test_instant_tween_completes_on_first_tick() {
        let (mut scheduler, _) = setup(0.1);
        let log = Log::default();
        let id = TweenBuilder::float(3.0, 7.0).duration(0.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        assert_eq!(scheduler.value(id).and_then(|v| v.as_float()), Some(7.0));
        assert_eq!(*log.borrow(), vec!["play", "start", "end", "stop"]);
        assert!(!scheduler.is_registered(id));
    }

    #[test]
    fn test_invalid_tween_is_rejected() {
        let (mut scheduler, _) = setup(0.1);
        let log = Log::default();
        let id = TweenBuilder::new(0.0_f32, kinetic_core::Vec2::ONE).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        assert!(!scheduler.is_valid(id));
        scheduler.play(id).unwrap();

        scheduler.on_variable_tick();
        assert!(!scheduler.is_registered(id));
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Stopped));
        assert_eq!(*log.borrow(), vec!["play", "stop"]);
    }

    #[test]
    fn test_externally_invalidated_tween_is_stopped() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();
        scheduler.invalidate(id).unwrap();

        scheduler.on_variable_tick();
        assert!(!scheduler.is_registered(id));
        assert!(!scheduler.is_playing(id));
    }

    #[test]
    fn test_registered_but_not_playing_is_dropped() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.register(id);

        scheduler.on_variable_tick();
        assert!(!scheduler.is_registered(id));
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Idle));
    }

    #[test]
    fn test_tick_condition_directives() {
        let (mut scheduler, _) = setup(0.1);
        let skip = TweenBuilder::float(0.0, 1.0)
            .tick_condition(|_, _| Ok(TickDirective::SkipTick))
            .spawn(&mut scheduler);
        let pause = TweenBuilder::float(0.0, 1.0)
            .tick_condition(|_, _| Ok(TickDirective::Pause))
            .spawn(&mut scheduler);
        let stop = TweenBuilder::float(0.0, 1.0)
            .tick_condition(|_, _| Ok(TickDirective::Stop))
            .spawn(&mut scheduler);
        let failing = TweenBuilder::float(0.0, 1.0)
            .tick_condition(|_, _| anyhow::bail!("condition lookup failed"))
            .spawn(&mut scheduler);
        for id in [skip, pause, stop, failing] {
            scheduler.play(id).unwrap();
        }

        scheduler.on_variable_tick();
        assert_eq!(scheduler.phase(skip), Some(TweenPhase::Delaying));
        assert_eq!(scheduler.progress(skip), Some(Progress::default()));
        assert!(scheduler.is_registered(skip));
        assert_eq!(scheduler.phase(pause), Some(TweenPhase::Paused));
        assert_eq!(scheduler.phase(stop), Some(TweenPhase::Stopped));
        assert_eq!(scheduler.phase(failing), Some(TweenPhase::Stopped));
        assert_eq!(scheduler.registered(), &[skip]);
    }

    #[test]
    fn test_find_by_key() {
        let (mut scheduler, _) = setup(0.1);
        let a = TweenBuilder::float(0.0, 1.0).owner_key(7).spawn(&mut scheduler);
        let b = TweenBuilder::float(0.0, 1.0).owner_key(7).spawn(&mut scheduler);
        let c = TweenBuilder::float(0.0, 1.0).owner_key(8).spawn(&mut scheduler);

        // Only registered tweens are found
        assert_eq!(scheduler.find_by_key(7), None);

        for id in [b, a, c] {
            scheduler.play(id).unwrap();
        }
        assert_eq!(scheduler.find_by_key(7), Some(b));
        assert_eq!(scheduler.find_all_by_key(7), vec![b, a]);
        assert_eq!(scheduler.find_all_by_key(9), Vec::<TweenId>::new());
    }

    #[test]
    fn test_stop_all_clears_registry() {
        let (mut scheduler, _) = setup(0.1);
        let log = Log::default();
        let ids: Vec<TweenId> = (0..4)
            .map(|_| TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler))
            .collect();
        for &id in &ids {
            record(&mut scheduler, id, &log);
            scheduler.play(id).unwrap();
        }
        log.borrow_mut().clear();

        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(log.borrow().len(), 4);
        assert!(ids.iter().all(|&id| scheduler.phase(id) == Some(TweenPhase::Stopped)));
    }

    #[test]
    fn test_stop_all_tolerates_cascading_stops() {
        let (mut scheduler, _) = setup(0.1);
        let a = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        let b = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        let c = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        // Stopping c also stops a and b, shrinking the registry under the loop
        scheduler
            .on(c, TweenEvent::Stop, move |s, _| {
                s.stop(a);
                s.stop(b);
                Ok(())
            })
            .unwrap();
        for id in [a, b, c] {
            scheduler.play(id).unwrap();
        }

        scheduler.stop_all();
        assert_eq!(scheduler.active_count(), 0);
        assert!([a, b, c].iter().all(|&id| !scheduler.is_playing(id)));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();

        scheduler.teardown();
        assert!(scheduler.tick_source().is_none());
        assert_eq!(scheduler.active_count(), 0);

        scheduler.teardown();
        Scheduler::new().teardown();
    }

    #[test]
    fn test_on_exit() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();

        scheduler.on_exit(false);
        assert!(!scheduler.is_playing(id));
        assert!(scheduler.tick_source().is_some());

        scheduler.on_exit(true);
        assert!(scheduler.tick_source().is_none());
    }

    #[test]
    fn test_remove_frees_slot() {
        let (mut scheduler, _) = setup(0.1);
        let log = Log::default();
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        record(&mut scheduler, id, &log);
        scheduler.play(id).unwrap();

        assert!(scheduler.remove(id));
        assert!(!scheduler.contains(id));
        assert!(!scheduler.is_registered(id));
        assert_eq!(*log.borrow(), vec!["play", "stop"]);
        assert!(!scheduler.remove(id));
        assert!(matches!(scheduler.play(id), Err(TweenError::UnknownTween(_))));
        scheduler.stop(id);
    }

    #[test]
    fn test_handler_removal() {
        let (mut scheduler, _) = setup(0.1);
        let count = Rc::new(RefCell::new(0));
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);

        let counter = Rc::clone(&count);
        let handler = scheduler
            .on(id, TweenEvent::Play, move |_, _| {
                *counter.borrow_mut() += 1;
                Ok(())
            })
            .unwrap();

        scheduler.play(id).unwrap();
        assert!(scheduler.off(id, TweenEvent::Play, handler));
        assert!(!scheduler.off(id, TweenEvent::Play, handler));
        scheduler.play(id).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_same_handler_registered_twice_fires_twice() {
        let (mut scheduler, _) = setup(0.1);
        let count = Rc::new(RefCell::new(0));
        let id = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);

        let bump = {
            let count = Rc::clone(&count);
            move |_: &mut Scheduler, _: TweenId| -> anyhow::Result<()> {
                *count.borrow_mut() += 1;
                Ok(())
            }
        };
        scheduler.on(id, TweenEvent::Play, bump.clone()).unwrap();
        scheduler.on(id, TweenEvent::Play, bump).unwrap();

        scheduler.play(id).unwrap();
        assert_eq!(*count.borrow(), 2);
        assert_eq!(scheduler.handler_count(id, TweenEvent::Play), 2);
    }

    #[test]
    fn test_panicking_start_handler_is_contained() {
        let (mut scheduler, _) = setup(0.1);
        let id = TweenBuilder::float(0.0, 1.0)
            .on(TweenEvent::Start, |_, _| panic!("start handler exploded"))
            .spawn(&mut scheduler);
        let other = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        scheduler.play(id).unwrap();
        scheduler.play(other).unwrap();

        scheduler.on_variable_tick();
        assert_eq!(scheduler.phase(id), Some(TweenPhase::Stopped));
        assert_eq!(scheduler.phase(other), Some(TweenPhase::Active));
    }

    #[test]
    fn test_callback_can_play_new_tween_mid_tick() {
        let (mut scheduler, _) = setup(1.0);
        let follow_up = TweenBuilder::float(0.0, 1.0).spawn(&mut scheduler);
        let first = TweenBuilder::float(0.0, 1.0)
            .duration(1.0)
            .on(TweenEvent::End, move |s, _| {
                s.play(follow_up)?;
                Ok(())
            })
            .spawn(&mut scheduler);
        scheduler.play(first).unwrap();

        scheduler.on_variable_tick();
        scheduler.on_variable_tick();
        assert_eq!(scheduler.phase(first), Some(TweenPhase::Completed));
        // Registered during the tick, not stepped until the next one
        assert_eq!(scheduler.phase(follow_up), Some(TweenPhase::Delaying));
        assert_eq!(scheduler.registered(), &[follow_up]);

        scheduler.on_variable_tick();
        assert_eq!(scheduler.phase(follow_up), Some(TweenPhase::Active));
    }

    #[test]
    fn test_describe() {
        let mut scheduler = Scheduler::new();
        let id = TweenBuilder::float(0.0, 1.0)
            .label("fade")
            .owner_key(12)
            .spawn(&mut scheduler);
        let text = scheduler.describe(id);
        assert!(text.starts_with("'fade' float tween"));
        assert!(text.ends_with("key=12"));
    }
}
