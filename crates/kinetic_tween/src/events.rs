//! Lifecycle events and callback dispatch
//!
//! Every tween exposes one multicast registration point per [`TweenEvent`].
//! Handlers fire in registration order; registering the same closure twice
//! makes it fire twice.
//!
//! Handlers receive `&mut Scheduler`, so they may create, play or stop other
//! tweens (or this one) from inside a tick. While an event is being
//! dispatched its handler list is detached from the tween; handlers added or
//! removed during dispatch are merged back once dispatch finishes. Emitting
//! the same event again from inside that dispatch is deferred: it fires once
//! the running dispatch has finished.

use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::scheduler::Scheduler;
use crate::tween::TweenId;

/// Lifecycle events a tween reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TweenEvent {
    /// `play()` was called
    Play,
    /// The delay is exhausted; evaluation begins next
    Start,
    /// After every evaluation of the active phase
    Tick,
    /// A loop boundary was crossed and another pass begins
    Repeat,
    /// `pause()` was called on a playing tween
    Pause,
    /// Natural completion of the final pass
    End,
    /// The tween stopped, naturally or by cancellation
    Stop,
}

impl TweenEvent {
    pub const ALL: [TweenEvent; 7] = [
        TweenEvent::Play,
        TweenEvent::Start,
        TweenEvent::Tick,
        TweenEvent::Repeat,
        TweenEvent::Pause,
        TweenEvent::End,
        TweenEvent::Stop,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Handle returned when registering a handler, used to remove it again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Verdict of a tick-condition callback
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TickDirective {
    /// Proceed with the normal tick
    #[default]
    Continue,
    /// Pause the tween; progress is kept
    Pause,
    /// Do nothing this tick
    SkipTick,
    /// Stop the tween as a cancellation
    Stop,
}

/// Lifecycle event handler
pub type Handler = Box<dyn FnMut(&mut Scheduler, TweenId) -> anyhow::Result<()>>;

/// Per-tick gate evaluated before a tween advances
pub type TickCondition = Box<dyn FnMut(&mut Scheduler, TweenId) -> anyhow::Result<TickDirective>>;

pub(crate) type HandlerList = SmallVec<[(HandlerId, Handler); 2]>;

/// Handler lists of one tween, indexed by event
#[derive(Default)]
pub(crate) struct EventHandlers {
    lists: [HandlerList; 7],
    /// Ids detached for an ongoing dispatch, per event
    in_flight: [Option<SmallVec<[HandlerId; 2]>>; 7],
    /// Removals requested for handlers that were in flight
    removed: SmallVec<[(TweenEvent, HandlerId); 2]>,
    /// Emissions that arrived while the same event was in flight
    deferred: [u32; 7],
}

impl EventHandlers {
    pub fn add(&mut self, event: TweenEvent, id: HandlerId, handler: Handler) {
        self.lists[event.index()].push((id, handler));
    }

    pub fn remove(&mut self, event: TweenEvent, id: HandlerId) -> bool {
        let list = &mut self.lists[event.index()];
        if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
            list.remove(pos);
            return true;
        }
        match &self.in_flight[event.index()] {
            Some(ids) if ids.contains(&id) => {
                self.removed.push((event, id));
                true
            }
            _ => false,
        }
    }

    pub fn count(&self, event: TweenEvent) -> usize {
        let idx = event.index();
        let in_flight = self.in_flight[idx].as_ref().map_or(0, |ids| ids.len());
        self.lists[idx].len() + in_flight
    }

    /// Detach the handlers of `event` for dispatch.
    ///
    /// Returns `None` if that event is already being dispatched further up
    /// the stack. The emission is then counted and handed back by
    /// [`take_deferred`](Self::take_deferred) after [`restore`](Self::restore).
    pub fn take(&mut self, event: TweenEvent) -> Option<HandlerList> {
        let idx = event.index();
        if self.in_flight[idx].is_some() {
            self.deferred[idx] += 1;
            return None;
        }
        let taken = std::mem::take(&mut self.lists[idx]);
        self.in_flight[idx] = Some(taken.iter().map(|(id, _)| *id).collect());
        Some(taken)
    }

    /// Reattach dispatched handlers ahead of any registered meanwhile
    pub fn restore(&mut self, event: TweenEvent, mut taken: HandlerList) {
        let idx = event.index();
        self.in_flight[idx] = None;

        if !self.removed.is_empty() {
            let removed = &self.removed;
            taken.retain(|(id, _)| !removed.contains(&(event, *id)));
            self.removed.retain(|(ev, _)| *ev != event);
        }

        let added = std::mem::replace(&mut self.lists[idx], taken);
        self.lists[idx].extend(added);
    }

    /// Consume one emission of `event` deferred during its last dispatch
    pub fn take_deferred(&mut self, event: TweenEvent) -> bool {
        let pending = &mut self.deferred[event.index()];
        if *pending == 0 {
            return false;
        }
        *pending -= 1;
        true
    }

    /// Drop deferred emissions of `event`; its dispatch ended in a fault
    pub fn discard_deferred(&mut self, event: TweenEvent) {
        self.deferred[event.index()] = 0;
    }
}

/// A user callback that returned an error or panicked
#[derive(Debug)]
pub(crate) enum CallbackFault {
    Error(anyhow::Error),
    Panic(String),
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFault::Error(err) => write!(f, "{err:#}"),
            CallbackFault::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Run user code, converting both `Err` and panics into a [`CallbackFault`]
pub(crate) fn guard<R>(f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, CallbackFault> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CallbackFault::Error(err)),
        Err(payload) => Err(CallbackFault::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
