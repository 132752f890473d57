//! Priority-grouped sequences
//!
//! A sequence is a tween whose evaluation launches other tweens. Its children
//! are grouped by an integer priority: every tween in a group is played at the
//! same moment, and groups start in ascending priority order, each one once the
//! previous group's window has elapsed.
//!
//! Priorities are always the contiguous range `0..=last_priority`. Removing
//! the last member of a group shifts the groups above it down by one.
//!
//! ```rust
//! use kinetic_tween::{Scheduler, TweenBuilder};
//!
//! let mut scheduler = Scheduler::new();
//! let seq = TweenBuilder::sequence().spawn(&mut scheduler);
//! let slide = TweenBuilder::float(0.0, 100.0).duration(2.0).spawn(&mut scheduler);
//! let fade = TweenBuilder::float(1.0, 0.0).duration(3.0).spawn(&mut scheduler);
//! let flash = TweenBuilder::float(0.0, 1.0).duration(1.0).spawn(&mut scheduler);
//!
//! scheduler.append(seq, slide).unwrap();
//! scheduler.append(seq, fade).unwrap();
//! scheduler.join(seq, flash).unwrap(); // runs alongside `fade`
//!
//! assert_eq!(scheduler.sequence_duration(seq).unwrap(), 5.0);
//! assert_eq!(scheduler.group(seq, 1).unwrap(), vec![fade, flash]);
//! ```
//!
//! The duration of a group is the longest `duration * passes + delay` among
//! its members and is cached per priority. The cache is kept correct for
//! changes made through the scheduler (membership changes and
//! [`Scheduler::set_timing`]).

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, TweenError};
use crate::scheduler::Scheduler;
use crate::tween::TweenId;

/// Children and run state of a sequence tween
#[derive(Debug, Default)]
pub(crate) struct Sequence {
    /// `(priority, tween)`, sorted by priority, insertion order within a group
    entries: Vec<(i32, TweenId)>,
    duration_cache: FxHashMap<i32, f32>,
    /// Duration of every group launched this pass, sampled at launch and
    /// indexed by priority. The last entry is the running group.
    launched: SmallVec<[f32; 8]>,
    /// Members added to an already launched group, played on the next
    /// evaluation
    late: SmallVec<[TweenId; 2]>,
}

impl Sequence {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest priority present, -1 when empty
    pub fn last_priority(&self) -> i32 {
        self.entries.last().map_or(-1, |(p, _)| *p)
    }

    pub fn priority_of(&self, tween: TweenId) -> Option<i32> {
        self.entries
            .iter()
            .find(|(_, t)| *t == tween)
            .map(|(p, _)| *p)
    }

    pub fn group(&self, priority: i32) -> impl Iterator<Item = TweenId> + '_ {
        self.entries
            .iter()
            .filter(move |(p, _)| *p == priority)
            .map(|(_, t)| *t)
    }

    pub fn entries(&self) -> &[(i32, TweenId)] {
        &self.entries
    }

    /// Forget run state so the next evaluation starts again from group 0
    pub fn rewind(&mut self) {
        self.launched.clear();
        self.late.clear();
    }

    /// Group currently running; -1 before the first evaluation of a pass
    fn current_run_priority(&self) -> i32 {
        self.launched.len() as i32 - 1
    }

    fn elapsed_in_prior_groups(&self) -> f32 {
        match self.launched.split_last() {
            Some((_, prior)) => prior.iter().sum(),
            None => 0.0,
        }
    }

    fn current_group_duration(&self) -> f32 {
        self.launched.last().copied().unwrap_or(0.0)
    }

    fn has_launched(&self, priority: i32) -> bool {
        priority >= 0 && (priority as usize) < self.launched.len()
    }

    fn insert(&mut self, priority: i32, tween: TweenId) {
        let pos = self.entries.partition_point(|(p, _)| *p <= priority);
        self.entries.insert(pos, (priority, tween));
        self.duration_cache.remove(&priority);
    }

    /// Move every group up one priority, freeing priority 0
    fn shift_up(&mut self) {
        for entry in &mut self.entries {
            entry.0 += 1;
        }
        self.duration_cache.clear();
        if !self.launched.is_empty() {
            self.launched.insert(0, 0.0);
        }
    }

    fn remove(&mut self, tween: TweenId) -> Option<i32> {
        let pos = self.entries.iter().position(|(_, t)| *t == tween)?;
        let (priority, _) = self.entries.remove(pos);
        self.duration_cache.remove(&priority);
        self.late.retain(|t| *t != tween);
        if !self.entries.iter().any(|(p, _)| *p == priority) {
            self.close_gap(priority);
        }
        Some(priority)
    }

    fn remove_group(&mut self, priority: i32) -> Vec<TweenId> {
        let mut removed = Vec::new();
        self.entries.retain(|&(p, t)| {
            if p == priority {
                removed.push(t);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.duration_cache.remove(&priority);
            self.late.retain(|t| !removed.contains(t));
            self.close_gap(priority);
        }
        removed
    }

    /// Shift groups above an emptied priority down by one. An emptied group
    /// that already launched leaves the run record with it, so the groups
    /// after it keep their place in the run.
    fn close_gap(&mut self, priority: i32) {
        if self.has_launched(priority) {
            self.launched.remove(priority as usize);
        }
        let mut shifted = false;
        for entry in &mut self.entries {
            if entry.0 > priority {
                entry.0 -= 1;
                shifted = true;
            }
        }
        if shifted {
            self.duration_cache.clear();
        }
    }

    fn clear(&mut self) -> Vec<TweenId> {
        self.duration_cache.clear();
        self.rewind();
        self.entries.drain(..).map(|(_, t)| t).collect()
    }

    fn cached_duration(&self, priority: i32) -> Option<f32> {
        self.duration_cache.get(&priority).copied()
    }
}

impl Scheduler {
    fn seq(&self, id: TweenId) -> Result<&Sequence> {
        let state = self.tweens.get(id).ok_or(TweenError::UnknownTween(id))?;
        state.sequence().ok_or(TweenError::NotASequence(id))
    }

    fn seq_mut(&mut self, id: TweenId) -> Result<&mut Sequence> {
        let state = self.tweens.get_mut(id).ok_or(TweenError::UnknownTween(id))?;
        state.sequence_mut().ok_or(TweenError::NotASequence(id))
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add `tween` as a new group after the current last one
    pub fn append(&mut self, seq: TweenId, tween: TweenId) -> Result<()> {
        self.adopt(seq, tween)?;
        let sequence = self.seq_mut(seq)?;
        let priority = sequence.last_priority() + 1;
        sequence.insert(priority, tween);
        self.membership_changed(seq, tween, priority, "append");
        Ok(())
    }

    /// Add `tween` to the last group, running alongside its members.
    /// On an empty sequence this is [`append`](Self::append).
    pub fn join(&mut self, seq: TweenId, tween: TweenId) -> Result<()> {
        self.adopt(seq, tween)?;
        let sequence = self.seq_mut(seq)?;
        let priority = sequence.last_priority().max(0);
        sequence.insert(priority, tween);
        self.membership_changed(seq, tween, priority, "join");
        Ok(())
    }

    /// Add `tween` to group 0
    pub fn join_first(&mut self, seq: TweenId, tween: TweenId) -> Result<()> {
        self.adopt(seq, tween)?;
        self.seq_mut(seq)?.insert(0, tween);
        self.membership_changed(seq, tween, 0, "join_first");
        Ok(())
    }

    /// Add `tween` as a new group 0, moving every existing group up one
    pub fn prepend(&mut self, seq: TweenId, tween: TweenId) -> Result<()> {
        self.adopt(seq, tween)?;
        let sequence = self.seq_mut(seq)?;
        sequence.shift_up();
        sequence.insert(0, tween);
        self.membership_changed(seq, tween, 0, "prepend");
        Ok(())
    }

    /// Take `tween` out of the sequence. Returns `false` if it was not a member.
    ///
    /// The tween itself is left as it is; a running child keeps running.
    pub fn remove_from_sequence(&mut self, seq: TweenId, tween: TweenId) -> Result<bool> {
        let Some(priority) = self.seq_mut(seq)?.remove(tween) else {
            return Ok(false);
        };
        if let Some(state) = self.tweens.get_mut(tween) {
            state.parent = None;
        }
        self.invalidate_ancestors(seq);
        tracing::debug!(sequence = %self.describe(seq), tween = ?tween, priority, "removed from sequence");
        Ok(true)
    }

    /// Remove every tween in group `priority`; returns the removed tweens
    pub fn remove_priority(&mut self, seq: TweenId, priority: i32) -> Result<Vec<TweenId>> {
        let removed = self.seq_mut(seq)?.remove_group(priority);
        self.release(&removed);
        if !removed.is_empty() {
            self.invalidate_ancestors(seq);
        }
        Ok(removed)
    }

    /// Remove every child. An empty sequence cannot be played.
    pub fn clear_sequence(&mut self, seq: TweenId) -> Result<()> {
        let removed = self.seq_mut(seq)?.clear();
        self.release(&removed);
        self.invalidate_ancestors(seq);
        Ok(())
    }

    /// Checks shared by every insertion; on success `tween` is stopped and
    /// owned by `seq`.
    fn adopt(&mut self, seq: TweenId, tween: TweenId) -> Result<()> {
        self.seq(seq)?;
        let state = self.tweens.get(tween).ok_or(TweenError::UnknownTween(tween))?;
        if let Some(sequence) = state.parent {
            return Err(TweenError::AlreadySequenced { tween, sequence });
        }

        let mut cursor = Some(seq);
        while let Some(current) = cursor {
            if current == tween {
                return Err(TweenError::SelfReference { sequence: seq, tween });
            }
            cursor = self.tweens.get(current).and_then(|s| s.parent);
        }

        if self.is_playing(tween) {
            tracing::debug!(tween = %self.describe(tween), "stopping running tween before sequencing it");
            self.stop(tween);
        }
        self.tweens[tween].parent = Some(seq);
        Ok(())
    }

    fn membership_changed(&mut self, seq: TweenId, tween: TweenId, priority: i32, op: &str) {
        self.invalidate_ancestors(seq);
        tracing::debug!(sequence = %self.describe(seq), tween = %self.describe(tween), priority, op, "sequence membership changed");

        let launched = self.seq(seq).is_ok_and(|sequence| sequence.has_launched(priority));
        if !launched {
            return;
        }
        // Its group will not be launched again this pass
        let duration = self.group_duration(seq, priority);
        if let Ok(sequence) = self.seq_mut(seq) {
            sequence.launched[priority as usize] = duration;
            sequence.late.push(tween);
        }
        tracing::debug!(sequence = %self.describe(seq), tween = %self.describe(tween), priority, "joined a launched group");
    }

    fn release(&mut self, tweens: &[TweenId]) {
        for &tween in tweens {
            if let Some(state) = self.tweens.get_mut(tween) {
                state.parent = None;
            }
        }
    }

    /// Drop cached group durations that include `seq`, in every enclosing
    /// sequence
    fn invalidate_ancestors(&mut self, seq: TweenId) {
        let mut child = seq;
        while let Some(parent) = self.tweens.get(child).and_then(|s| s.parent) {
            if let Ok(sequence) = self.seq_mut(parent) {
                if let Some(priority) = sequence.priority_of(child) {
                    sequence.duration_cache.remove(&priority);
                }
            }
            child = parent;
        }
    }

    /// `tween`'s timing changed: drop the cached duration of its group
    pub(crate) fn invalidate_membership(&mut self, seq: TweenId, tween: TweenId) {
        if let Ok(sequence) = self.seq_mut(seq) {
            if let Some(priority) = sequence.priority_of(tween) {
                sequence.duration_cache.remove(&priority);
            }
        }
        self.invalidate_ancestors(seq);
    }

    /// Unlink a tween that is being freed
    pub(crate) fn detach_child(&mut self, seq: TweenId, tween: TweenId) {
        let removed = self
            .seq_mut(seq)
            .map(|sequence| sequence.remove(tween).is_some())
            .unwrap_or(false);
        if removed {
            self.invalidate_ancestors(seq);
        }
        if let Some(state) = self.tweens.get_mut(tween) {
            state.parent = None;
        }
    }

    /// Children of a sequence in priority order; empty for other tweens
    pub(crate) fn child_ids(&self, id: TweenId) -> Vec<TweenId> {
        self.seq(id)
            .map(|sequence| sequence.entries.iter().map(|(_, t)| *t).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Total seconds of one pass: the sum of every group's duration
    pub fn sequence_duration(&mut self, seq: TweenId) -> Result<f32> {
        self.seq(seq)?;
        Ok(self.sequence_total(seq))
    }

    /// Duration of group `priority`, or -1 if the group is empty
    pub fn priority_duration(&mut self, seq: TweenId, priority: i32) -> Result<f32> {
        self.seq(seq)?;
        Ok(self.group_duration(seq, priority))
    }

    pub fn last_priority(&self, seq: TweenId) -> Result<i32> {
        Ok(self.seq(seq)?.last_priority())
    }

    pub fn priority_of(&self, seq: TweenId, tween: TweenId) -> Result<Option<i32>> {
        Ok(self.seq(seq)?.priority_of(tween))
    }

    pub fn group(&self, seq: TweenId, priority: i32) -> Result<Vec<TweenId>> {
        Ok(self.seq(seq)?.group(priority).collect())
    }

    /// Every `(priority, tween)` pair in priority order
    pub fn sequence_children(&self, seq: TweenId) -> Result<Vec<(i32, TweenId)>> {
        Ok(self.seq(seq)?.entries().to_vec())
    }

    pub(crate) fn sequence_total(&mut self, seq: TweenId) -> f32 {
        let last = match self.seq(seq) {
            Ok(sequence) => sequence.last_priority(),
            Err(_) => return 0.0,
        };
        (0..=last).map(|p| self.group_duration(seq, p)).sum()
    }

    fn group_duration(&mut self, seq: TweenId, priority: i32) -> f32 {
        let members: SmallVec<[TweenId; 8]> = match self.seq(seq) {
            Ok(sequence) => {
                if let Some(duration) = sequence.cached_duration(priority) {
                    return duration;
                }
                sequence.group(priority).collect()
            }
            Err(_) => return -1.0,
        };
        if members.is_empty() {
            return -1.0;
        }

        let longest = members
            .into_iter()
            .map(|member| self.scheduled_span(member))
            .fold(0.0_f32, f32::max);

        if let Ok(sequence) = self.seq_mut(seq) {
            sequence.duration_cache.insert(priority, longest);
        }
        longest
    }

    /// Time a tween occupies in its group: every pass plus the delay.
    /// Infinite loops count as a single pass.
    fn scheduled_span(&mut self, id: TweenId) -> f32 {
        let Some(state) = self.tweens.get(id) else {
            return 0.0;
        };
        let timing = state.timing;
        if state.is_sequence() {
            let duration = self.sequence_total(id);
            duration * timing.scheduled_passes() as f32 + timing.delay
        } else {
            timing.scheduled_span()
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Launch whichever groups are due at fraction `t` of the current pass
    pub(crate) fn evaluate_sequence(&mut self, id: TweenId, t: f32) {
        let total = self.sequence_total(id);
        let Ok(sequence) = self.seq_mut(id) else {
            return;
        };
        let late = std::mem::take(&mut sequence.late);
        let started = sequence.current_run_priority() >= 0;

        for child in late {
            self.launch_child(id, child);
        }

        if !started {
            let duration = self.group_duration(id, 0);
            if let Ok(sequence) = self.seq_mut(id) {
                sequence.launched.push(duration);
            }
            self.launch_group(id, 0);
        }

        let elapsed = t * total;
        loop {
            if !self.is_playing(id) {
                break;
            }
            let Ok(sequence) = self.seq(id) else {
                break;
            };
            let current = sequence.current_run_priority();
            if current >= sequence.last_priority() {
                break;
            }
            let in_group = elapsed - sequence.elapsed_in_prior_groups();
            // At the end of the pass every remaining group is due
            if in_group < sequence.current_group_duration() && t < 1.0 {
                break;
            }

            let next = current + 1;
            let duration = self.group_duration(id, next);
            if let Ok(sequence) = self.seq_mut(id) {
                sequence.launched.push(duration);
            }
            self.launch_group(id, next);
        }
    }

    fn launch_group(&mut self, seq: TweenId, priority: i32) {
        let members: SmallVec<[TweenId; 8]> = match self.seq(seq) {
            Ok(sequence) => sequence.group(priority).collect(),
            Err(_) => return,
        };
        tracing::debug!(
            sequence = %self.describe(seq),
            priority,
            count = members.len(),
            "launching sequence group"
        );

        for child in members {
            self.launch_child(seq, child);
        }
    }

    fn launch_child(&mut self, seq: TweenId, child: TweenId) {
        if let Err(err) = self.play(child) {
            tracing::error!(
                sequence = %self.describe(seq),
                child = %self.describe(child),
                error = %err,
                "failed to launch sequence child"
            );
        }
    }
}
