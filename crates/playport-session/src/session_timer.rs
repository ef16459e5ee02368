//! Timer scheduling for the engagement subsystem.
//!
//! [`TimerQueue`] is the session's only scheduler: it hands out handles,
//! cancels idempotently, and releases due timers in deadline order when the
//! owning loop polls it. [`PausableTimer`] is a value type layered on top
//! whose pause/resume arithmetic depends only on the millisecond timestamps it
//! is given, so it is testable without a real clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `TimerPurpose` values.
pub enum TimerPurpose {
    AuthNudge,
    BackPromptAutoClose,
    InformerArm,
    InformerAutoClose,
}

impl TimerPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthNudge => "auth_nudge",
            Self::BackPromptAutoClose => "back_prompt_auto_close",
            Self::InformerArm => "informer_arm",
            Self::InformerAutoClose => "informer_auto_close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledTimer {
    deadline_ms: u64,
    purpose: TimerPurpose,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    pending: BTreeMap<TimerHandle, ScheduledTimer>,
}

impl TimerQueue {
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64, purpose: TimerPurpose) -> TimerHandle {
        self.next_id = self.next_id.saturating_add(1);
        let handle = TimerHandle(self.next_id);
        self.pending.insert(
            handle,
            ScheduledTimer {
                deadline_ms: now_ms.saturating_add(delay_ms),
                purpose,
            },
        );
        handle
    }

    /// Cancels `handle`. Returns false when it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle).is_some()
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains_key(&handle)
    }

    pub fn deadline_ms(&self, handle: TimerHandle) -> Option<u64> {
        self.pending.get(&handle).map(|timer| timer.deadline_ms)
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.pending.values().map(|timer| timer.deadline_ms).min()
    }

    /// Removes and returns every timer whose deadline is at or before `now_ms`,
    /// earliest deadline first.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<(TimerHandle, TimerPurpose)> {
        let mut due = self
            .pending
            .iter()
            .filter(|(_, timer)| timer.deadline_ms <= now_ms)
            .map(|(handle, timer)| (timer.deadline_ms, *handle, timer.purpose))
            .collect::<Vec<_>>();
        due.sort_by_key(|(deadline_ms, handle, _)| (*deadline_ms, *handle));
        for (_, handle, _) in &due {
            self.pending.remove(handle);
        }
        due.into_iter()
            .map(|(_, handle, purpose)| (handle, purpose))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending deadlines, earliest first.
    pub fn deadlines_ms(&self) -> Vec<u64> {
        let mut deadlines = self
            .pending
            .values()
            .map(|timer| timer.deadline_ms)
            .collect::<Vec<_>>();
        deadlines.sort_unstable();
        deadlines
    }
}

/// Remaining duration after running from `started_at_ms` until `now_ms`.
pub fn remaining_after_run(remaining_ms: u64, started_at_ms: u64, now_ms: u64) -> u64 {
    remaining_ms.saturating_sub(now_ms.saturating_sub(started_at_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausableTimer {
    purpose: TimerPurpose,
    remaining_ms: u64,
    started_at_ms: u64,
    handle: Option<TimerHandle>,
}

impl PausableTimer {
    /// Schedules the timer and returns it in the running state.
    pub fn start(
        queue: &mut TimerQueue,
        now_ms: u64,
        duration_ms: u64,
        purpose: TimerPurpose,
    ) -> Self {
        Self {
            purpose,
            remaining_ms: duration_ms,
            started_at_ms: now_ms,
            handle: Some(queue.schedule(now_ms, duration_ms, purpose)),
        }
    }

    pub fn pause(&mut self, queue: &mut TimerQueue, now_ms: u64) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        queue.cancel(handle);
        self.remaining_ms = remaining_after_run(self.remaining_ms, self.started_at_ms, now_ms);
        true
    }

    pub fn resume(&mut self, queue: &mut TimerQueue, now_ms: u64) -> bool {
        if self.handle.is_some() {
            return false;
        }
        self.started_at_ms = now_ms;
        self.handle = Some(queue.schedule(now_ms, self.remaining_ms, self.purpose));
        true
    }

    /// Drops the scheduled fire. Safe to repeat.
    pub fn cancel(&mut self, queue: &mut TimerQueue) {
        if let Some(handle) = self.handle.take() {
            queue.cancel(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<TimerHandle> {
        self.handle
    }

    pub fn owns(&self, handle: TimerHandle) -> bool {
        self.handle == Some(handle)
    }

    /// Marks the timer as fired after the queue released it.
    pub fn mark_fired(&mut self) {
        self.handle = None;
        self.remaining_ms = 0;
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        if self.is_running() {
            remaining_after_run(self.remaining_ms, self.started_at_ms, now_ms)
        } else {
            self.remaining_ms
        }
    }
}
