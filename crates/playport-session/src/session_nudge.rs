//! Authentication-delay nudge.
//!
//! One pausable timer per session invites a signed-out player to sign in
//! after a stretch of visible play. Hidden time does not count, a sign-in
//! cancels it for good, and it fires at most once.

use serde::{Deserialize, Serialize};

use crate::session_timer::{PausableTimer, TimerHandle, TimerPurpose, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthNudgeSnapshot {
    pub armed: bool,
    pub running: bool,
    pub was_triggered: bool,
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthDelayState {
    timer: Option<PausableTimer>,
    was_triggered: bool,
    cancelled: bool,
}

impl AuthDelayState {
    /// Arms the nudge once. A hidden page arms it paused.
    pub fn arm(
        &mut self,
        queue: &mut TimerQueue,
        now_ms: u64,
        delay_ms: u64,
        page_visible: bool,
    ) -> bool {
        if self.timer.is_some() || self.was_triggered || self.cancelled {
            return false;
        }
        let mut timer = PausableTimer::start(queue, now_ms, delay_ms, TimerPurpose::AuthNudge);
        if !page_visible {
            timer.pause(queue, now_ms);
        }
        self.timer = Some(timer);
        true
    }

    pub fn on_visibility_changed(&mut self, queue: &mut TimerQueue, now_ms: u64, visible: bool) {
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        if visible {
            timer.resume(queue, now_ms);
        } else {
            timer.pause(queue, now_ms);
        }
    }

    /// Cancels the nudge permanently. Returns true when a timer was dropped.
    pub fn cancel(&mut self, queue: &mut TimerQueue) -> bool {
        self.cancelled = true;
        match self.timer.take() {
            Some(mut timer) => {
                timer.cancel(queue);
                true
            }
            None => false,
        }
    }

    /// Applies a released timer. Returns true when the nudge fired.
    pub fn on_timer_fired(&mut self, handle: TimerHandle) -> bool {
        let owned = self.timer.as_ref().is_some_and(|timer| timer.owns(handle));
        if !owned {
            return false;
        }
        if let Some(mut timer) = self.timer.take() {
            timer.mark_fired();
        }
        self.was_triggered = true;
        true
    }

    pub fn was_triggered(&self) -> bool {
        self.was_triggered
    }

    pub fn snapshot(&self, now_ms: u64) -> AuthNudgeSnapshot {
        AuthNudgeSnapshot {
            armed: self.timer.is_some(),
            running: self.timer.as_ref().is_some_and(PausableTimer::is_running),
            was_triggered: self.was_triggered,
            remaining_ms: self.timer.as_ref().map(|timer| timer.remaining_ms(now_ms)),
        }
    }
}
