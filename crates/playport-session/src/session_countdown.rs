use serde::{Deserialize, Serialize};

use crate::session_timer::{TimerHandle, TimerPurpose, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `CountdownSnapshot` used across Playport components.
pub struct CountdownSnapshot {
    pub is_open: bool,
    pub has_interacted: bool,
    pub counting_down: bool,
}

/// Dismissible affordance that auto-closes unless the user has interacted with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    purpose: TimerPurpose,
    is_open: bool,
    has_interacted: bool,
    handle: Option<TimerHandle>,
}

impl Countdown {
    pub fn new(purpose: TimerPurpose) -> Self {
        Self {
            purpose,
            is_open: false,
            has_interacted: false,
            handle: None,
        }
    }

    /// Opens the affordance with a fresh auto-close countdown. Returns true if
    /// it was closed before.
    pub fn open(&mut self, queue: &mut TimerQueue, now_ms: u64, window_ms: u64) -> bool {
        let was_open = self.is_open;
        self.cancel_timer(queue);
        self.is_open = true;
        if !self.has_interacted {
            self.handle = Some(queue.schedule(now_ms, window_ms, self.purpose));
        }
        !was_open
    }

    /// Tap on the collapsed affordance: re-open it. No effect while open.
    pub fn tap(&mut self, queue: &mut TimerQueue, now_ms: u64, window_ms: u64) -> bool {
        if self.is_open {
            return false;
        }
        self.open(queue, now_ms, window_ms)
    }

    /// Tap on the close control: closes and disables auto-close for the session.
    pub fn close_tapped(&mut self, queue: &mut TimerQueue) -> bool {
        self.has_interacted = true;
        self.dismiss(queue)
    }

    /// Closes without recording an interaction. Returns true if it was open.
    pub fn dismiss(&mut self, queue: &mut TimerQueue) -> bool {
        self.cancel_timer(queue);
        let was_open = self.is_open;
        self.is_open = false;
        was_open
    }

    /// Applies a released timer. Returns true when this countdown closed.
    pub fn on_timer_fired(&mut self, handle: TimerHandle) -> bool {
        if self.handle != Some(handle) {
            return false;
        }
        self.handle = None;
        let was_open = self.is_open;
        self.is_open = false;
        was_open
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn has_interacted(&self) -> bool {
        self.has_interacted
    }

    pub fn snapshot(&self) -> CountdownSnapshot {
        CountdownSnapshot {
            is_open: self.is_open,
            has_interacted: self.has_interacted,
            counting_down: self.handle.is_some(),
        }
    }

    fn cancel_timer(&mut self, queue: &mut TimerQueue) {
        if let Some(handle) = self.handle.take() {
            queue.cancel(handle);
        }
    }
}
