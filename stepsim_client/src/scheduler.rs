//! Auto-advance scheduling.
//!
//! When enabled, every completed step arms a one-shot timer; when it fires the
//! owner advances again if the session is still idle. Conditions are checked
//! at fire time, not only when the timer is armed.

use std::time::Duration;

use tracing::debug;

use crate::{
    events::LoopSender,
    timer::{TimerId, TimerKind, TimerSlot},
};

const MIN_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct AutoAdvanceScheduler {
    enabled: bool,
    delay: Duration,
    timer: TimerSlot,
    loop_tx: LoopSender,
}

impl AutoAdvanceScheduler {
    pub fn new(delay: Duration, loop_tx: LoopSender) -> Self {
        Self {
            enabled: false,
            delay: delay.max(MIN_DELAY),
            timer: TimerSlot::new(TimerKind::AutoAdvance),
            loop_tx,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    /// Turns auto mode on or off. `ready` means the session is idle on an open
    /// connection; only then does enabling arm the first timer.
    pub fn set_enabled(&mut self, enabled: bool, ready: bool) {
        self.enabled = enabled;
        if !enabled {
            if self.timer.cancel() {
                debug!("Pending auto-advance cancelled");
            }
        } else if ready {
            self.arm();
        }
    }

    /// Changes the delay. A pending timer restarts from now with the new delay.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay.max(MIN_DELAY);
        if self.timer.is_pending() {
            self.arm();
        }
    }

    pub fn on_step_completed(&mut self, session_idle: bool) {
        if self.enabled && session_idle {
            self.arm();
        }
    }

    /// Drops any pending timer without changing the enabled flag.
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    /// Consumes a fired timer. True when the owner should try to advance.
    pub fn on_timer(&mut self, id: TimerId) -> bool {
        self.timer.claim(id) && self.enabled
    }

    fn arm(&mut self) {
        self.timer.schedule(self.delay, &self.loop_tx);
        debug!(delay_ms = self.delay.as_millis() as u64, "Auto-advance armed");
    }
}
