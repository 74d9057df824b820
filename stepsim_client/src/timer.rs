//! One-shot timers.
//!
//! A timer is a spawned task that sleeps and then posts a `LoopEvent::Timer`
//! carrying its id. Dropping the `Timer` handle aborts the task. Because the
//! event may already be queued when the handle is dropped, owners keep timers
//! in a `TimerSlot` and only act on a fired id that is still the pending one.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::events::{LoopEvent, LoopSender};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    fn new_unique() -> Self {
        TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a timer is for; routes the fired event to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Reconnect,
    AutoAdvance,
    StepTimeout,
}

/// Handle to a pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    task: JoinHandle<()>,
}

impl Timer {
    /// Starts a timer that posts to `tx` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(kind: TimerKind, delay: Duration, tx: &LoopSender) -> Self {
        let id = TimerId::new_unique();
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(LoopEvent::Timer { kind, id });
        });
        Self { id, task }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Holds at most one pending timer of a single kind.
#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    pending: Option<Timer>,
}

impl TimerSlot {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            pending: None,
        }
    }

    /// Cancels whatever is pending and starts a fresh timer.
    pub fn schedule(&mut self, delay: Duration, tx: &LoopSender) -> TimerId {
        self.cancel();
        let timer = Timer::start(self.kind, delay, tx);
        let id = timer.id();
        self.pending = Some(timer);
        id
    }

    /// Returns true if a timer was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes a fired timer. False for ids that were cancelled or replaced.
    pub fn claim(&mut self, id: TimerId) -> bool {
        if self.pending.as_ref().is_some_and(|t| t.id() == id) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{sync::mpsc, time::Instant};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::Reconnect);
        let start = Instant::now();
        let id = slot.schedule(Duration::from_millis(500), &tx);

        let Some(LoopEvent::Timer { kind, id: fired }) = rx.recv().await else {
            panic!("expected timer event");
        };
        assert_eq!(kind, TimerKind::Reconnect);
        assert_eq!(fired, id);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(slot.claim(fired));
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::AutoAdvance);
        slot.schedule(Duration::from_millis(100), &tx);
        assert!(slot.cancel());

        let waited = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(waited.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_invalidates_previous_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new(TimerKind::AutoAdvance);
        let first = slot.schedule(Duration::from_millis(100), &tx);
        let second = slot.schedule(Duration::from_millis(300), &tx);
        assert_ne!(first, second);
        assert!(!slot.claim(first));

        let Some(LoopEvent::Timer { id, .. }) = rx.recv().await else {
            panic!("expected timer event");
        };
        assert_eq!(id, second);
        assert!(slot.claim(id));
    }
}
