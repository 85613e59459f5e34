//! Timer seam between the scheduler and whatever clock drives it
//!
//! The scheduler never sleeps. It asks a [`TimerScheduler`] to call back
//! after a delay, tagging each request with the session's credit sequence
//! at the moment of scheduling. When the callback arrives it is compared
//! against the live sequence; cancellation is only a courtesy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Which deadline a timer enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Participant must act before this fires
    FirstMove,
    /// Credit window (or shortened grab finish window) ends
    Credit,
}

/// A timer callback, carrying the sequence captured when it was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub seq: u64,
}

/// Starts and cancels scheduler timers.
///
/// Scheduling a kind that is already pending replaces it. Cancellation is
/// best-effort: a timer may still be delivered after `cancel`, so receivers
/// must check the sequence.
pub trait TimerScheduler: Send {
    fn schedule(&mut self, kind: TimerKind, seq: u64, after: Duration);

    fn cancel(&mut self, kind: TimerKind);

    fn cancel_all(&mut self) {
        self.cancel(TimerKind::FirstMove);
        self.cancel(TimerKind::Credit);
    }
}

/// A timer request recorded by [`ManualTimers`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub kind: TimerKind,
    pub seq: u64,
    pub after: Duration,
}

impl ScheduledTimer {
    pub fn fired(&self) -> TimerFired {
        TimerFired {
            kind: self.kind,
            seq: self.seq,
        }
    }
}

#[derive(Debug, Default)]
struct ManualState {
    pending: HashMap<TimerKind, ScheduledTimer>,
    history: Vec<ScheduledTimer>,
}

/// Timers that never fire on their own.
///
/// Clones share state, so a test can hand one clone to the scheduler and
/// keep another to inspect what is pending and deliver callbacks by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending timer of `kind`, if any
    pub fn pending(&self, kind: TimerKind) -> Option<ScheduledTimer> {
        self.state.lock().unwrap().pending.get(&kind).copied()
    }

    /// Number of timers currently pending
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Every timer ever scheduled, including cancelled and replaced ones
    pub fn history(&self) -> Vec<ScheduledTimer> {
        self.state.lock().unwrap().history.clone()
    }

    /// Remove the pending timer of `kind` and return its callback, as if
    /// its delay had elapsed
    pub fn take(&self, kind: TimerKind) -> Option<TimerFired> {
        self.state
            .lock()
            .unwrap()
            .pending
            .remove(&kind)
            .map(|t| t.fired())
    }
}

impl TimerScheduler for ManualTimers {
    fn schedule(&mut self, kind: TimerKind, seq: u64, after: Duration) {
        let timer = ScheduledTimer { kind, seq, after };
        let mut state = self.state.lock().unwrap();
        state.pending.insert(kind, timer);
        state.history.push(timer);
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.state.lock().unwrap().pending.remove(&kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_replaces_same_kind() {
        let mut timers = ManualTimers::new();
        timers.schedule(TimerKind::Credit, 1, Duration::from_secs(30));
        timers.schedule(TimerKind::Credit, 2, Duration::from_secs(4));

        assert_eq!(timers.pending_count(), 1);
        assert_eq!(timers.pending(TimerKind::Credit).unwrap().seq, 2);
        assert_eq!(timers.history().len(), 2);
    }

    #[test]
    fn cancel_all_clears_both_kinds() {
        let mut timers = ManualTimers::new();
        timers.schedule(TimerKind::FirstMove, 0, Duration::from_secs(30));
        timers.schedule(TimerKind::Credit, 1, Duration::from_secs(30));
        timers.cancel_all();

        assert_eq!(timers.pending_count(), 0);
    }

    #[test]
    fn take_removes_and_returns_callback() {
        let mut timers = ManualTimers::new();
        let observer = timers.clone();
        timers.schedule(TimerKind::FirstMove, 3, Duration::from_secs(30));

        let fired = observer.take(TimerKind::FirstMove).unwrap();
        assert_eq!(fired, TimerFired { kind: TimerKind::FirstMove, seq: 3 });
        assert!(observer.take(TimerKind::FirstMove).is_none());
    }
}
