//! Active session state machine

use chrono::{DateTime, Local};
use clawline_store::Participant;
use clawline_util::{ParticipantId, SessionId, deadline_after};
use std::time::Duration;

/// The one participant currently holding the machine.
///
/// Lives only in memory. Every credit cycle goes
/// first-move window -> credit window -> consumed, and each time a credit
/// timer is (re)started `credit_seq` moves forward so that callbacks from
/// earlier windows can be recognised and dropped.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub display_name: String,

    /// In-memory balance; mirrors `credits_total - credits_used`
    pub credits_remaining: u32,

    /// A move (or grab) has been recorded this cycle
    pub has_moved: bool,

    /// A credit timer is running for the live epoch
    pub timer_started: bool,

    /// The single grab of this cycle has been spent
    pub grab_used: bool,

    pub credit_ends_at: Option<DateTime<Local>>,
    pub first_move_deadline: Option<DateTime<Local>>,

    /// Epoch counter, bumped whenever a credit timer is (re)started
    pub credit_seq: u64,

    /// The credit for the live epoch has already been charged
    pub credit_consumed: bool,

    pub started_at: DateTime<Local>,
}

impl ActiveSession {
    /// Open a session for `participant` with a first-move window starting now.
    ///
    /// `epoch` must be above every epoch an earlier session used, so that
    /// timers left over from that session never match this one.
    pub fn new(
        participant: &Participant,
        now: DateTime<Local>,
        first_move_window: Duration,
        epoch: u64,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            participant_id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            credits_remaining: participant.credits_remaining(),
            has_moved: false,
            timer_started: false,
            grab_used: false,
            credit_ends_at: None,
            first_move_deadline: Some(deadline_after(now, first_move_window)),
            credit_seq: epoch,
            credit_consumed: false,
            started_at: now,
        }
    }

    /// Whether a timer captured at `seq` belongs to an earlier epoch
    pub fn is_stale(&self, seq: u64) -> bool {
        seq != self.credit_seq
    }

    /// Start the credit window for this cycle. Returns the new epoch.
    pub fn begin_credit(&mut self, now: DateTime<Local>, window: Duration) -> u64 {
        self.has_moved = true;
        self.timer_started = true;
        self.credit_seq += 1;
        self.credit_consumed = false;
        self.credit_ends_at = Some(deadline_after(now, window));
        self.first_move_deadline = None;
        self.credit_seq
    }

    /// Cut a running credit window short after a grab. Returns the new epoch.
    pub fn truncate_for_grab(&mut self, now: DateTime<Local>, window: Duration) -> u64 {
        self.credit_seq += 1;
        self.grab_used = true;
        self.credit_ends_at = Some(deadline_after(now, window));
        self.credit_seq
    }

    /// Charge the credit of the live epoch.
    ///
    /// Returns false if it was already charged; the balance is then untouched.
    pub fn consume_credit(&mut self) -> bool {
        if self.credit_consumed {
            return false;
        }
        self.credit_consumed = true;
        self.credits_remaining = self.credits_remaining.saturating_sub(1);
        true
    }

    /// Clear the per-cycle flags ahead of the next credit
    pub fn reset_cycle(&mut self) {
        self.has_moved = false;
        self.timer_started = false;
        self.grab_used = false;
        self.credit_ends_at = None;
    }

    /// Open (or renew) the first-move window. Returns its deadline.
    pub fn open_first_move_window(
        &mut self,
        now: DateTime<Local>,
        window: Duration,
    ) -> DateTime<Local> {
        let deadline = deadline_after(now, window);
        self.first_move_deadline = Some(deadline);
        deadline
    }
}
