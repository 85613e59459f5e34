//! Session scheduler

use chrono::{DateTime, Local};
use clawline_api::{
    ControlAction, ControlOutcome, Event, EventPayload, ParticipantStatus, SchedulerSnapshot,
    SessionEndReason,
};
use clawline_config::{ActuatorConfig, CreditPolicy, Settings, TimingPolicy};
use clawline_host_api::{Actuator, BroadcastError, Broadcaster};
use clawline_store::{AuditEvent, AuditEventType, Participant, QueueStore, StoreError, StoreResult};
use clawline_util::{ParticipantId, deadline_after, format_duration};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    ActiveSession, Recovered, SchedulerError, SchedulerResult, TimerFired, TimerKind,
    TimerScheduler, cap_credits, credits_for_amount,
};

/// Result of a confirmed payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    /// Credits added by this confirmation (0 for a duplicate)
    pub credits_granted: u32,
    pub newly_confirmed: bool,
    /// Participant activated as a consequence, if any
    pub activated: Option<ParticipantId>,
}

/// Owns the single active session and drives it through its credits.
///
/// Every method runs to completion without yielding. Collaborator failures
/// (actuator, broadcaster, audit log) are logged and never undo a
/// transition. A failed store write also lets the transition finish; the
/// first such error is returned once the operation is done.
pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    actuator: Arc<dyn Actuator>,
    broadcaster: Arc<dyn Broadcaster>,
    timers: Box<dyn TimerScheduler>,
    timing: TimingPolicy,
    credits: CreditPolicy,
    actuator_config: ActuatorConfig,
    session: Option<ActiveSession>,
    /// First epoch the next session may use; only ever moves forward
    next_epoch: u64,
    deferred_error: Option<StoreError>,
}

impl Scheduler {
    /// Create a scheduler. Boot recovery must already have run.
    pub fn new(
        _recovered: Recovered,
        settings: &Settings,
        store: Arc<dyn QueueStore>,
        actuator: Arc<dyn Actuator>,
        broadcaster: Arc<dyn Broadcaster>,
        timers: Box<dyn TimerScheduler>,
    ) -> Self {
        info!(
            first_move = ?settings.timing.first_move_window,
            credit = ?settings.timing.credit_window,
            grab_finish = ?settings.timing.grab_finish_window,
            "Scheduler initialized"
        );

        Self {
            store,
            actuator,
            broadcaster,
            timers,
            timing: settings.timing,
            credits: settings.credits,
            actuator_config: settings.actuator.clone(),
            session: None,
            next_epoch: 0,
            deferred_error: None,
        }
    }

    /// The session currently holding the machine
    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Credits a payment of `amount` buys under the configured price
    pub fn credits_for(&self, amount: f64) -> u32 {
        credits_for_amount(
            amount,
            self.credits.price_per_credit,
            self.credits.max_per_payment,
        )
    }

    /// Current state for display
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let waiting = match self.store.list_queue() {
            Ok(queue) => queue
                .iter()
                .filter(|p| p.status == ParticipantStatus::Waiting && p.credits_remaining() > 0)
                .map(Participant::to_queue_view)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to read queue for snapshot");
                Vec::new()
            }
        };

        match &self.session {
            Some(session) => SchedulerSnapshot {
                active_id: Some(session.participant_id.clone()),
                session_id: Some(session.session_id.clone()),
                credits_remaining: Some(session.credits_remaining),
                credit_ends_at: session.credit_ends_at,
                first_move_deadline: session.first_move_deadline,
                waiting,
            },
            None => SchedulerSnapshot {
                waiting,
                ..Default::default()
            },
        }
    }

    // Activation

    /// Hand the machine to the earliest eligible waiting participant.
    ///
    /// No-op while a session is active. Waiting participants without credits
    /// are retired during the scan.
    pub fn activate_next(&mut self, now: DateTime<Local>) -> SchedulerResult<Option<ParticipantId>> {
        let result = self.try_activate_next(now);
        self.finish(result)
    }

    /// Administrative activation of whoever is next in line
    pub fn force_start_next(&mut self, now: DateTime<Local>) -> SchedulerResult<Option<ParticipantId>> {
        if self.session.is_some() {
            return Err(SchedulerError::SessionAlreadyActive);
        }
        self.activate_next(now)
    }

    /// Administrative activation of a specific participant, skipping the line
    pub fn force_activate(&mut self, id: &ParticipantId, now: DateTime<Local>) -> SchedulerResult<()> {
        if self.session.is_some() {
            return Err(SchedulerError::SessionAlreadyActive);
        }

        let participant = self
            .store
            .get_participant(id)?
            .ok_or_else(|| SchedulerError::ParticipantNotFound(id.clone()))?;

        if participant.credits_remaining() == 0 {
            return Err(SchedulerError::NoCreditsRemaining(id.clone()));
        }

        info!(participant_id = %id, "Force activating participant");
        self.start_session(participant, now);
        self.finish(Ok(()))
    }

    fn try_activate_next(&mut self, now: DateTime<Local>) -> SchedulerResult<Option<ParticipantId>> {
        if let Some(session) = &self.session {
            debug!(active = %session.participant_id, "Activation skipped, session already active");
            return Ok(None);
        }

        let queue = self.store.list_queue()?;

        let mut next = None;
        for participant in queue {
            if participant.status != ParticipantStatus::Waiting {
                continue;
            }
            if participant.credits_remaining() == 0 {
                let result = self.store.set_status(&participant.id, ParticipantStatus::Done);
                self.persist("retire participant", result);
                info!(participant_id = %participant.id, "Retired waiting participant with no credits");
                continue;
            }
            if next.is_none() {
                next = Some(participant);
            }
        }

        match next {
            Some(participant) => {
                let id = participant.id.clone();
                self.start_session(participant, now);
                Ok(Some(id))
            }
            None => {
                debug!("Queue empty, scheduler idle");
                self.publish_state();
                Ok(None)
            }
        }
    }

    fn start_session(&mut self, participant: Participant, now: DateTime<Local>) {
        let result = self.store.set_status(&participant.id, ParticipantStatus::Active);
        self.persist("activate participant", result);

        let window = self.timing.first_move_window;
        let session = ActiveSession::new(&participant, now, window, self.next_epoch);
        self.timers.cancel_all();
        self.timers.schedule(TimerKind::FirstMove, session.credit_seq, window);

        // Coins go in once per participant, however many times they are activated
        let mut pulsed = false;
        if !participant.credits_pulsed {
            let result = self.store.mark_pulsed(&participant.id);
            if let Some(true) = self.persist("mark credits pulsed", result) {
                for _ in 0..session.credits_remaining {
                    self.pulse(self.actuator_config.coin_channel, "coin");
                }
                pulsed = true;
            }
        }

        info!(
            participant_id = %session.participant_id,
            session_id = %session.session_id,
            credits_remaining = session.credits_remaining,
            pulsed,
            "Session started"
        );

        self.audit(AuditEventType::SessionStarted {
            session_id: session.session_id.clone(),
            participant_id: session.participant_id.clone(),
            credits_remaining: session.credits_remaining,
            pulsed,
        });

        self.publish(EventPayload::SessionStarted {
            session_id: session.session_id.clone(),
            participant_id: session.participant_id.clone(),
            display_name: session.display_name.clone(),
            credits_remaining: session.credits_remaining,
            first_move_deadline: deadline_after(now, window),
        });

        self.session = Some(session);
        self.publish_state();
    }

    // Participant input

    /// Route a control input from `id` to the session it must hold
    pub fn on_control_action(
        &mut self,
        id: &ParticipantId,
        action: ControlAction,
        now: DateTime<Local>,
    ) -> SchedulerResult<ControlOutcome> {
        match &self.session {
            Some(session) if session.participant_id == *id => {}
            _ => return Err(SchedulerError::NotActive(id.clone())),
        }

        match action {
            ControlAction::Move => self.record_first_action(now),
            ControlAction::Grab => self.handle_grab(now),
        }
    }

    /// Start the credit window on the first move of a cycle.
    ///
    /// Further moves while the window runs change nothing.
    pub fn record_first_action(&mut self, now: DateTime<Local>) -> SchedulerResult<ControlOutcome> {
        let window = self.timing.credit_window;
        let Some(session) = self.session.as_mut() else {
            return Err(SchedulerError::NoActiveSession);
        };

        if session.timer_started {
            return Ok(ControlOutcome::AlreadyRunning);
        }

        let seq = session.begin_credit(now, window);
        let participant_id = session.participant_id.clone();

        self.timers.cancel(TimerKind::FirstMove);
        self.timers.schedule(TimerKind::Credit, seq, window);

        let credit_ends_at = deadline_after(now, window);
        info!(participant_id = %participant_id, seq, "Credit window started");

        self.publish(EventPayload::CreditStarted {
            participant_id,
            credit_ends_at,
        });
        self.publish_state();

        Ok(ControlOutcome::CreditStarted { credit_ends_at })
    }

    /// Drop the claw: the credit ends after the grab finish window.
    ///
    /// One grab per credit. Grabbing before any move starts the credit
    /// directly under the shorter window.
    pub fn handle_grab(&mut self, now: DateTime<Local>) -> SchedulerResult<ControlOutcome> {
        let window = self.timing.grab_finish_window;
        let Some(session) = self.session.as_mut() else {
            return Err(SchedulerError::NoActiveSession);
        };

        if session.grab_used {
            return Err(SchedulerError::GrabAlreadyUsed);
        }

        let seq = if session.has_moved {
            session.truncate_for_grab(now, window)
        } else {
            let seq = session.begin_credit(now, window);
            session.grab_used = true;
            seq
        };
        let participant_id = session.participant_id.clone();

        self.timers.cancel(TimerKind::FirstMove);
        self.timers.cancel(TimerKind::Credit);
        self.timers.schedule(TimerKind::Credit, seq, window);

        // A failed pulse still counts as the grab; state stays authoritative
        self.pulse(self.actuator_config.grab_channel, "grab");

        let finish_at = deadline_after(now, window);
        info!(participant_id = %participant_id, seq, "Grab accepted");

        self.publish(EventPayload::GrabAccepted {
            participant_id,
            finish_at,
        });
        self.publish_state();

        Ok(ControlOutcome::GrabAccepted { finish_at })
    }

    // Timers

    /// Deliver a timer callback
    pub fn on_timer(&mut self, fired: TimerFired, now: DateTime<Local>) -> SchedulerResult<()> {
        match fired.kind {
            TimerKind::FirstMove => self.on_first_move_timeout(fired.seq, now),
            TimerKind::Credit => self.on_credit_timer_expiry(fired.seq, now),
        }
    }

    /// The credit (or grab finish) window captured at `seq` ran out
    pub fn on_credit_timer_expiry(&mut self, seq: u64, now: DateTime<Local>) -> SchedulerResult<()> {
        let result = self.try_credit_expiry(seq, now);
        self.finish(result)
    }

    fn try_credit_expiry(&mut self, seq: u64, now: DateTime<Local>) -> SchedulerResult<()> {
        let Some(session) = self.session.as_mut() else {
            debug!(seq, "Credit timer fired with no session");
            return Ok(());
        };

        if session.is_stale(seq) || !session.timer_started {
            debug!(seq, live = session.credit_seq, "Discarding stale credit timer");
            return Ok(());
        }

        if !session.consume_credit() {
            debug!(seq, "Credit for this epoch already charged");
            return Ok(());
        }

        let participant_id = session.participant_id.clone();
        let session_id = session.session_id.clone();
        let remaining = session.credits_remaining;

        let result = self.store.increment_used(&participant_id, 1);
        if let Some(credits_used) = self.persist("charge credit", result) {
            self.audit(AuditEventType::CreditConsumed {
                session_id,
                participant_id: participant_id.clone(),
                credits_used,
            });
        }

        info!(participant_id = %participant_id, credits_remaining = remaining, "Credit consumed");
        self.publish(EventPayload::CreditConsumed {
            participant_id,
            credits_remaining: remaining,
        });

        if remaining > 0 {
            self.reopen_first_move(now);
            self.publish_state();
        } else {
            self.end_session(SessionEndReason::Completed, now);
            self.try_activate_next(now)?;
        }

        Ok(())
    }

    /// Nobody moved within the first-move window captured at `seq`.
    ///
    /// With someone else waiting the session is forfeited; alone in line,
    /// the participant simply gets another window.
    pub fn on_first_move_timeout(&mut self, seq: u64, now: DateTime<Local>) -> SchedulerResult<()> {
        let result = self.try_first_move_timeout(seq, now);
        self.finish(result)
    }

    fn try_first_move_timeout(&mut self, seq: u64, now: DateTime<Local>) -> SchedulerResult<()> {
        let participant_id = match &self.session {
            None => {
                debug!(seq, "First-move timer fired with no session");
                return Ok(());
            }
            Some(session) if session.is_stale(seq) || session.has_moved => {
                debug!(seq, live = session.credit_seq, "Discarding stale first-move timer");
                return Ok(());
            }
            Some(session) => session.participant_id.clone(),
        };

        // An unreadable queue must not leave the session without a timer
        let scan = self.store.list_queue();
        let others_waiting = match self.persist("scan queue", scan) {
            Some(queue) => queue.iter().any(|p| {
                p.status == ParticipantStatus::Waiting
                    && p.id != participant_id
                    && p.credits_remaining() > 0
            }),
            None => false,
        };

        if others_waiting {
            info!(participant_id = %participant_id, "No first move while others wait, ending session");
            self.end_session(SessionEndReason::NoFirstMove, now);
            self.try_activate_next(now)?;
        } else {
            debug!(participant_id = %participant_id, "Alone in line, renewing first-move window");
            self.reopen_first_move(now);
            self.publish_state();
        }

        Ok(())
    }

    fn reopen_first_move(&mut self, now: DateTime<Local>) {
        let window = self.timing.first_move_window;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.reset_cycle();
        let first_move_deadline = session.open_first_move_window(now, window);
        let seq = session.credit_seq;
        let participant_id = session.participant_id.clone();

        self.timers.cancel(TimerKind::Credit);
        self.timers.schedule(TimerKind::FirstMove, seq, window);

        self.publish(EventPayload::FirstMoveRenewed {
            participant_id,
            first_move_deadline,
        });
    }

    // Administration

    /// End the active session now, release the machine and move on
    pub fn force_end(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Local>,
    ) -> SchedulerResult<Option<ParticipantId>> {
        if self.session.is_none() {
            return Err(SchedulerError::NoActiveSession);
        }

        self.timers.cancel_all();
        self.release_all();
        self.end_session(
            SessionEndReason::Forced {
                reason: reason.into(),
            },
            now,
        );

        let result = self.try_activate_next(now);
        self.finish(result)
    }

    /// Send the active participant to the back of the line, balances intact
    pub fn requeue_active(&mut self, now: DateTime<Local>) -> SchedulerResult<Option<ParticipantId>> {
        if self.session.is_none() {
            return Err(SchedulerError::NoActiveSession);
        }

        self.end_session(SessionEndReason::Requeued, now);

        let result = self.try_activate_next(now);
        self.finish(result)
    }

    /// Open a checkout for `id`; they join the line once payment is confirmed.
    ///
    /// Returns false if the participant is already known.
    pub fn register_participant(
        &mut self,
        id: &ParticipantId,
        display_name: Option<&str>,
        now: DateTime<Local>,
    ) -> SchedulerResult<bool> {
        let display_name = display_name.unwrap_or(id.as_str());
        let created = self.store.register_participant(id, display_name, now)?;

        if created {
            info!(participant_id = %id, "Participant registered");
            self.audit(AuditEventType::ParticipantRegistered {
                participant_id: id.clone(),
            });
        } else {
            debug!(participant_id = %id, "Participant already registered");
        }
        Ok(created)
    }

    /// Record a confirmed payment and activate if the machine is free
    pub fn on_payment_confirmed(
        &mut self,
        id: &ParticipantId,
        display_name: Option<&str>,
        credits: u32,
        now: DateTime<Local>,
    ) -> SchedulerResult<PaymentOutcome> {
        let granted = cap_credits(credits, self.credits.max_per_payment);
        if granted < credits {
            warn!(participant_id = %id, requested = credits, granted, "Payment exceeds per-payment cap");
        }

        let newly_confirmed = self.store.confirm_payment(id, display_name, granted, now)?;
        if newly_confirmed {
            info!(participant_id = %id, credits = granted, "Payment confirmed");
            self.audit(AuditEventType::PaymentConfirmed {
                participant_id: id.clone(),
                credits: granted,
            });
        } else {
            debug!(participant_id = %id, "Duplicate payment confirmation ignored");
        }

        let activated = if self.session.is_none() {
            match self.try_activate_next(now) {
                Ok(activated) => activated,
                Err(e) => return self.finish(Err(e)),
            }
        } else {
            self.publish_state();
            None
        };

        self.finish(Ok(PaymentOutcome {
            credits_granted: if newly_confirmed { granted } else { 0 },
            newly_confirmed,
            activated,
        }))
    }

    /// Stop timers and release the machine ahead of process exit.
    ///
    /// The ledger keeps the participant `active`; the next boot recovery
    /// puts them back in line.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.release_all();
        if let Some(session) = &self.session {
            info!(participant_id = %session.participant_id, "Shutting down with active session");
        }
        self.publish(EventPayload::Shutdown);
    }

    fn end_session(&mut self, reason: SessionEndReason, now: DateTime<Local>) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.timers.cancel_all();
        self.next_epoch = session.credit_seq + 1;

        let result = match reason {
            SessionEndReason::Requeued => self.store.requeue_to_end(&session.participant_id, now),
            _ => self.store.set_status(&session.participant_id, ParticipantStatus::Done),
        };
        self.persist("end session", result);

        if reason == SessionEndReason::Requeued {
            self.audit(AuditEventType::ParticipantRequeued {
                participant_id: session.participant_id.clone(),
            });
        }

        let played = (now - session.started_at).to_std().unwrap_or_default();
        info!(
            participant_id = %session.participant_id,
            session_id = %session.session_id,
            reason = ?reason,
            played = %format_duration(played),
            "Session ended"
        );

        self.audit(AuditEventType::SessionEnded {
            session_id: session.session_id.clone(),
            participant_id: session.participant_id.clone(),
            reason: reason.clone(),
        });

        self.publish(EventPayload::SessionEnded {
            session_id: session.session_id,
            participant_id: session.participant_id,
            reason,
        });
    }

    // Collaborators

    /// Keep a write result, stashing the first failure for the caller
    fn persist<T>(&mut self, what: &str, result: StoreResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(error = %e, what, "Store write failed, continuing in memory");
                if self.deferred_error.is_none() {
                    self.deferred_error = Some(e);
                }
                None
            }
        }
    }

    fn finish<T>(&mut self, result: SchedulerResult<T>) -> SchedulerResult<T> {
        let deferred = self.deferred_error.take();
        match (result, deferred) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(e)) => Err(SchedulerError::Store(e)),
            (Ok(value), None) => Ok(value),
        }
    }

    fn pulse(&self, channel: u8, purpose: &str) {
        if let Err(e) = self.actuator.pulse(channel, self.actuator_config.pulse) {
            warn!(channel, purpose, error = %e, "Actuator pulse failed");
        }
    }

    fn release_all(&self) {
        if let Err(e) = self.actuator.release_all() {
            warn!(error = %e, "Actuator release failed");
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    fn publish(&self, payload: EventPayload) {
        let event = Event::new(payload);
        match self.broadcaster.publish(&event) {
            Ok(()) => {}
            Err(BroadcastError::NoSubscribers) => {
                debug!(event = event.name(), "No subscribers for event");
            }
            Err(e) => warn!(event = event.name(), error = %e, "Failed to publish event"),
        }
    }

    fn publish_state(&self) {
        self.publish(EventPayload::StateChanged(self.snapshot()));
    }
}
