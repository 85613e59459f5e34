//! Store trait definitions

use chrono::{DateTime, Local};
use clawline_api::{ParticipantStatus, QueueEntryView};
use clawline_util::ParticipantId;
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// A participant as persisted in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub credits_total: u32,
    /// Never exceeds `credits_total`
    pub credits_used: u32,
    /// Set once the coin pulses for this participant have been issued
    pub credits_pulsed: bool,
    pub status: ParticipantStatus,
    /// Queue position: join time, or the last requeue-to-end time
    pub ordered_at: DateTime<Local>,
}

impl Participant {
    pub fn credits_remaining(&self) -> u32 {
        self.credits_total.saturating_sub(self.credits_used)
    }

    pub fn to_queue_view(&self) -> QueueEntryView {
        QueueEntryView {
            participant_id: self.id.clone(),
            display_name: self.display_name.clone(),
            credits_remaining: self.credits_remaining(),
        }
    }
}

/// The persisted, ordered queue ledger
pub trait QueueStore: Send + Sync {
    // Participants

    /// Register a participant at checkout with status `created`.
    /// Returns false if the participant already exists.
    fn register_participant(
        &self,
        id: &ParticipantId,
        display_name: &str,
        at: DateTime<Local>,
    ) -> StoreResult<bool>;

    /// Record a confirmed payment: inserts or promotes the participant to
    /// `waiting` with `credits` granted. Returns false when the payment was
    /// already confirmed (the participant is past `created`).
    fn confirm_payment(
        &self,
        id: &ParticipantId,
        display_name: Option<&str>,
        credits: u32,
        at: DateTime<Local>,
    ) -> StoreResult<bool>;

    /// Fetch one participant
    fn get_participant(&self, id: &ParticipantId) -> StoreResult<Option<Participant>>;

    /// All `waiting` or `active` participants in queue order
    fn list_queue(&self) -> StoreResult<Vec<Participant>>;

    /// All participants with the given status in queue order
    fn list_by_status(&self, status: ParticipantStatus) -> StoreResult<Vec<Participant>>;

    /// Set a participant's status
    fn set_status(&self, id: &ParticipantId, status: ParticipantStatus) -> StoreResult<()>;

    /// Add to `credits_used`, clamped to `credits_total`. Returns the new value.
    fn increment_used(&self, id: &ParticipantId, by: u32) -> StoreResult<u32>;

    /// Set `credits_pulsed`. Returns true only the first time.
    fn mark_pulsed(&self, id: &ParticipantId) -> StoreResult<bool>;

    /// Move a participant to the back of the line as `waiting`, balances untouched
    fn requeue_to_end(&self, id: &ParticipantId, at: DateTime<Local>) -> StoreResult<()>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
