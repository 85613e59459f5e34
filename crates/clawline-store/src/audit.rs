//! Audit event types

use chrono::{DateTime, Local};
use clawline_api::SessionEndReason;
use clawline_util::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Boot recovery finished
    RecoveryCompleted {
        demoted: Vec<ParticipantId>,
        swept: Vec<ParticipantId>,
    },

    /// A checkout was opened, not yet paid
    ParticipantRegistered { participant_id: ParticipantId },

    /// A payment was confirmed and credits granted
    PaymentConfirmed {
        participant_id: ParticipantId,
        credits: u32,
    },

    /// A participant took the machine
    SessionStarted {
        session_id: SessionId,
        participant_id: ParticipantId,
        credits_remaining: u32,
        pulsed: bool,
    },

    /// One credit was charged
    CreditConsumed {
        session_id: SessionId,
        participant_id: ParticipantId,
        credits_used: u32,
    },

    /// Session ended
    SessionEnded {
        session_id: SessionId,
        participant_id: ParticipantId,
        reason: SessionEndReason,
    },

    /// Participant sent to the back of the line
    ParticipantRequeued { participant_id: ParticipantId },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: clawline_util::now(),
            event,
        }
    }
}
