//! Shared types for the clawline API

use chrono::{DateTime, Local};
use clawline_util::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted lifecycle status of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Registered at checkout, payment not yet confirmed
    Created,
    /// Paid and waiting in line
    Waiting,
    /// Holding the machine
    Active,
    /// Finished; terminal under normal operation
    Done,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Created => "created",
            ParticipantStatus::Waiting => "waiting",
            ParticipantStatus::Active => "active",
            ParticipantStatus::Done => "done",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ParticipantStatus::Created),
            "waiting" => Ok(ParticipantStatus::Waiting),
            "active" => Ok(ParticipantStatus::Active),
            "done" => Ok(ParticipantStatus::Done),
            other => Err(format!("unknown participant status '{}'", other)),
        }
    }
}

/// Control input from the participant holding the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// Any joystick movement
    Move,
    /// Drop the claw; ends the current credit early
    Grab,
}

/// What a successful control action did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// The move opened a new credit window
    CreditStarted { credit_ends_at: DateTime<Local> },
    /// The credit window was already running
    AlreadyRunning,
    /// The grab was accepted; the credit finishes at `finish_at`
    GrabAccepted { finish_at: DateTime<Local> },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEndReason {
    /// All credits were consumed
    Completed,
    /// No movement within the first-move window while others were waiting
    NoFirstMove,
    /// Administrative or shutdown override
    Forced { reason: String },
    /// Moved to the back of the line with credits intact
    Requeued,
}

/// Stable rejection codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NoActiveSession,
    GrabAlreadyUsed,
    NotActive,
    SessionAlreadyActive,
    ParticipantNotFound,
    NoCreditsRemaining,
    StoreError,
    InternalError,
}

/// One line of the queue as shown to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntryView {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub credits_remaining: u32,
}

/// Snapshot of the scheduler, published on every change and on heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub active_id: Option<ParticipantId>,
    pub session_id: Option<SessionId>,
    pub credits_remaining: Option<u32>,
    pub credit_ends_at: Option<DateTime<Local>>,
    pub first_move_deadline: Option<DateTime<Local>>,
    /// Waiting participants in queue order
    #[serde(default)]
    pub waiting: Vec<QueueEntryView>,
}

impl SchedulerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.active_id.is_none()
    }
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub store_ok: bool,
    pub actuator_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ParticipantStatus::Created,
            ParticipantStatus::Waiting,
            ParticipantStatus::Active,
            ParticipantStatus::Done,
        ] {
            assert_eq!(status.as_str().parse::<ParticipantStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ParticipantStatus>().is_err());
    }

    #[test]
    fn error_codes_are_snake_case() {
        let json = serde_json::to_string(&ErrorCode::GrabAlreadyUsed).unwrap();
        assert_eq!(json, "\"grab_already_used\"");

        let json = serde_json::to_string(&ErrorCode::NoActiveSession).unwrap();
        assert_eq!(json, "\"no_active_session\"");
    }

    #[test]
    fn end_reason_serialization() {
        let json = serde_json::to_string(&SessionEndReason::NoFirstMove).unwrap();
        assert!(json.contains("no_first_move"));

        let forced = SessionEndReason::Forced {
            reason: "jammed".into(),
        };
        let json = serde_json::to_string(&forced).unwrap();
        let parsed: SessionEndReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, forced);
    }

    #[test]
    fn empty_snapshot_is_idle() {
        assert!(SchedulerSnapshot::default().is_idle());
    }
}
