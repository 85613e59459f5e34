//! Event types published to realtime observers

use chrono::{DateTime, Local};
use clawline_util::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

use crate::{API_VERSION, SchedulerSnapshot, SessionEndReason};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: clawline_util::now(),
            payload,
        }
    }

    /// Channel name for transports that route by event name
    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// All events published by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full snapshot (after every transition and on heartbeat)
    StateChanged(SchedulerSnapshot),

    /// A participant took the machine
    SessionStarted {
        session_id: SessionId,
        participant_id: ParticipantId,
        display_name: String,
        credits_remaining: u32,
        first_move_deadline: DateTime<Local>,
    },

    /// A credit window opened
    CreditStarted {
        participant_id: ParticipantId,
        credit_ends_at: DateTime<Local>,
    },

    /// A grab truncated the running credit window
    GrabAccepted {
        participant_id: ParticipantId,
        finish_at: DateTime<Local>,
    },

    /// One credit was charged
    CreditConsumed {
        participant_id: ParticipantId,
        credits_remaining: u32,
    },

    /// The participant has a fresh first-move window
    FirstMoveRenewed {
        participant_id: ParticipantId,
        first_move_deadline: DateTime<Local>,
    },

    /// The session is over
    SessionEnded {
        session_id: SessionId,
        participant_id: ParticipantId,
        reason: SessionEndReason,
    },

    /// Service is shutting down
    Shutdown,
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::StateChanged(_) => "state_changed",
            EventPayload::SessionStarted { .. } => "session_started",
            EventPayload::CreditStarted { .. } => "credit_started",
            EventPayload::GrabAccepted { .. } => "grab_accepted",
            EventPayload::CreditConsumed { .. } => "credit_consumed",
            EventPayload::FirstMoveRenewed { .. } => "first_move_renewed",
            EventPayload::SessionEnded { .. } => "session_ended",
            EventPayload::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::SessionStarted {
            session_id: SessionId::new(),
            participant_id: ParticipantId::new("cs_1"),
            display_name: "Ada".into(),
            credits_remaining: 3,
            first_move_deadline: clawline_util::now(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"session_started\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::SessionStarted { .. }));
    }

    #[test]
    fn event_name_matches_serde_tag() {
        let event = Event::new(EventPayload::CreditConsumed {
            participant_id: ParticipantId::new("cs_1"),
            credits_remaining: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], event.name());
    }
}
