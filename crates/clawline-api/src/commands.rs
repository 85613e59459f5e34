//! Command types for the clawline protocol

use clawline_util::ParticipantId;
use serde::{Deserialize, Serialize};

use crate::{API_VERSION, ControlAction, ControlOutcome, ErrorCode, HealthStatus, SchedulerSnapshot};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// The command
    pub command: Command,
}

fn default_api_version() -> u32 {
    API_VERSION
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// All commands accepted by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// A checkout was opened; the participant waits for payment as `created`
    Register {
        participant_id: ParticipantId,
        #[serde(default)]
        display_name: Option<String>,
    },

    /// The payment provider confirmed a checkout
    PaymentConfirmed {
        participant_id: ParticipantId,
        #[serde(default)]
        display_name: Option<String>,
        /// Amount paid, in currency units
        amount: f64,
    },

    /// Control input from a participant
    Control {
        participant_id: ParticipantId,
        action: ControlAction,
    },

    // Admin commands

    /// End the active session and move on
    ForceEnd { reason: String },

    /// Activate the next waiting participant if the machine is free
    ForceStartNext,

    /// Activate a specific participant, bypassing queue order
    ForceActivate { participant_id: ParticipantId },

    /// Send the active participant to the back of the line
    RequeueActive,

    /// Get the current snapshot
    GetSnapshot,

    /// Get store and actuator health
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Registered {
        /// False when the participant was already known
        newly_registered: bool,
    },
    PaymentAccepted {
        credits_granted: u32,
        /// False when this confirmation was a duplicate
        newly_confirmed: bool,
    },
    Control(ControlOutcome),
    Ended,
    Activated {
        participant_id: Option<ParticipantId>,
    },
    Requeued,
    Snapshot(SchedulerSnapshot),
    Health(HealthStatus),
    Pong,
}
