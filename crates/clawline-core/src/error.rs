//! Scheduler rejections

use clawline_api::ErrorCode;
use clawline_store::StoreError;
use clawline_util::ParticipantId;
use thiserror::Error;

/// Why a scheduler operation was refused or only partly persisted
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Grab already used for this credit")]
    GrabAlreadyUsed,

    #[error("Participant {0} does not hold the machine")]
    NotActive(ParticipantId),

    #[error("A session is already active")]
    SessionAlreadyActive,

    #[error("Participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    #[error("Participant {0} has no credits remaining")]
    NoCreditsRemaining(ParticipantId),

    /// The transition completed in memory but a store write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler service stopped")]
    ServiceStopped,
}

impl SchedulerError {
    /// Stable code for responses
    pub fn code(&self) -> ErrorCode {
        match self {
            SchedulerError::NoActiveSession => ErrorCode::NoActiveSession,
            SchedulerError::GrabAlreadyUsed => ErrorCode::GrabAlreadyUsed,
            SchedulerError::NotActive(_) => ErrorCode::NotActive,
            SchedulerError::SessionAlreadyActive => ErrorCode::SessionAlreadyActive,
            SchedulerError::ParticipantNotFound(_) => ErrorCode::ParticipantNotFound,
            SchedulerError::NoCreditsRemaining(_) => ErrorCode::NoCreditsRemaining,
            SchedulerError::Store(_) => ErrorCode::StoreError,
            SchedulerError::ServiceStopped => ErrorCode::InternalError,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
