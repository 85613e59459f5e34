//! Actuator and broadcaster traits

use clawline_api::Event;
use std::time::Duration;
use thiserror::Error;

/// Errors from the hardware actuator
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Pulse failed on channel {channel}: {message}")]
    PulseFailed { channel: u8, message: String },

    #[error("Release failed: {0}")]
    ReleaseFailed(String),

    #[error("Actuator unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Errors from the realtime broadcaster
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("No subscribers")]
    NoSubscribers,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// The machine's physical pulse interface.
///
/// Calls must return promptly: implementations hand the pulse to a driver and
/// do not wait for it to complete. The scheduler logs errors and carries on.
pub trait Actuator: Send + Sync {
    /// Pulse `channel` for `duration`
    fn pulse(&self, channel: u8, duration: Duration) -> ActuatorResult<()>;

    /// Stop every output. Safe to call repeatedly.
    fn release_all(&self) -> ActuatorResult<()>;

    /// Optional: check if the actuator is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Publishes events to realtime observers.
///
/// Must not block; failures are reported to the caller, who logs them.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: &Event) -> BroadcastResult<()>;
}

/// Actuator that only logs; used when no pulse helper is configured
#[derive(Debug, Default)]
pub struct LogActuator;

impl Actuator for LogActuator {
    fn pulse(&self, channel: u8, duration: Duration) -> ActuatorResult<()> {
        tracing::info!(channel, duration_ms = duration.as_millis() as u64, "Pulse (log only)");
        Ok(())
    }

    fn release_all(&self) -> ActuatorResult<()> {
        tracing::info!("Release all (log only)");
        Ok(())
    }
}
