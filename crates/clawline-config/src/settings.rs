//! Validated settings structures

use crate::schema::{RawActuator, RawConfig, RawCredits, RawServiceConfig, RawTiming};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_SECONDS: u64 = 5;
pub const DEFAULT_FIRST_MOVE_SECONDS: u64 = 30;
pub const DEFAULT_CREDIT_SECONDS: u64 = 30;
pub const DEFAULT_GRAB_FINISH_MS: u64 = 4000;
pub const DEFAULT_MAX_CREDITS_PER_PAYMENT: u32 = 5;
pub const DEFAULT_PRICE_PER_CREDIT: f64 = 1.0;
pub const DEFAULT_COIN_CHANNEL: u8 = 0;
pub const DEFAULT_GRAB_CHANNEL: u8 = 1;
pub const DEFAULT_RELEASE_CHANNEL: u8 = 2;
pub const DEFAULT_PULSE_MS: u64 = 120;

/// Validated settings ready for use by the scheduler and daemon
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub timing: TimingPolicy,
    pub credits: CreditPolicy,
    pub actuator: ActuatorConfig,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            timing: TimingPolicy::from_raw(raw.timing),
            credits: CreditPolicy::from_raw(raw.credits),
            actuator: ActuatorConfig::from_raw(raw.actuator),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub heartbeat: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(clawline_util::data_dir_without_env),
            heartbeat: Duration::from_secs(
                raw.heartbeat_seconds.unwrap_or(DEFAULT_HEARTBEAT_SECONDS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// The three windows that drive a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Grace period before the participant must move
    pub first_move_window: Duration,
    /// Length of one credit once movement starts
    pub credit_window: Duration,
    /// Remaining time after a grab before the credit is charged
    pub grab_finish_window: Duration,
}

impl TimingPolicy {
    fn from_raw(raw: RawTiming) -> Self {
        Self {
            first_move_window: Duration::from_secs(
                raw.first_move_seconds.unwrap_or(DEFAULT_FIRST_MOVE_SECONDS),
            ),
            credit_window: Duration::from_secs(
                raw.credit_seconds.unwrap_or(DEFAULT_CREDIT_SECONDS),
            ),
            grab_finish_window: Duration::from_millis(
                raw.grab_finish_ms.unwrap_or(DEFAULT_GRAB_FINISH_MS),
            ),
        }
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::from_raw(RawTiming::default())
    }
}

/// Credit pricing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditPolicy {
    pub max_per_payment: u32,
    pub price_per_credit: f64,
}

impl CreditPolicy {
    fn from_raw(raw: RawCredits) -> Self {
        Self {
            max_per_payment: raw
                .max_per_payment
                .unwrap_or(DEFAULT_MAX_CREDITS_PER_PAYMENT),
            price_per_credit: raw.price_per_credit.unwrap_or(DEFAULT_PRICE_PER_CREDIT),
        }
    }
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self::from_raw(RawCredits::default())
    }
}

/// Actuator channel mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorConfig {
    pub coin_channel: u8,
    pub grab_channel: u8,
    pub release_channel: u8,
    pub pulse: Duration,
    /// None means pulses are only logged
    pub command: Option<Vec<String>>,
}

impl ActuatorConfig {
    fn from_raw(raw: RawActuator) -> Self {
        Self {
            coin_channel: raw.coin_channel.unwrap_or(DEFAULT_COIN_CHANNEL),
            grab_channel: raw.grab_channel.unwrap_or(DEFAULT_GRAB_CHANNEL),
            release_channel: raw.release_channel.unwrap_or(DEFAULT_RELEASE_CHANNEL),
            pulse: Duration::from_millis(raw.pulse_ms.unwrap_or(DEFAULT_PULSE_MS)),
            command: raw.command,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self::from_raw(RawActuator::default())
    }
}
