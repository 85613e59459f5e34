//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Session timing windows
    #[serde(default)]
    pub timing: RawTiming,

    /// Credit pricing
    #[serde(default)]
    pub credits: RawCredits,

    /// Actuator wiring
    #[serde(default)]
    pub actuator: RawActuator,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the queue database
    pub data_dir: Option<PathBuf>,

    /// Snapshot re-publish interval
    pub heartbeat_seconds: Option<u64>,
}

/// Session timing
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTiming {
    /// Grace period before the first move
    pub first_move_seconds: Option<u64>,

    /// Length of one credit
    pub credit_seconds: Option<u64>,

    /// Time allowed for the claw to finish after a grab
    pub grab_finish_ms: Option<u64>,
}

/// Credit pricing
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCredits {
    /// Cap on credits granted by a single payment
    pub max_per_payment: Option<u32>,

    /// Currency units per credit
    pub price_per_credit: Option<f64>,
}

/// Actuator channel mapping
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawActuator {
    pub coin_channel: Option<u8>,
    pub grab_channel: Option<u8>,
    pub release_channel: Option<u8>,
    pub pulse_ms: Option<u64>,

    /// Pulse helper argv; `{channel}` and `{duration_ms}` are substituted
    pub command: Option<Vec<String>>,
}
