//! Shared utilities for clawline
//!
//! This crate provides:
//! - ID types (ParticipantId, SessionId)
//! - Wall-clock time with a debug-build override
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
