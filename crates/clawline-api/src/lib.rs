//! Protocol types for clawline
//!
//! This crate defines the stable shapes exchanged with the outside world:
//! - Commands (payment confirmations, control input, admin overrides)
//! - Responses and error codes
//! - Events published to realtime observers
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
