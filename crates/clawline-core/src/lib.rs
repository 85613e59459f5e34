//! Session scheduler and credit state machine for clawline
//!
//! This crate is the heart of clawline, containing:
//! - The single Active Session and its per-credit state machine
//!   (first-move window -> credit window -> consumed -> next credit or end)
//! - Epoch-guarded timers: every timer captures the session's credit
//!   sequence and is discarded if the sequence has moved on
//! - Boot recovery of persisted state after a restart
//! - The scheduler service that serializes every mutation through one task

mod credits;
mod error;
mod recovery;
mod scheduler;
mod service;
mod session;
mod timer;

pub use credits::*;
pub use error::*;
pub use recovery::*;
pub use scheduler::*;
pub use service::*;
pub use session::*;
pub use timer::*;
