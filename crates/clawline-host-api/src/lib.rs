//! Collaborator interfaces for clawline
//!
//! This crate defines the boundary between the scheduler and the outside
//! world it drives: the machine's pulse interface and the realtime
//! broadcaster. It contains no hardware code itself.

mod broadcast;
mod mock;
mod traits;

pub use broadcast::*;
pub use mock::*;
pub use traits::*;
