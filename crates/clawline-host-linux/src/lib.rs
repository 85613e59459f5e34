//! Linux actuator adapter for clawline
//!
//! Provides:
//! - Pulse helper invocation from an argv template
//! - Strict one-at-a-time ordering of pulses
//! - Process group isolation and timeout kill for stuck helpers

mod actuator;
mod process;

pub use actuator::*;
pub use process::*;
