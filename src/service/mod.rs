//! Child service supervision.
//!
//! This module provides:
//! - Ephemeral port allocation for each service generation
//! - Process lifecycle: start, health probing, graceful stop, reaping

mod port;
mod supervisor;

pub use port::allocate;
pub use supervisor::{Boot, Supervisor, STOP_GRACE};
