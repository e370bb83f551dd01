//! The request gate and the reverse proxy.
//!
//! This module provides:
//! - The readers–writer gate serializing request forwarding against
//!   rebuilds, including the pre-first-build blocking behavior
//! - The transparent single-upstream reverse proxy, including 502 error
//!   surfacing

mod forward;
mod gate;

pub use forward::{router, serve, ProxyState};
pub use gate::{Backend, Gate, GateState, ServiceStatus, FIRST_BUILD_RETRY};
