//! lrt, a live reloading proxy for Go HTTP services.
//!
//! lrt sits between your browser and a Go service you are editing. It builds
//! the service with `go build`, runs it on a private port with `PORT` set,
//! and reverse-proxies requests to it. Whenever a source file in the
//! service's transitive dependency graph changes, lrt rebuilds and restarts
//! the service while holding inbound requests, so the client never observes
//! a broken or stale backend. Compile errors and boot failures are served as
//! `502 Bad Gateway` responses carrying the diagnostics.
//!
//! # Architecture
//!
//! - [`config`]: CLI argument resolution and validation
//! - [`error`]: error types, hints, and the fatal-exit path
//! - [`watcher`]: filesystem watching and change debouncing
//! - [`build`]: `go build` / `go list` drivers and dependency resolution
//! - [`service`]: child process supervision and health probing
//! - [`proxy`]: the request gate and the reverse proxy
//! - [`controller`]: the reload state machine tying it all together

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod build;
pub mod config;
pub mod controller;
pub mod error;
pub mod observability;
pub mod proxy;
pub mod service;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
