//! Configuration management for lrt.
//!
//! Raw CLI values are collected by clap in `main.rs`, then resolved and
//! validated here exactly once at startup. The resulting [`Config`] is
//! immutable for the lifetime of the process.

mod settings;

pub use settings::{Config, HostPort, RawConfig};
