//! File system watching and change debouncing.
//!
//! This module provides:
//! - Directory watching using notify-rs, filtered to Go source files
//! - An append-only watch set (directories are never unsubscribed)
//! - A trailing-edge debouncer that collapses change bursts into single
//!   rebuild triggers

mod debounce;
mod filter;
#[allow(clippy::module_inception)]
mod watcher;

pub use debounce::{Debouncer, DEBOUNCE_INTERVAL};
pub use filter::is_relevant;
pub use watcher::{SourceWatcher, WatchSignal};
