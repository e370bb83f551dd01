//! File system watcher using notify-rs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::filter;
use crate::error::WatchError;
use crate::Result;

/// A signal emitted by the watcher's event callback.
#[derive(Debug)]
pub enum WatchSignal {
    /// A relevant source file changed.
    Changed(PathBuf),
    /// The notification backend reported an error. These are unrecoverable
    /// and terminate the controller.
    Error(notify::Error),
}

/// Watches the directories of the target package and its dependencies.
///
/// Directories are subscribed non-recursively; the dependency graph supplies
/// every directory explicitly. The watch set only ever grows: a directory
/// once watched stays watched for the rest of the run.
pub struct SourceWatcher {
    inner: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl SourceWatcher {
    /// Create a watcher whose relevant events are forwarded on `signals`.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification backend cannot be initialized.
    pub fn new(signals: mpsc::UnboundedSender<WatchSignal>) -> Result<Self> {
        let inner = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for path in &event.paths {
                        if filter::is_relevant(path, &event.kind) {
                            let _ = signals.send(WatchSignal::Changed(path.clone()));
                        }
                    }
                }
                Err(err) => {
                    let _ = signals.send(WatchSignal::Error(err));
                }
            }
        })
        .map_err(WatchError::Init)?;

        Ok(Self {
            inner,
            watched: HashSet::new(),
        })
    }

    /// Subscribe to a directory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription fails; file-descriptor
    /// exhaustion carries a hint about raising the open-file limit.
    pub fn watch(&mut self, dir: &Path) -> Result<()> {
        if self.watched.contains(dir) {
            return Ok(());
        }
        self.inner
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Subscribe {
                path: dir.to_path_buf(),
                source,
            })?;
        self.watched.insert(dir.to_path_buf());
        tracing::debug!(dir = %dir.display(), "watching");
        Ok(())
    }

    /// Number of directories currently watched.
    #[must_use]
    pub fn watched_len(&self) -> usize {
        self.watched.len()
    }
}
