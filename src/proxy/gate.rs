//! The readers–writer gate.
//!
//! Request handlers hold the gate shared for the full lifetime of a
//! forwarded request, response body included. The reload controller holds
//! it exclusive across a rebuild/restart sequence. A pleasant side effect
//! of this discipline is that in-flight requests always complete against
//! the old generation before a rebuild begins.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How long a reader sleeps between checks while the first build is still
/// pending.
pub const FIRST_BUILD_RETRY: Duration = Duration::from_millis(100);

/// The controller's lifecycle state. All transitions happen while the gate
/// is held exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Unbuilt,
    Building,
    Starting,
    Ready,
    Failed,
    Stopping,
}

/// The service generation the proxy currently forwards to.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Monotonically increasing across successful build-and-boot cycles.
    pub generation: u64,
    /// `host:port` of the running child.
    pub authority: String,
}

/// Controller-owned mutable state, guarded by the gate.
#[derive(Debug)]
pub struct GateState {
    pub status: ServiceStatus,
    /// Flips to true at the start of the first rebuild and never back.
    pub built_once: bool,
    /// When set, handlers answer 502 with these bytes and never touch the
    /// upstream. Cleared at the start of each rebuild.
    pub error_response: Option<Bytes>,
    /// Present once any generation has passed its health check.
    pub backend: Option<Backend>,
}

impl GateState {
    /// The generation number for the next healthy backend.
    #[must_use]
    pub fn next_generation(&self) -> u64 {
        self.backend.as_ref().map_or(1, |b| b.generation + 1)
    }
}

/// Readers–writer gate over [`GateState`]. Cloning shares the same gate.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<RwLock<GateState>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(GateState {
                status: ServiceStatus::Unbuilt,
                built_once: false,
                error_response: None,
                backend: None,
            })),
        }
    }

    /// Acquire the gate shared, blocking until the first build has
    /// completed (successfully or not).
    ///
    /// The pre-first-build wait deliberately spins with the lease dropped
    /// rather than parking on a condition: the shared path stays
    /// lock-order-trivial at the cost of up to ~100 ms of latency on the
    /// very first request.
    pub async fn shared(&self) -> RwLockReadGuard<'_, GateState> {
        loop {
            let state = self.inner.read().await;
            if state.built_once {
                return state;
            }
            drop(state);
            tokio::time::sleep(FIRST_BUILD_RETRY).await;
        }
    }

    /// Like [`Gate::shared`], but the guard is `'static` so it can ride
    /// inside a streaming response body.
    pub async fn shared_owned(&self) -> OwnedRwLockReadGuard<GateState> {
        loop {
            let state = Arc::clone(&self.inner).read_owned().await;
            if state.built_once {
                return state;
            }
            drop(state);
            tokio::time::sleep(FIRST_BUILD_RETRY).await;
        }
    }

    /// Acquire the gate exclusively. Waits for all in-flight requests.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, GateState> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shared_blocks_until_first_build() {
        let gate = Gate::new();
        let acquired = Arc::new(AtomicBool::new(false));

        let reader_gate = gate.clone();
        let reader_flag = Arc::clone(&acquired);
        tokio::spawn(async move {
            let _lease = reader_gate.shared().await;
            reader_flag.store(true, Ordering::SeqCst);
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!acquired.load(Ordering::SeqCst));

        gate.exclusive().await.built_once = true;

        tokio::time::advance(FIRST_BUILD_RETRY).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shared_returns_immediately_once_built() {
        let gate = Gate::new();
        gate.exclusive().await.built_once = true;

        let state = gate.shared().await;
        assert!(state.built_once);
        assert!(state.error_response.is_none());
    }

    #[tokio::test]
    async fn test_next_generation_increments() {
        let gate = Gate::new();
        let mut state = gate.exclusive().await;
        assert_eq!(state.next_generation(), 1);
        state.backend = Some(Backend {
            generation: 1,
            authority: "localhost:9000".to_string(),
        });
        assert_eq!(state.next_generation(), 2);
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_readers() {
        let gate = Gate::new();
        gate.exclusive().await.built_once = true;

        let lease = gate.shared().await;
        let writer_gate = gate.clone();
        let writer_done = Arc::new(AtomicBool::new(false));
        let writer_flag = Arc::clone(&writer_done);
        let writer = tokio::spawn(async move {
            let _state = writer_gate.exclusive().await;
            writer_flag.store(true, Ordering::SeqCst);
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!writer_done.load(Ordering::SeqCst));

        drop(lease);
        writer.await.unwrap();
        assert!(writer_done.load(Ordering::SeqCst));
    }
}
