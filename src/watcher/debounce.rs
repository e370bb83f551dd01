//! Trailing-edge debouncing of change signals.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Quiet period after the last change signal before a rebuild is scheduled.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

/// Collapses bursts of triggers into single invocations of an action.
///
/// The first trigger arms a timer; triggers arriving before it fires reset
/// it; expiry runs the action once and disarms. The action is awaited to
/// completion before the next cycle can fire, so triggers arriving while it
/// runs arm a fresh cycle, and at most one invocation is ever pending.
pub struct Debouncer {
    triggers: mpsc::UnboundedSender<()>,
}

impl Debouncer {
    /// Spawn the debounce task around `action`.
    pub fn new<F, Fut>(interval: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (triggers, mut rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let mut deadline = Instant::now() + interval;
                loop {
                    tokio::select! {
                        () = time::sleep_until(deadline) => break,
                        more = rx.recv() => match more {
                            Some(()) => deadline = Instant::now() + interval,
                            None => break,
                        },
                    }
                }
                action().await;
            }
        });

        Self { triggers }
    }

    /// Record a change signal. Cheap; callable from any context.
    pub fn trigger(&self) {
        let _ = self.triggers.send(());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_debouncer(interval: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let debouncer = Debouncer::new(interval, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (debouncer, count)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_invocation() {
        let (debouncer, count) = counting_debouncer(Duration::from_millis(100));

        for _ in 0..5 {
            debouncer.trigger();
        }
        settle().await;

        time::advance(Duration::from_millis(99)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // No further invocations without further triggers.
        time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_resets_pending_timer() {
        let (debouncer, count) = counting_debouncer(Duration::from_millis(100));

        debouncer.trigger();
        settle().await;
        time::advance(Duration::from_millis(60)).await;
        settle().await;

        debouncer.trigger();
        settle().await;
        time::advance(Duration::from_millis(60)).await;
        settle().await;
        // 120 ms after the first trigger, but only 60 ms after the second.
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_millis(41)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_action_rearms() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(100), move || {
            let counter = Arc::clone(&counter);
            async move {
                // A slow action: triggers arriving now must schedule one
                // (and only one) follow-up invocation.
                time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        debouncer.trigger();
        settle().await;
        time::advance(Duration::from_millis(100)).await;
        settle().await;

        // Action is mid-sleep; queue two more triggers.
        debouncer.trigger();
        debouncer.trigger();
        settle().await;

        time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The queued triggers arm a fresh cycle after completion.
        time::advance(Duration::from_millis(100)).await;
        settle().await;
        time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
