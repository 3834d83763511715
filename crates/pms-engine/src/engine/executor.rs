//! Shared worker pool.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::TRACING_TARGET_ENGINE;

/// Runs engine work on tokio tasks, at most `max_concurrent_tasks` at once.
///
/// Work is never run on the submitting task, so delivering one node's
/// completion never blocks on another node's work.
#[derive(Debug, Clone)]
pub(crate) struct Executor {
    semaphore: Arc<Semaphore>,
    handle: Handle,
}

impl Executor {
    pub(crate) fn new(max_concurrent_tasks: usize, handle: Handle) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            handle,
        }
    }

    /// Runs `work` once a permit is available.
    pub(crate) fn spawn(&self, work: BoxFuture<'static, ()>) {
        let semaphore = Arc::clone(&self.semaphore);
        self.handle.spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => work.await,
                Err(_) => tracing::warn!(target: TRACING_TARGET_ENGINE, "worker pool closed, task dropped"),
            }
        });
    }

    /// Runs `work` after `delay`. No permit is held while sleeping.
    pub(crate) fn spawn_after(&self, delay: Duration, work: BoxFuture<'static, ()>) {
        let executor = self.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            executor.spawn(work);
        });
    }

    /// Returns the number of idle permits.
    pub(crate) fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let executor = Executor::new(2, Handle::current());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            executor.spawn(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    let _ = done_tx.send(());
                }
                .boxed(),
            );
        }

        for _ in 0..8 {
            done_rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.available_permits(), 2);
    }

    #[tokio::test]
    async fn delayed_work_runs() {
        let executor = Executor::new(1, Handle::current());
        let (tx, rx) = oneshot::channel();
        executor.spawn_after(
            Duration::from_millis(10),
            async move {
                let _ = tx.send(());
            }
            .boxed(),
        );
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
    }
}
