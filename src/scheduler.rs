//! Bounded-concurrency execution of batch jobs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::batcher::Batch;
use crate::job::{BatchCompletion, JobRunner};

/// Counts batches currently holding a permit and the highest count seen
#[derive(Debug, Default)]
pub struct ActivityGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActivityGauge {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }
}

struct ActiveGuard(Arc<ActivityGauge>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs one task per batch; at most `max_concurrent` of them are past the
/// permit gate at any moment.
pub struct Scheduler {
    runner: JobRunner,
    permits: Arc<Semaphore>,
    gauge: Arc<ActivityGauge>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: JobRunner, max_concurrent: usize, cancel: CancellationToken) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!("🔧 Scheduler ready with {} concurrent jobs", max_concurrent);

        Self {
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            gauge: Arc::new(ActivityGauge::default()),
            cancel,
        }
    }

    /// Spawn every batch. Each completion is sent on `tx` as soon as its
    /// batch reaches a terminal state; the channel closes once all tasks and
    /// the caller's sender are gone.
    pub fn dispatch(
        &self,
        batches: Vec<Batch>,
        tx: mpsc::Sender<BatchCompletion>,
    ) -> Vec<JoinHandle<()>> {
        let total = batches.len();

        batches
            .into_iter()
            .map(|batch| {
                let runner = self.runner.clone();
                let permits = Arc::clone(&self.permits);
                let gauge = Arc::clone(&self.gauge);
                let cancel = self.cancel.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = permits.acquire_owned() => permit.ok(),
                    };

                    let completion = match permit {
                        Some(permit) => {
                            let active = gauge.enter();
                            debug!(
                                "📦 Batch {}/{} started ({} files)",
                                batch.id(),
                                total,
                                batch.len()
                            );
                            let completion = runner.run(&batch).await;
                            // Leave the gauge before the permit can pass to another batch
                            drop(active);
                            drop(permit);
                            completion
                        }
                        None => BatchCompletion::cancelled(&batch),
                    };

                    if let Err(e) = tx.send(completion).await {
                        error!("Failed to send result for batch {}: {}", e.0.batch_id, e);
                    }
                })
            })
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}
