//! Provisioning queue.
//!
//! Tasks run strictly in enqueue order, one at a time. A task body that fails
//! or panics is logged and dropped; the worker moves on to the next task.
//! Nothing is persisted: pending tasks are lost when the process exits, which
//! is why servers left `Queued` are re-enqueued at startup.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A deferred unit of provisioning work.
pub struct ProvisionTask {
    label: String,
    delay: Duration,
    job: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl ProvisionTask {
    pub fn new<F, Fut>(label: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            delay: Duration::ZERO,
            job: Box::new(move || Box::pin(job())),
        }
    }

    /// Wait `delay` after the task reaches the head of the queue before
    /// running it. The worker stays occupied during the wait.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl std::fmt::Debug for ProvisionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionTask")
            .field("label", &self.label)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Serialised execution of provisioning work.
pub trait ProvisionQueue: Send + Sync {
    fn enqueue(&self, task: ProvisionTask);

    /// Tasks enqueued but not yet finished, including the running one.
    fn pending(&self) -> usize;
}

/// Single tokio worker fed by an unbounded channel.
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<ProvisionTask>,
    pending: Arc<watch::Sender<usize>>,
}

impl InProcessQueue {
    /// Spawn the worker. Must be called from within a tokio runtime; the
    /// worker exits once the queue is dropped and the backlog is done.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        tokio::spawn(run_worker(rx, pending.clone()));
        Self { tx, pending }
    }

    pub fn is_idle(&self) -> bool {
        *self.pending.borrow() == 0
    }

    /// Resolve once every enqueued task has finished.
    pub async fn drain(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl ProvisionQueue for InProcessQueue {
    fn enqueue(&self, task: ProvisionTask) {
        let label = task.label.clone();
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(task).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            error!(task = %label, "provision worker is gone, task dropped");
            return;
        }
        debug!(task = %label, pending = *self.pending.borrow(), "provision task enqueued");
    }

    fn pending(&self) -> usize {
        *self.pending.borrow()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<ProvisionTask>, pending: Arc<watch::Sender<usize>>) {
    while let Some(task) = rx.recv().await {
        let ProvisionTask { label, delay, job } = task;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        info!(task = %label, "provision task started");
        // own tokio task so a panic in the body is contained
        match tokio::spawn(async move { job().await }).await {
            Ok(Ok(())) => info!(task = %label, "provision task finished"),
            Ok(Err(e)) => error!(task = %label, error = %e, "provision task failed"),
            Err(e) => error!(task = %label, error = %e, "provision task panicked"),
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    debug!("provision worker stopped");
}
