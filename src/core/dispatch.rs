//! Post-write dispatch
//!
//! Create, update and delete enqueue a [`PostWriteJob`] after the response is
//! built. A bounded channel feeds a fixed pool of worker tasks that run the
//! endpoint's post-write hooks. The request never waits on them:
//!
//! - a full queue drops the job with a warning
//! - hook errors and panics are logged, never surfaced to the client
//! - [`PostWriteDispatcher::shutdown`] closes the queue and waits for the
//!   workers to drain it

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::hooks::{Hooks, Operation, RequestContext};

/// Default number of post-write workers per endpoint
pub const DEFAULT_WORKERS: usize = 2;

/// Default post-write queue capacity per endpoint
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One unit of post-write work
#[derive(Debug, Clone)]
pub struct PostWriteJob<M> {
    pub operation: Operation,
    pub context: RequestContext,
    /// The model as persisted (or as deleted)
    pub snapshot: M,
}

/// Anything that can be drained on server shutdown
#[async_trait]
pub trait Drain: Send + Sync {
    async fn drain(&self);
}

/// Bounded worker pool running post-write hooks
///
/// Workers are spawned on the first dispatch, so an endpoint can be built
/// outside a Tokio runtime.
pub struct PostWriteDispatcher<M: Send + Sync + 'static> {
    hooks: Arc<Hooks<M>>,
    workers: usize,
    sender: Mutex<Option<mpsc::Sender<PostWriteJob<M>>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PostWriteJob<M>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<M: Send + Sync + 'static> PostWriteDispatcher<M> {
    pub fn new(hooks: Arc<Hooks<M>>, workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            hooks,
            workers: workers.max(1),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Enqueue a job without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, job: PostWriteJob<M>) -> bool {
        if self.hooks.post_write.len(job.operation) == 0 {
            return false;
        }

        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            warn!(operation = %job.operation, "post-write queue closed, dropping job");
            return false;
        };

        self.ensure_started();

        match sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    operation = %job.operation,
                    request_id = %job.context.request_id,
                    "post-write queue full, dropping job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(operation = %job.operation, "post-write queue closed, dropping job");
                false
            }
        }
    }

    fn ensure_started(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(mut handles) = self.handles.lock() else {
            return;
        };
        for worker in 0..self.workers {
            let receiver = self.receiver.clone();
            let hooks = self.hooks.clone();
            handles.push(tokio::spawn(worker_loop(worker, receiver, hooks)));
        }
        debug!(workers = self.workers, "post-write workers started");
    }

    /// Close the queue and wait until every accepted job has run
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "post-write worker ended abnormally");
            }
        }
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> Drain for PostWriteDispatcher<M> {
    async fn drain(&self) {
        self.shutdown().await;
    }
}

async fn worker_loop<M: Send + Sync + 'static>(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PostWriteJob<M>>>>,
    hooks: Arc<Hooks<M>>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let outcome = AssertUnwindSafe(run_job(&hooks, &job)).catch_unwind().await;
        if outcome.is_err() {
            warn!(
                worker,
                operation = %job.operation,
                request_id = %job.context.request_id,
                "post-write hook panicked"
            );
        }
    }
    debug!(worker, "post-write worker stopped");
}

async fn run_job<M: Send + Sync + 'static>(hooks: &Hooks<M>, job: &PostWriteJob<M>) {
    for hook in hooks.post_write.get(job.operation) {
        if let Err(e) = hook.run(&job.context, job.operation, &job.snapshot).await {
            warn!(
                operation = %job.operation,
                request_id = %job.context.request_id,
                code = e.code,
                error = %e,
                "post-write hook failed"
            );
            break;
        }
    }
}
