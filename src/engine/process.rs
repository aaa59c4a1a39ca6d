//! The worker pool: a bounded queue of jobs drained by a fixed number of
//! workers. On shutdown new jobs are refused, already-queued jobs drain up to
//! a deadline, and whatever is still in flight afterwards is aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{Instrument, Span};

use crate::engine::event::Job;
use crate::engine::handlers;
use crate::engine::EngineContext;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is shut down")]
    Closed,
}

/// Sending half of the job queue. Cheap to clone; ingress and handlers that
/// re-enter the engine (post-merge cherry-picks) hold one.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl JobQueue {
    /// Attempts to enqueue without blocking. Ingress never waits on a full
    /// queue; it falls back to synchronous execution or replies 503.
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(job).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Number of jobs currently waiting in the queue.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// A queue whose receiving half is gone; every enqueue fails with
    /// [`EnqueueError::Closed`]. Used by tests to force inline execution.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(true)),
        }
    }
}

pub struct WorkerPool {
    closed: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

/// Spawns the workers and returns the queue they drain.
pub fn start_workers(
    ctx: Arc<EngineContext>,
    queue_size: usize,
    worker_count: usize,
) -> (JobQueue, WorkerPool) {
    let (tx, rx) = mpsc::channel::<Job>(queue_size.max(1));
    let queue = JobQueue {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
    };
    let rx = Arc::new(Mutex::new(rx));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = (0..worker_count.max(1))
        .map(|index| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            let rx = rx.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                worker_loop(index, ctx, queue, rx, shutdown_rx).await;
            })
        })
        .collect();

    let pool = WorkerPool {
        closed: queue.closed.clone(),
        shutdown_tx,
        workers,
    };
    (queue, pool)
}

impl WorkerPool {
    /// Refuses new jobs, signals the workers, and waits for them to drain the
    /// queue up to the grace period. Jobs still running afterwards are
    /// aborted.
    pub async fn shutdown(mut self, grace: Duration) {
        self.closed.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(true);
        let drained = futures::future::join_all(self.workers.iter_mut());
        if tokio::time::timeout(grace, drained).await.is_err() {
            tracing::warn!("Workers did not drain within {grace:?}; aborting");
            for worker in &self.workers {
                worker.abort();
            }
        }
    }
}

/// Workers take turns waiting on the shared receiver; each job is processed by
/// exactly one worker. The receiver lock is only held while waiting, never
/// while a job runs.
async fn worker_loop(
    index: usize,
    ctx: Arc<EngineContext>,
    queue: JobQueue,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => None,
                job = rx.recv() => job,
            }
        };
        match job {
            // Failures are already logged inside the job span.
            Some(job) => {
                let _ = process_job(&ctx, queue.clone(), job).await;
            }
            None => break,
        }
    }

    // Drain jobs that were already queued, without waiting for new ones.
    loop {
        let job = rx.lock().await.try_recv().ok();
        match job {
            Some(job) => {
                let _ = process_job(&ctx, queue.clone(), job).await;
            }
            None => break,
        }
    }
    tracing::debug!("Worker {index} shut down");
}

/// Runs one job inside its correlation span and records the job metrics.
/// Every job goes through here, whether dequeued by a worker or executed
/// inline by ingress. The error is returned so inline callers can surface it.
pub(crate) async fn process_job(
    ctx: &EngineContext,
    queue: JobQueue,
    job: Job,
) -> anyhow::Result<()> {
    let event = &job.event;
    let span = tracing::info_span!(
        "Job",
        repo = %event.repository,
        pr = %event.pr_number,
        delivery = %event.delivery_id,
    );
    match handlers::handle_job(ctx, queue, job)
        .instrument(span.clone())
        .await
    {
        Ok(()) => {
            ctx.metrics.record_job_processed();
            Ok(())
        }
        Err(error) => {
            ctx.metrics.record_job_failed();
            handle_root_error(span, &error);
            Err(error)
        }
    }
}

#[allow(unused_variables)]
fn handle_root_error(span: Span, error: &anyhow::Error) {
    // In tests, we want to panic on all errors.
    #[cfg(test)]
    {
        panic!("Job handler failed: {error:?}");
    }
    #[cfg(not(test))]
    {
        use crate::utils::logging::LogError;
        span.log_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::event::{Event, EventPayload, Job};
    use crate::platform::{PlatformKind, PrComment, RepoName};
    use crate::tests::mock::test_engine_context;

    fn comment_job(body: &str) -> Job {
        Job::new(Event {
            platform: PlatformKind::Github,
            repository: RepoName::new("acme", "widget"),
            pr_number: 1.into(),
            sender: "alice".to_string(),
            delivery_id: "d-1".to_string(),
            payload: EventPayload::Comment(PrComment {
                id: 1,
                author: "alice".to_string(),
                body: body.to_string(),
            }),
        })
    }

    #[test]
    fn queue_reports_full() {
        let (tx, _rx) = mpsc::channel::<Job>(1);
        let queue = JobQueue {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        queue.try_enqueue(comment_job("/help")).unwrap();
        assert!(matches!(
            queue.try_enqueue(comment_job("/help")),
            Err(EnqueueError::Full)
        ));
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn detached_queue_is_closed() {
        let queue = JobQueue::detached();
        assert!(matches!(
            queue.try_enqueue(comment_job("/help")),
            Err(EnqueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn workers_drain_the_queue_on_shutdown() {
        let (ctx, mock) = test_engine_context();
        mock.add_comment("alice", "/help");
        let ctx = Arc::new(ctx);
        let (queue, pool) = start_workers(ctx, 8, 2);
        queue.try_enqueue(comment_job("/help")).unwrap();
        queue.try_enqueue(comment_job("/help")).unwrap();
        pool.shutdown(Duration::from_secs(5)).await;
        // Both jobs were processed before the pool stopped.
        assert_eq!(mock.posted_comments().len(), 2);
        assert!(matches!(
            queue.try_enqueue(comment_job("/help")),
            Err(EnqueueError::Closed)
        ));
    }
}
