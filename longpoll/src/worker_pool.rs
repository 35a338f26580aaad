use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Processes jobs taken off a [`WorkerPool`] queue.
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J);
}

#[derive(thiserror::Error, Debug)]
pub enum SubmitError<J> {
    /// The backlog is at capacity. The job is handed back so the caller can
    /// answer it.
    #[error("worker pool backlog is full")]
    Full(J),

    #[error("worker pool is shut down")]
    Closed(J),
}

/// Fixed number of worker tasks reading from a bounded backlog.
///
/// Submission never waits: when the backlog is full the job is rejected
/// immediately. At most `workers + queue_size` jobs are in flight.
pub struct WorkerPool<J> {
    tx: async_channel::Sender<J>,
    queue_size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(workers: usize, queue_size: usize, handler: Arc<dyn JobHandler<J>>) -> Self {
        let (tx, rx) = async_channel::bounded::<J>(queue_size);

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    while let Ok(job) = rx.recv().await {
                        handler.handle(job).await;
                    }
                    tracing::debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        WorkerPool {
            tx,
            queue_size,
            workers: Mutex::new(handles),
        }
    }

    pub fn try_submit(&self, job: J) -> Result<(), SubmitError<J>> {
        self.tx.try_send(job).map_err(|e| match e {
            async_channel::TrySendError::Full(job) => SubmitError::Full(job),
            async_channel::TrySendError::Closed(job) => SubmitError::Closed(job),
        })
    }

    /// Jobs waiting for a worker.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stops accepting jobs and waits for the workers to finish the backlog.
    pub async fn shutdown(&self) {
        self.tx.close();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker panicked");
            }
        }
    }
}
