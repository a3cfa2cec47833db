//! Fixed-size worker pool fed by a bounded queue.
//!
//! `submit` only enqueues and hands back a [`JobHandle`]; a full queue makes
//! the submitter wait. Cancellation is observed at submission only: jobs
//! already queued or running finish normally.

use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A unit of work run by the pool.
#[async_trait]
pub trait Job: Send + 'static {
    type Output: Send + 'static;

    /// Label used in logs.
    fn label(&self) -> String;

    async fn run(self) -> Result<Self::Output>;
}

type Envelope<J> = (J, oneshot::Sender<Result<<J as Job>::Output>>);

/// Future resolving to a submitted job's result.
#[derive(Debug)]
pub struct JobHandle<T> {
    label: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransferError::Worker(format!(
                "job {} ended without reporting a result",
                self.label
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// N long-lived workers pulling jobs from a shared bounded queue.
pub struct WorkerPool<J: Job> {
    tx: async_channel::Sender<Envelope<J>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Job> WorkerPool<J> {
    /// Start `workers` workers (at least one) with a queue of twice that capacity.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self::with_capacity(workers, workers * 2)
    }

    pub fn with_capacity(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = async_channel::bounded::<Envelope<J>>(capacity.max(1));

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    while let Ok((job, reply)) = rx.recv().await {
                        let label = job.label();
                        debug!("worker {} running {}", worker_id, label);
                        let result = job.run().await;
                        if reply.send(result).is_err() {
                            debug!("result for {} dropped by submitter", label);
                        }
                    }
                })
            })
            .collect();

        Self {
            tx,
            workers: handles,
        }
    }

    /// Enqueue a job, waiting while the queue is full.
    ///
    /// Fails with [`TransferError::Cancelled`] if `cancel` fires before the
    /// job is accepted.
    pub async fn submit(&self, job: J, cancel: &CancellationToken) -> Result<JobHandle<J::Output>> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let label = job.label();
        let (reply, rx) = oneshot::channel();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            sent = self.tx.send((job, reply)) => {
                sent.map_err(|_| TransferError::Worker("worker pool is shut down".into()))?;
                Ok(JobHandle { label, rx })
            }
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        self.tx.close();
        for handle in self.workers {
            if let Err(e) = handle.await {
                debug!("worker exited abnormally: {}", e);
            }
        }
    }
}
