//! Worker Pool
//!
//! A fixed set of background tasks fed through a bounded queue. Acceptors
//! hand connections off with `submit` and go straight back to accepting.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Unit of work run by the pool
type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bounded worker pool
pub struct WorkerPool {
    /// Pool name (for logging)
    name: String,
    /// Queue feeding the workers
    sender: mpsc::Sender<Job>,
    /// Worker task handles
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing a queue of `queue_capacity` jobs
    pub fn new(name: impl Into<String>, workers: usize, queue_capacity: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let pool_name = name.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for the next job
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    tracing::trace!("{} worker {} stopped", pool_name, worker_id);
                })
            })
            .collect();

        Self {
            name,
            sender,
            workers,
        }
    }

    /// Queue a job, waiting for space if the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(Box::pin(job))
            .await
            .map_err(|_| Error::Internal(format!("{} worker pool stopped", self.name)))
    }

    /// Number of worker tasks
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
