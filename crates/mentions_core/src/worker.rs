//! Bounded worker pool for blocking storage work.
//!
//! # Responsibility
//! - Run preference loads and writes off the calling context.
//! - Refuse work instead of blocking when the queue is full.
//!
//! # Invariants
//! - `submit` never blocks.
//! - A panicking job is logged and does not take its worker down.
//! - Dropping the pool drains queued jobs, then joins every worker.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerError {
    /// Queue at capacity; the job was not accepted.
    QueueFull { capacity: usize },
    /// Workers are gone.
    ShutDown,
    /// Worker thread could not be spawned.
    Spawn,
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull { capacity } => {
                write!(f, "worker queue is full (capacity {capacity})")
            }
            Self::ShutDown => write!(f, "worker pool is shut down"),
            Self::Spawn => write!(f, "failed to spawn worker thread"),
        }
    }
}

impl Error for WorkerError {}

pub struct StoreWorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl StoreWorkerPool {
    /// Spawns `threads` workers sharing a queue of `capacity` jobs.
    pub fn new(threads: usize, capacity: usize) -> Result<Self, WorkerError> {
        let threads = threads.max(1);
        let capacity = capacity.max(1);
        let (job_tx, job_rx) = bounded::<Job>(capacity);

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let job_rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("mentions-store-{index}"))
                .spawn(move || run_worker(job_rx))
                .map_err(|err| {
                    error!(
                        "event=worker_spawn module=worker status=error index={} error={}",
                        index, err
                    );
                    WorkerError::Spawn
                })?;
            workers.push(handle);
        }

        info!(
            "event=worker_pool_start module=worker status=ok threads={} capacity={}",
            threads, capacity
        );
        Ok(Self {
            job_tx: Some(job_tx),
            workers,
            capacity,
        })
    }

    /// Queues `job` without blocking.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), WorkerError> {
        let Some(job_tx) = self.job_tx.as_ref() else {
            return Err(WorkerError::ShutDown);
        };
        match job_tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WorkerError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::ShutDown),
        }
    }

    /// Jobs accepted but not yet picked up.
    pub fn queued(&self) -> usize {
        self.job_tx.as_ref().map_or(0, Sender::len)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

fn run_worker(job_rx: Receiver<Job>) {
    for job in job_rx.iter() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("event=worker_job module=worker status=panic");
        }
    }
}

impl Drop for StoreWorkerPool {
    fn drop(&mut self) {
        // Closing the sender ends each worker's receive loop.
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreWorkerPool, WorkerError};
    use crossbeam_channel::{bounded, unbounded};
    use std::time::Duration;

    #[test]
    fn jobs_run_on_worker_threads() {
        let pool = StoreWorkerPool::new(2, 8).unwrap();
        let (done_tx, done_rx) = unbounded();
        for value in 0..4 {
            let done_tx = done_tx.clone();
            pool.submit(move || {
                let _ = done_tx.send(value * 10);
            })
            .unwrap();
        }

        let mut results: Vec<_> = (0..4)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 10, 20, 30]);
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let pool = StoreWorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);

        pool.submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        pool.submit(|| {}).unwrap();
        assert_eq!(
            pool.submit(|| {}),
            Err(WorkerError::QueueFull { capacity: 1 })
        );
        drop(release_tx);
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = StoreWorkerPool::new(1, 4).unwrap();
        let (done_tx, done_rx) = bounded(1);
        pool.submit(|| panic!("job failure")).unwrap();
        pool.submit(move || {
            let _ = done_tx.send(());
        })
        .unwrap();
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
