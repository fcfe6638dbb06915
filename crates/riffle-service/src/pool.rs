// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-size worker pool shared by every transport.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Why a worker slot could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// All workers stayed busy for the whole wait.
    #[error("all {workers} workers busy for {waited:?}")]
    Busy {
        /// Pool size.
        workers: usize,
        /// How long the caller waited.
        waited: Duration,
    },
    /// Pool was closed during shutdown.
    #[error("worker pool closed")]
    Closed,
}

impl From<PoolError> for tonic::Status {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Busy { .. } => tonic::Status::resource_exhausted(err.to_string()),
            PoolError::Closed => tonic::Status::unavailable(err.to_string()),
        }
    }
}

/// Bounds in-flight calls; clones share the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    workers: usize,
    wait: Duration,
}

impl WorkerPool {
    /// Pool of `workers` slots; callers wait at most `wait` for one.
    pub fn new(workers: usize, wait: Duration) -> Self {
        let workers = workers.max(1);
        Self {
            slots: Arc::new(Semaphore::new(workers)),
            workers,
            wait,
        }
    }

    /// Take a slot, released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        match tokio::time::timeout(self.wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => Err(PoolError::Busy {
                workers: self.workers,
                waited: self.wait,
            }),
        }
    }

    /// Pool size.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Refuse all future acquisitions.
    pub fn close(&self) {
        self.slots.close();
    }
}
