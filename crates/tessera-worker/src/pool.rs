use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tessera_graph::{Backends, OperatorRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::WorkerError;
use crate::worker::{Worker, WorkerOptions, WorkerStats};

/// A fixed number of workers on OS threads sharing one set of backends.
///
/// Each thread consumes as `{consumer}-{index}`, so a restarted pool with the
/// same base name recovers its predecessors' unacknowledged deliveries. A
/// worker that stops with an error cancels the whole pool, and the error is
/// returned from [`WorkerPool::join`].
pub struct WorkerPool {
  handles: Vec<JoinHandle<Result<WorkerStats, WorkerError>>>,
  cancel: CancellationToken,
}

impl WorkerPool {
  pub fn spawn(
    backends: Backends,
    registry: Arc<OperatorRegistry>,
    options: WorkerOptions,
    concurrency: usize,
    cancel: CancellationToken,
  ) -> Result<Self, WorkerError> {
    let concurrency = concurrency.max(1);
    let mut handles = Vec::with_capacity(concurrency);

    for index in 0..concurrency {
      let worker = Worker::new(
        backends.clone(),
        registry.clone(),
        WorkerOptions {
          consumer: format!("{}-{}", options.consumer, index),
          failure_policy: options.failure_policy,
        },
      );
      let cancel = cancel.clone();
      let handle = thread::Builder::new()
        .name(format!("tessera-worker-{}", index))
        .spawn(move || {
          let result = worker.run(&cancel);
          if let Err(e) = &result {
            error!(consumer = %worker.consumer(), error = %e, "worker failed, stopping pool");
            cancel.cancel();
          }
          result
        })
        .map_err(WorkerError::Spawn)?;
      handles.push(handle);
    }

    info!(concurrency, consumer = %options.consumer, "worker pool started");
    Ok(Self { handles, cancel })
  }

  /// Token that stops every worker in the pool.
  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }

  /// Wait for every worker to stop and merge their counters. The first
  /// worker error is returned after all threads have been joined.
  pub fn join(self) -> Result<WorkerStats, WorkerError> {
    let mut stats = WorkerStats::default();
    let mut first_error = None;

    for handle in self.handles {
      let result = handle.join().unwrap_or(Err(WorkerError::ThreadPanicked));
      match result {
        Ok(worker_stats) => stats.merge(worker_stats),
        Err(e) => {
          first_error.get_or_insert(e);
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(stats),
    }
  }

  /// Cancel every worker and wait for them to stop.
  pub fn shutdown(self) -> Result<WorkerStats, WorkerError> {
    self.cancel.cancel();
    self.join()
  }
}
