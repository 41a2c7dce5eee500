//! Worker errors.

use tessera_store::StoreError;

/// Errors that stop a worker. Operator failures are not errors here; they
/// become error records.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  /// A backend failed. The worker re-queues its unacknowledged deliveries
  /// and retries; a run of these in a row stops it.
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("codec error: {0}")]
  Codec(#[from] tessera_graph::CodecError),

  /// The delivery is not a decodable job.
  #[error("malformed job: {message}")]
  MalformedJob { message: String },

  #[error("failed to spawn worker thread: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("worker thread panicked")]
  ThreadPanicked,
}
