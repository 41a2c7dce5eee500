use std::sync::PoisonError;

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The backend rejected or failed an operation.
  #[error("backend error: {message}")]
  Backend { message: String },

  /// The requested object does not exist.
  #[error("not found: {bucket}/{key}")]
  NotFound { bucket: String, key: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A lock guarding in-memory state was poisoned by a panicking thread.
  #[error("lock poisoned")]
  Poisoned,

  /// The backend answered with something this client cannot interpret.
  #[error("invalid backend reply: {message}")]
  InvalidReply { message: String },

  #[cfg(feature = "redis")]
  #[error("redis error: {0}")]
  Redis(#[from] ::redis::RedisError),
}

impl StoreError {
  pub fn backend(message: impl Into<String>) -> Self {
    Self::Backend {
      message: message.into(),
    }
  }
}

impl<T> From<PoisonError<T>> for StoreError {
  fn from(_: PoisonError<T>) -> Self {
    Self::Poisoned
  }
}
