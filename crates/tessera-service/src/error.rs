use std::time::Duration;

use tessera_graph::{CodecError, OperatorError};
use tessera_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
  /// The service ran and reported a failure.
  #[error("service '{service_id}' failed: {message}")]
  Remote { service_id: String, message: String },

  #[error("service '{service_id}' did not reply within {waited:?}")]
  Timeout { service_id: String, waited: Duration },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("codec error: {0}")]
  Codec(#[from] CodecError),

  /// A request on the service queue could not be decoded.
  #[error("malformed request: {message}")]
  MalformedRequest { message: String },
}

impl From<ServiceError> for OperatorError {
  fn from(e: ServiceError) -> Self {
    match e {
      ServiceError::Store(e) => OperatorError::Store(e),
      ServiceError::Codec(e) => OperatorError::Codec(e),
      other => OperatorError::failed(other.to_string()),
    }
  }
}
