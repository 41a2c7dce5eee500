//! Graph errors.

use std::time::Duration;

use tessera_codec::CodecError;
use tessera_store::StoreError;

/// Errors raised while building a graph node.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("codec error: {0}")]
  Codec(#[from] CodecError),

  /// The operator tag is not in the session's registry.
  #[error("unknown operator '{kind}'")]
  UnknownOperator { kind: String },

  /// An operator tag was registered twice.
  #[error("operator '{kind}' is already registered")]
  DuplicateOperator { kind: String },

  /// A reference that does not point to an earlier node of the task.
  #[error("node {exec_id} cannot depend on node {reference}: references must point to earlier nodes")]
  InvalidReference { exec_id: u64, reference: u64 },

  /// Constructor arguments must be literal values.
  #[error("constructor arguments of '{kind}' must not contain node references")]
  RefInConstructor { kind: String },

  /// Operators required by a deployment are not registered.
  #[error("missing operators: {}", kinds.join(", "))]
  MissingOperators { kinds: Vec<String> },

  /// An operand is a detached future that failed to build.
  #[error("operand failed to build: {message}")]
  DetachedOperand { message: String },

  /// The configured backend was not compiled in.
  #[error("backend '{backend}' is not available in this build")]
  BackendUnavailable { backend: &'static str },
}

/// Errors raised while waiting on a node future.
#[derive(Debug, thiserror::Error)]
pub enum FutureError {
  /// The node completed with an error record.
  #[error("node {exec_id} failed: {message}")]
  Failed { exec_id: u64, message: String },

  #[error("node {exec_id} did not complete within {waited:?}")]
  Timeout { exec_id: u64, waited: Duration },

  /// The future was never attached to a node because building it failed.
  #[error("node was never built: {message}")]
  Detached { message: String },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("codec error: {0}")]
  Codec(#[from] CodecError),
}

/// Errors raised by an operator's `compute`.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
  #[error("missing argument '{name}'")]
  MissingArgument { name: String },

  #[error("invalid argument '{name}': {message}")]
  InvalidArgument { name: String, message: String },

  #[error("{message}")]
  Failed { message: String },

  #[error("unknown operator '{kind}'")]
  UnknownOperator { kind: String },

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("codec error: {0}")]
  Codec(#[from] CodecError),

  /// Building a nested node failed.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// Waiting on a nested node failed.
  #[error(transparent)]
  Future(#[from] FutureError),
}

impl OperatorError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidArgument {
      name: name.into(),
      message: message.into(),
    }
  }
}

/// Message carried by a panic payload caught with `catch_unwind`.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::panic;

  #[test]
  fn test_panic_message() {
    let literal = panic::catch_unwind(|| panic!("static message")).unwrap_err();
    assert_eq!(panic_message(&*literal), "static message");

    let formatted = panic::catch_unwind(|| panic!("node {}", 7)).unwrap_err();
    assert_eq!(panic_message(&*formatted), "node 7");

    let opaque = panic::catch_unwind(|| panic::panic_any(42u8)).unwrap_err();
    assert_eq!(panic_message(&*opaque), "unknown panic");
  }
}
