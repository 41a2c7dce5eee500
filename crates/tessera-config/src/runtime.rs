use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to the dependents of a node whose operator failed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Dependents receive an error record naming the failed dependency and are
  /// never dispatched.
  #[default]
  Propagate,

  /// Dependents stay pending forever; only the failed node has a record.
  Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
  /// Number of worker threads the CLI starts.
  pub concurrency: usize,

  /// Consumer name used for crash recovery. Defaults to `worker-<pid>`.
  pub consumer: Option<String>,

  pub failure_policy: FailurePolicy,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      concurrency: 4,
      consumer: None,
      failure_policy: FailurePolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
  /// How long a service call waits for its reply. Unset waits forever.
  pub rpc_timeout_ms: Option<u64>,
}

impl ServiceConfig {
  pub fn rpc_timeout(&self) -> Option<Duration> {
    self.rpc_timeout_ms.map(Duration::from_millis)
  }
}
