//! Tessera Config
//!
//! This crate contains the serializable runtime configuration for tessera
//! processes: which backends to connect to, how blobs are encoded, and how
//! workers and service clients behave.
//!
//! Configuration is loaded from a JSON file (the CLI defaults to
//! `~/.tessera/config.json`). Every field has a default, so an empty object or
//! a missing file yields a runnable in-memory setup.

mod backend;
mod runtime;

pub use backend::{BackendConfig, CompressionConfig, ObjectStoreConfig};
pub use runtime::{FailurePolicy, ServiceConfig, WorkerConfig};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The configuration file could not be read.
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),

  /// The configuration is not valid JSON for [`TesseraConfig`].
  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Top-level configuration for a tessera process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TesseraConfig {
  /// Coordination store and broker backend.
  pub backend: BackendConfig,

  /// Prefix for every coordination-store key.
  pub key_prefix: String,

  /// Broker destination that carries ready jobs.
  pub dispatch_queue: String,

  pub compression: CompressionConfig,

  /// How often blocked futures and worker loops recheck state, in milliseconds.
  pub poll_interval_ms: u64,

  pub object_store: ObjectStoreConfig,

  pub worker: WorkerConfig,

  pub service: ServiceConfig,
}

impl Default for TesseraConfig {
  fn default() -> Self {
    Self {
      backend: BackendConfig::default(),
      key_prefix: "tessera".to_string(),
      dispatch_queue: "tessera.jobs".to_string(),
      compression: CompressionConfig::default(),
      poll_interval_ms: 500,
      object_store: ObjectStoreConfig::default(),
      worker: WorkerConfig::default(),
      service: ServiceConfig::default(),
    }
  }
}

impl TesseraConfig {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Load configuration from a JSON file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_json_str(&contents)
  }

  /// Load configuration from a JSON file, falling back to defaults if the file
  /// does not exist.
  pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    match std::fs::read_to_string(path) {
      Ok(contents) => Self::from_json_str(&contents),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
      Err(e) => Err(e.into()),
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::path::PathBuf;

  #[test]
  fn test_defaults() {
    let config = TesseraConfig::from_json_str("{}").unwrap();
    assert_eq!(config, TesseraConfig::default());
    assert_eq!(config.backend, BackendConfig::Memory);
    assert_eq!(config.key_prefix, "tessera");
    assert_eq!(config.dispatch_queue, "tessera.jobs");
    assert!(!config.compression.enabled);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.worker.concurrency, 4);
    assert_eq!(config.worker.failure_policy, FailurePolicy::Propagate);
    assert_eq!(config.service.rpc_timeout(), None);
  }

  #[test]
  fn test_partial_json_keeps_other_defaults() {
    let config = TesseraConfig::from_json_str(
      r#"{
        "backend": { "type": "redis", "url": "redis://127.0.0.1:6380/2" },
        "compression": { "enabled": true },
        "object_store": { "type": "fs", "root": "/var/lib/tessera/objects" },
        "worker": { "failure_policy": "hold" },
        "service": { "rpc_timeout_ms": 2500 }
      }"#,
    )
    .unwrap();

    assert_eq!(
      config.backend,
      BackendConfig::Redis {
        url: "redis://127.0.0.1:6380/2".to_string()
      }
    );
    assert_eq!(config.compression.level, 3);
    assert_eq!(config.codec_level(), Some(3));
    assert_eq!(
      config.object_store,
      ObjectStoreConfig::Fs {
        root: PathBuf::from("/var/lib/tessera/objects")
      }
    );
    assert_eq!(config.worker.failure_policy, FailurePolicy::Hold);
    assert_eq!(config.worker.concurrency, 4);
    assert_eq!(config.service.rpc_timeout(), Some(Duration::from_millis(2500)));
  }

  #[test]
  fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "key_prefix": "staging", "poll_interval_ms": 50 }}"#).unwrap();

    let config = TesseraConfig::load(file.path()).unwrap();
    assert_eq!(config.key_prefix, "staging");
    assert_eq!(config.poll_interval(), Duration::from_millis(50));
  }

  #[test]
  fn test_load_or_default_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = TesseraConfig::load_or_default(dir.path().join("absent.json")).unwrap();
    assert_eq!(config, TesseraConfig::default());
  }

  #[test]
  fn test_invalid_json() {
    let err = TesseraConfig::from_json_str(r#"{ "backend": { "type": "carrier-pigeon" } }"#)
      .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }
}
