use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TesseraConfig;

/// Backend for the coordination store and the broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
  /// In-process maps and queues. Only useful when clients and workers share
  /// one process.
  #[default]
  Memory,

  /// A Redis server shared by every client, worker and service host.
  Redis { url: String },
}

/// Backend for operator payloads moved by object reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
  #[default]
  Memory,

  /// Objects are files under `root/<bucket>/<key>`.
  Fs { root: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompressionConfig {
  /// Compress newly written blobs with zstd.
  pub enabled: bool,

  /// zstd compression level.
  pub level: i32,
}

impl Default for CompressionConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      level: 3,
    }
  }
}

impl TesseraConfig {
  /// zstd level for writers, or `None` when compression is off.
  pub fn codec_level(&self) -> Option<i32> {
    self
      .compression
      .enabled
      .then_some(self.compression.level)
  }
}
