//! Tessera Store
//!
//! This crate provides the backend traits that the graph runtime coordinates
//! through, together with their implementations.
//!
//! - [`CoordinationStore`]: per-task node counters, the two atomic graph
//!   primitives ([`CoordinationStore::register_dependencies`] and
//!   [`CoordinationStore::complete_node`]), result records, and single-item
//!   blocking lists used for completion signals and service replies.
//! - [`Broker`]: durable competing-consumer queues. A consumed delivery stays
//!   owned by its consumer until acknowledged and can be recovered after a
//!   crash.
//! - [`ObjectStore`]: opaque payloads addressed by bucket and key.
//!
//! ```text
//!   builder ──register_dependencies──▶ ┌──────────────────┐
//!      │                               │ CoordinationStore│◀──complete_node── worker
//!      └──publish (pending == 0)──┐    └──────────────────┘                    ▲
//!                                 ▼                                            │
//!                            ┌────────┐         consume / ack                  │
//!                            │ Broker │ ───────────────────────────────────────┘
//!                            └────────┘
//! ```
//!
//! Every backend has an in-memory implementation for single-process use and
//! tests. With the `redis` feature (on by default) the coordination store and
//! the broker can also live in Redis, where both graph primitives run as Lua
//! scripts.

mod error;
mod fs;
mod keyspace;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use error::StoreError;
pub use fs::FsObjectStore;
pub use keyspace::Keyspace;
pub use memory::{InMemoryBroker, InMemoryObjectStore, InMemoryStore};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBroker, RedisStore};

use std::time::Duration;

/// A node whose last dependency just completed, ready to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyNode {
  pub exec_id: u64,
  /// The job blob stored at registration.
  pub job: Vec<u8>,
}

/// Outcome of [`CoordinationStore::complete_node`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
  /// Waiters whose pending count reached zero. Only filled on success.
  pub ready: Vec<ReadyNode>,

  /// Waiters that were still incomplete when a failed node completed. Their
  /// pending counts are left untouched.
  pub orphaned: Vec<u64>,

  /// The node had already completed; nothing was changed.
  pub duplicate: bool,
}

impl Completion {
  pub(crate) fn duplicate() -> Self {
    Self {
      duplicate: true,
      ..Self::default()
    }
  }
}

/// Shared coordination state for every task.
pub trait CoordinationStore: Send + Sync {
  /// Key layout used by this store.
  fn keyspace(&self) -> &Keyspace;

  /// Allocate the next exec id of a task. The first id is 1.
  fn next_exec_id(&self, task_id: &str) -> Result<u64, StoreError>;

  /// Atomically persist a job and register it as a waiter of each dependency
  /// that has not completed yet. Returns the number of such dependencies.
  ///
  /// `dependencies` must not contain duplicates. Registering a node again
  /// (a worker deferring a job whose dependency resolved to an unfinished
  /// node) replaces its job and pending count.
  fn register_dependencies(
    &self,
    task_id: &str,
    exec_id: u64,
    job: &[u8],
    dependencies: &[u64],
  ) -> Result<u64, StoreError>;

  /// Atomically record a node's result, push its completion signal, and
  /// consume its waiter set.
  ///
  /// On success every waiter's pending count is decremented and the ones that
  /// reach zero are returned as ready. When `failed` is set the incomplete
  /// waiters are returned as orphaned instead. A node that already completed
  /// yields a duplicate completion and no side effects.
  fn complete_node(
    &self,
    task_id: &str,
    exec_id: u64,
    record: &[u8],
    failed: bool,
  ) -> Result<Completion, StoreError>;

  fn load_job(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError>;

  fn load_result(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError>;

  /// Append an item to a list.
  fn push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError>;

  /// Pop the first item of a list, waiting up to `timeout` (forever if
  /// `None`) for one to arrive.
  fn blocking_pop(&self, key: &str, timeout: Option<Duration>)
  -> Result<Option<Vec<u8>>, StoreError>;

  fn delete(&self, key: &str) -> Result<(), StoreError>;

  /// Wait up to `timeout` for a node's completion signal. Returns whether a
  /// signal was consumed. Each signal wakes exactly one waiter.
  fn wait_completion(
    &self,
    task_id: &str,
    exec_id: u64,
    timeout: Duration,
  ) -> Result<bool, StoreError> {
    let key = self.keyspace().completion(task_id, exec_id);
    Ok(self.blocking_pop(&key, Some(timeout))?.is_some())
  }

  /// Remove every key belonging to a task.
  fn purge_task(&self, task_id: &str) -> Result<(), StoreError>;
}

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
  pub destination: String,
  pub consumer: String,
  pub tag: u64,
  pub payload: Vec<u8>,
}

/// Durable queues with competing consumers and explicit acknowledgement.
pub trait Broker: Send + Sync {
  fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), StoreError>;

  /// Take the next message for `consumer`, waiting up to `timeout`.
  fn consume(
    &self,
    destination: &str,
    consumer: &str,
    timeout: Duration,
  ) -> Result<Option<Delivery>, StoreError>;

  /// Mark a delivery as fully processed.
  fn ack(&self, delivery: &Delivery) -> Result<(), StoreError>;

  /// Return every unacknowledged delivery of `consumer` to the queue.
  fn recover(&self, destination: &str, consumer: &str) -> Result<usize, StoreError>;
}

/// Opaque payload storage addressed by bucket and key.
pub trait ObjectStore: Send + Sync {
  fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError>;

  /// Fetch an object. Missing objects are [`StoreError::NotFound`].
  fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

  /// Delete an object. Deleting a missing object is not an error.
  fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

  fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;
}
