use std::sync::Mutex;
use std::time::Duration;

use redis::{Client, Commands, Connection, Script};
use tracing::{debug, info};

use super::BlockingConnections;
use super::scripts::{COMPLETE_NODE, REGISTER_DEPENDENCIES, parse_completion};
use crate::error::StoreError;
use crate::keyspace::Keyspace;
use crate::{Completion, CoordinationStore};

/// Coordination store backed by a Redis server.
pub struct RedisStore {
  blocking: BlockingConnections,
  conn: Mutex<Connection>,
  keyspace: Keyspace,
  register: Script,
  complete: Script,
}

impl RedisStore {
  /// Connect to the Redis server at `url`.
  pub fn connect(url: &str, keyspace: Keyspace) -> Result<Self, StoreError> {
    let client = Client::open(url)?;
    let conn = client.get_connection()?;
    info!(url, prefix = keyspace.prefix(), "connected coordination store");
    Ok(Self {
      blocking: BlockingConnections::new(client),
      conn: Mutex::new(conn),
      keyspace,
      register: Script::new(REGISTER_DEPENDENCIES),
      complete: Script::new(COMPLETE_NODE),
    })
  }

  fn hget(&self, key: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    let mut conn = self.conn.lock()?;
    Ok(redis::cmd("HGET").arg(key).arg(exec_id).query(&mut *conn)?)
  }
}

impl CoordinationStore for RedisStore {
  fn keyspace(&self) -> &Keyspace {
    &self.keyspace
  }

  fn next_exec_id(&self, task_id: &str) -> Result<u64, StoreError> {
    let mut conn = self.conn.lock()?;
    Ok(
      redis::cmd("INCR")
        .arg(self.keyspace.counter(task_id))
        .query(&mut *conn)?,
    )
  }

  fn register_dependencies(
    &self,
    task_id: &str,
    exec_id: u64,
    job: &[u8],
    dependencies: &[u64],
  ) -> Result<u64, StoreError> {
    let mut conn = self.conn.lock()?;
    let mut invocation = self.register.prepare_invoke();
    invocation
      .key(self.keyspace.jobs(task_id))
      .key(self.keyspace.pending(task_id))
      .key(self.keyspace.completed(task_id))
      .arg(exec_id)
      .arg(job)
      .arg(self.keyspace.waiters_prefix(task_id));
    for dep in dependencies {
      invocation.arg(*dep);
    }
    let pending: u64 = invocation.invoke(&mut *conn)?;
    debug!(task_id, exec_id, pending, "registered node");
    Ok(pending)
  }

  fn complete_node(
    &self,
    task_id: &str,
    exec_id: u64,
    record: &[u8],
    failed: bool,
  ) -> Result<Completion, StoreError> {
    let mut conn = self.conn.lock()?;
    let reply: Vec<Vec<u8>> = self
      .complete
      .prepare_invoke()
      .key(self.keyspace.completed(task_id))
      .key(self.keyspace.results(task_id))
      .key(self.keyspace.pending(task_id))
      .key(self.keyspace.jobs(task_id))
      .key(self.keyspace.completion(task_id, exec_id))
      .arg(exec_id)
      .arg(record)
      .arg(self.keyspace.waiters_prefix(task_id))
      .arg(if failed { "1" } else { "0" })
      .invoke(&mut *conn)?;
    parse_completion(reply)
  }

  fn load_job(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    self.hget(&self.keyspace.jobs(task_id), exec_id)
  }

  fn load_result(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    self.hget(&self.keyspace.results(task_id), exec_id)
  }

  fn push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    redis::cmd("RPUSH")
      .arg(key)
      .arg(payload)
      .query::<()>(&mut *conn)?;
    Ok(())
  }

  fn blocking_pop(
    &self,
    key: &str,
    timeout: Option<Duration>,
  ) -> Result<Option<Vec<u8>>, StoreError> {
    let popped: Option<(String, Vec<u8>)> = self.blocking.with_connection(|conn| {
      redis::cmd("BLPOP")
        .arg(key)
        .arg(super::blocking_timeout(timeout))
        .query(conn)
    })?;
    Ok(popped.map(|(_, payload)| payload))
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    redis::cmd("DEL").arg(key).query::<()>(&mut *conn)?;
    Ok(())
  }

  fn purge_task(&self, task_id: &str) -> Result<(), StoreError> {
    let mut guard = self.conn.lock()?;
    let conn = &mut *guard;
    let mut keys = vec![
      self.keyspace.counter(task_id),
      self.keyspace.jobs(task_id),
      self.keyspace.pending(task_id),
      self.keyspace.completed(task_id),
      self.keyspace.results(task_id),
    ];
    for prefix in [
      self.keyspace.waiters_prefix(task_id),
      self.keyspace.completion_prefix(task_id),
    ] {
      let matched: Vec<String> = conn.scan_match(format!("{}*", prefix))?.collect();
      keys.extend(matched);
    }
    let removed: u64 = redis::cmd("DEL").arg(&keys).query(conn)?;
    info!(task_id, removed, "purged task");
    Ok(())
  }
}
