//! Redis backends.
//!
//! The graph primitives run as Lua scripts so each one is a single atomic
//! step on the server. Blocking pops run on connections of their own, kept
//! in a small idle pool, so they do not hold up the shared one.

mod broker;
mod scripts;
mod store;

pub use broker::RedisBroker;
pub use store::RedisStore;

use std::sync::Mutex;
use std::time::Duration;

use redis::{Client, Connection, RedisResult};

use crate::error::StoreError;

/// Connections reserved for blocking commands.
///
/// Each call borrows an idle connection or opens a new one. A connection
/// goes back to the pool only after its command succeeded, so a broken one
/// is dropped.
struct BlockingConnections {
  client: Client,
  idle: Mutex<Vec<Connection>>,
}

impl BlockingConnections {
  fn new(client: Client) -> Self {
    Self {
      client,
      idle: Mutex::new(Vec::new()),
    }
  }

  fn with_connection<T>(
    &self,
    command: impl FnOnce(&mut Connection) -> RedisResult<T>,
  ) -> Result<T, StoreError> {
    let pooled = self.idle.lock()?.pop();
    let mut conn = match pooled {
      Some(conn) => conn,
      None => self.client.get_connection()?,
    };
    let value = command(&mut conn)?;
    self.idle.lock()?.push(conn);
    Ok(value)
  }

  #[cfg(test)]
  fn idle(&self) -> usize {
    self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
  }
}

/// Seconds argument for blocking commands. Redis reads 0 as "forever", so
/// finite timeouts are clamped to a small positive value.
fn blocking_timeout(timeout: Option<Duration>) -> f64 {
  match timeout {
    None => 0.0,
    Some(t) => t.as_secs_f64().max(0.01),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_blocking_timeout() {
    assert_eq!(blocking_timeout(None), 0.0);
    assert_eq!(blocking_timeout(Some(Duration::ZERO)), 0.01);
    assert_eq!(blocking_timeout(Some(Duration::from_millis(1500))), 1.5);
  }

  #[test]
  fn test_blocking_connections_are_reused() {
    let Ok(url) = std::env::var("REDIS_URL") else {
      return;
    };
    let pool = BlockingConnections::new(Client::open(url).unwrap());

    for _ in 0..3 {
      let pong: String = pool
        .with_connection(|conn| redis::cmd("PING").query(conn))
        .unwrap();
      assert_eq!(pong, "PONG");
    }
    assert_eq!(pool.idle(), 1);

    let failed = pool.with_connection(|conn| redis::cmd("NO-SUCH-COMMAND").query::<()>(conn));
    assert!(failed.is_err());
    assert_eq!(pool.idle(), 0);
  }
}
