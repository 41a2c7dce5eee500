use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::{Client, Connection};
use tracing::{debug, info};

use super::BlockingConnections;

use crate::error::StoreError;
use crate::keyspace::Keyspace;
use crate::{Broker, Delivery};

/// Broker backed by Redis lists.
///
/// Consumers move messages atomically from the queue into a per-consumer
/// processing list (`BRPOPLPUSH`) and remove them on acknowledgement, so a
/// crashed consumer's messages can be pushed back with [`Broker::recover`].
pub struct RedisBroker {
  blocking: BlockingConnections,
  conn: Mutex<Connection>,
  keyspace: Keyspace,
  next_tag: AtomicU64,
}

impl RedisBroker {
  pub fn connect(url: &str, keyspace: Keyspace) -> Result<Self, StoreError> {
    let client = Client::open(url)?;
    let conn = client.get_connection()?;
    info!(url, prefix = keyspace.prefix(), "connected broker");
    Ok(Self {
      blocking: BlockingConnections::new(client),
      conn: Mutex::new(conn),
      keyspace,
      next_tag: AtomicU64::new(1),
    })
  }
}

impl Broker for RedisBroker {
  fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    redis::cmd("LPUSH")
      .arg(self.keyspace.queue(destination))
      .arg(payload)
      .query::<()>(&mut *conn)?;
    Ok(())
  }

  fn consume(
    &self,
    destination: &str,
    consumer: &str,
    timeout: Duration,
  ) -> Result<Option<Delivery>, StoreError> {
    let queue = self.keyspace.queue(destination);
    let processing = self.keyspace.processing(destination, consumer);
    let payload: Option<Vec<u8>> = self.blocking.with_connection(|conn| {
      redis::cmd("BRPOPLPUSH")
        .arg(&queue)
        .arg(&processing)
        .arg(super::blocking_timeout(Some(timeout)))
        .query(conn)
    })?;

    Ok(payload.map(|payload| Delivery {
      destination: destination.to_string(),
      consumer: consumer.to_string(),
      tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
      payload,
    }))
  }

  fn ack(&self, delivery: &Delivery) -> Result<(), StoreError> {
    let mut conn = self.conn.lock()?;
    redis::cmd("LREM")
      .arg(
        self
          .keyspace
          .processing(&delivery.destination, &delivery.consumer),
      )
      .arg(1)
      .arg(&delivery.payload)
      .query::<()>(&mut *conn)?;
    Ok(())
  }

  fn recover(&self, destination: &str, consumer: &str) -> Result<usize, StoreError> {
    let mut conn = self.conn.lock()?;
    let processing = self.keyspace.processing(destination, consumer);
    let queue = self.keyspace.queue(destination);

    let mut count = 0;
    loop {
      let moved: Option<Vec<u8>> = redis::cmd("RPOPLPUSH")
        .arg(&processing)
        .arg(&queue)
        .query(&mut *conn)?;
      if moved.is_none() {
        break;
      }
      count += 1;
    }
    debug!(destination, consumer, count, "recovered unacknowledged deliveries");
    Ok(count)
  }
}
