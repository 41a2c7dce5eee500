use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::StoreError;
use crate::{Broker, Delivery};

#[derive(Debug, Default)]
struct BrokerState {
  next_tag: u64,
  ready: HashMap<String, VecDeque<Vec<u8>>>,
  /// (destination, consumer) -> tag -> payload
  unacked: HashMap<(String, String), BTreeMap<u64, Vec<u8>>>,
}

/// In-process broker with per-consumer unacknowledged sets.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
  state: Mutex<BrokerState>,
  available: Condvar,
}

impl InMemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of messages waiting in a destination, excluding unacknowledged
  /// deliveries.
  pub fn depth(&self, destination: &str) -> Result<usize, StoreError> {
    let state = self.state.lock()?;
    Ok(state.ready.get(destination).map_or(0, VecDeque::len))
  }

  /// Number of deliveries handed out on a destination and not yet acknowledged.
  pub fn in_flight(&self, destination: &str) -> Result<usize, StoreError> {
    let state = self.state.lock()?;
    Ok(
      state
        .unacked
        .iter()
        .filter(|((dest, _), _)| dest == destination)
        .map(|(_, pending)| pending.len())
        .sum(),
    )
  }
}

impl Broker for InMemoryBroker {
  fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), StoreError> {
    let mut state = self.state.lock()?;
    state
      .ready
      .entry(destination.to_string())
      .or_default()
      .push_back(payload.to_vec());
    self.available.notify_all();
    Ok(())
  }

  fn consume(
    &self,
    destination: &str,
    consumer: &str,
    timeout: Duration,
  ) -> Result<Option<Delivery>, StoreError> {
    let state = self.state.lock()?;
    super::wait_for(&self.available, state, Some(timeout), |state| {
      let payload = state.ready.get_mut(destination)?.pop_front()?;
      state.next_tag += 1;
      let tag = state.next_tag;
      state
        .unacked
        .entry((destination.to_string(), consumer.to_string()))
        .or_default()
        .insert(tag, payload.clone());
      Some(Delivery {
        destination: destination.to_string(),
        consumer: consumer.to_string(),
        tag,
        payload,
      })
    })
  }

  fn ack(&self, delivery: &Delivery) -> Result<(), StoreError> {
    let mut state = self.state.lock()?;
    let key = (delivery.destination.clone(), delivery.consumer.clone());
    if let Some(pending) = state.unacked.get_mut(&key) {
      pending.remove(&delivery.tag);
      if pending.is_empty() {
        state.unacked.remove(&key);
      }
    }
    Ok(())
  }

  fn recover(&self, destination: &str, consumer: &str) -> Result<usize, StoreError> {
    let mut state = self.state.lock()?;
    let key = (destination.to_string(), consumer.to_string());
    let Some(pending) = state.unacked.remove(&key) else {
      return Ok(0);
    };

    let count = pending.len();
    let queue = state.ready.entry(destination.to_string()).or_default();
    // Oldest delivery ends up first in line.
    for (_, payload) in pending.into_iter().rev() {
      queue.push_front(payload);
    }
    debug!(destination, consumer, count, "recovered unacknowledged deliveries");
    self.available.notify_all();
    Ok(count)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SHORT: Duration = Duration::from_millis(10);

  #[test]
  fn test_competing_consumers_each_get_one() {
    let broker = InMemoryBroker::new();
    broker.publish("jobs", b"a").unwrap();
    broker.publish("jobs", b"b").unwrap();

    let first = broker.consume("jobs", "w1", SHORT).unwrap().unwrap();
    let second = broker.consume("jobs", "w2", SHORT).unwrap().unwrap();
    assert_eq!(first.payload, b"a");
    assert_eq!(second.payload, b"b");
    assert!(broker.consume("jobs", "w1", SHORT).unwrap().is_none());
  }

  #[test]
  fn test_unacked_deliveries_are_recovered() {
    let broker = InMemoryBroker::new();
    broker.publish("jobs", b"a").unwrap();
    broker.publish("jobs", b"b").unwrap();

    let a = broker.consume("jobs", "w1", SHORT).unwrap().unwrap();
    let b = broker.consume("jobs", "w1", SHORT).unwrap().unwrap();
    broker.ack(&b).unwrap();
    assert_eq!(broker.in_flight("jobs").unwrap(), 1);

    assert_eq!(broker.recover("jobs", "w2").unwrap(), 0);
    assert_eq!(broker.recover("jobs", "w1").unwrap(), 1);

    let again = broker.consume("jobs", "w1", SHORT).unwrap().unwrap();
    assert_eq!(again.payload, a.payload);
    assert_ne!(again.tag, a.tag);
  }

  #[test]
  fn test_consume_waits_for_publish() {
    let broker = std::sync::Arc::new(InMemoryBroker::new());
    let consumer = {
      let broker = broker.clone();
      std::thread::spawn(move || broker.consume("jobs", "w1", Duration::from_secs(5)).unwrap())
    };
    broker.publish("jobs", b"late").unwrap();
    assert_eq!(consumer.join().unwrap().unwrap().payload, b"late");
  }
}
