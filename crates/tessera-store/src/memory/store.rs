use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::StoreError;
use crate::keyspace::Keyspace;
use crate::{Completion, CoordinationStore, ReadyNode};

#[derive(Debug, Default)]
struct NodeSlot {
  job: Option<Vec<u8>>,
  pending: u64,
  waiters: BTreeSet<u64>,
  result: Option<Vec<u8>>,
  completed: bool,
}

#[derive(Debug, Default)]
struct TaskArena {
  counter: u64,
  nodes: HashMap<u64, NodeSlot>,
}

#[derive(Debug, Default)]
struct State {
  tasks: HashMap<String, TaskArena>,
  lists: HashMap<String, VecDeque<Vec<u8>>>,
}

impl State {
  fn arena(&mut self, task_id: &str) -> &mut TaskArena {
    self.tasks.entry(task_id.to_string()).or_default()
  }

  fn push(&mut self, key: &str, payload: Vec<u8>) {
    self
      .lists
      .entry(key.to_string())
      .or_default()
      .push_back(payload);
  }

  fn pop(&mut self, key: &str) -> Option<Vec<u8>> {
    let list = self.lists.get_mut(key)?;
    let item = list.pop_front();
    if list.is_empty() {
      self.lists.remove(key);
    }
    item
  }
}

/// Coordination store held entirely in process memory.
///
/// Clients and workers must share one instance (behind an `Arc`) to see each
/// other's state.
#[derive(Debug, Default)]
pub struct InMemoryStore {
  keyspace: Keyspace,
  state: Mutex<State>,
  changed: Condvar,
}

impl InMemoryStore {
  pub fn new(keyspace: Keyspace) -> Self {
    Self {
      keyspace,
      state: Mutex::new(State::default()),
      changed: Condvar::new(),
    }
  }

  /// Number of items in a list. Missing lists are empty.
  pub fn list_len(&self, key: &str) -> Result<usize, StoreError> {
    let state = self.state.lock()?;
    Ok(state.lists.get(key).map_or(0, VecDeque::len))
  }
}

impl CoordinationStore for InMemoryStore {
  fn keyspace(&self) -> &Keyspace {
    &self.keyspace
  }

  fn next_exec_id(&self, task_id: &str) -> Result<u64, StoreError> {
    let mut state = self.state.lock()?;
    let arena = state.arena(task_id);
    arena.counter += 1;
    Ok(arena.counter)
  }

  fn register_dependencies(
    &self,
    task_id: &str,
    exec_id: u64,
    job: &[u8],
    dependencies: &[u64],
  ) -> Result<u64, StoreError> {
    let mut state = self.state.lock()?;
    let arena = state.arena(task_id);

    let mut pending = 0;
    for &dep in dependencies {
      let slot = arena.nodes.entry(dep).or_default();
      if !slot.completed && slot.waiters.insert(exec_id) {
        pending += 1;
      }
    }

    let node = arena.nodes.entry(exec_id).or_default();
    node.job = Some(job.to_vec());
    node.pending = pending;
    Ok(pending)
  }

  fn complete_node(
    &self,
    task_id: &str,
    exec_id: u64,
    record: &[u8],
    failed: bool,
  ) -> Result<Completion, StoreError> {
    let mut state = self.state.lock()?;
    let signal_key = self.keyspace.completion(task_id, exec_id);
    let arena = state.arena(task_id);

    let node = arena.nodes.entry(exec_id).or_default();
    if node.completed {
      return Ok(Completion::duplicate());
    }
    node.completed = true;
    node.result = Some(record.to_vec());
    let waiters = std::mem::take(&mut node.waiters);

    let mut completion = Completion::default();
    for waiter in waiters {
      let slot = arena.nodes.entry(waiter).or_default();
      if slot.completed {
        continue;
      }
      if failed {
        completion.orphaned.push(waiter);
        continue;
      }
      slot.pending = slot.pending.saturating_sub(1);
      if slot.pending == 0 {
        completion.ready.push(ReadyNode {
          exec_id: waiter,
          job: slot.job.clone().unwrap_or_default(),
        });
      }
    }

    state.push(&signal_key, b"1".to_vec());
    self.changed.notify_all();
    Ok(completion)
  }

  fn load_job(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    let state = self.state.lock()?;
    Ok(
      state
        .tasks
        .get(task_id)
        .and_then(|arena| arena.nodes.get(&exec_id))
        .and_then(|slot| slot.job.clone()),
    )
  }

  fn load_result(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    let state = self.state.lock()?;
    Ok(
      state
        .tasks
        .get(task_id)
        .and_then(|arena| arena.nodes.get(&exec_id))
        .and_then(|slot| slot.result.clone()),
    )
  }

  fn push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError> {
    let mut state = self.state.lock()?;
    state.push(key, payload.to_vec());
    self.changed.notify_all();
    Ok(())
  }

  fn blocking_pop(
    &self,
    key: &str,
    timeout: Option<Duration>,
  ) -> Result<Option<Vec<u8>>, StoreError> {
    let state = self.state.lock()?;
    super::wait_for(&self.changed, state, timeout, |state| state.pop(key))
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let mut state = self.state.lock()?;
    state.lists.remove(key);
    Ok(())
  }

  fn purge_task(&self, task_id: &str) -> Result<(), StoreError> {
    let mut state = self.state.lock()?;
    state.tasks.remove(task_id);
    let signals = self.keyspace.completion_prefix(task_id);
    state.lists.retain(|key, _| !key.starts_with(&signals));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> InMemoryStore {
    InMemoryStore::new(Keyspace::default())
  }

  #[test]
  fn test_exec_ids_are_per_task() {
    let store = store();
    assert_eq!(store.next_exec_id("a").unwrap(), 1);
    assert_eq!(store.next_exec_id("a").unwrap(), 2);
    assert_eq!(store.next_exec_id("b").unwrap(), 1);
  }

  #[test]
  fn test_fan_in_becomes_ready_once() {
    let store = store();
    assert_eq!(store.register_dependencies("t", 1, b"j1", &[]).unwrap(), 0);
    assert_eq!(store.register_dependencies("t", 2, b"j2", &[]).unwrap(), 0);
    assert_eq!(store.register_dependencies("t", 3, b"j3", &[1, 2]).unwrap(), 2);

    let first = store.complete_node("t", 1, b"r1", false).unwrap();
    assert!(first.ready.is_empty());

    let second = store.complete_node("t", 2, b"r2", false).unwrap();
    assert_eq!(
      second.ready,
      vec![ReadyNode {
        exec_id: 3,
        job: b"j3".to_vec()
      }]
    );
  }

  #[test]
  fn test_completed_dependency_is_not_counted() {
    let store = store();
    store.register_dependencies("t", 1, b"j1", &[]).unwrap();
    store.complete_node("t", 1, b"r1", false).unwrap();

    assert_eq!(store.register_dependencies("t", 2, b"j2", &[1]).unwrap(), 0);
  }

  #[test]
  fn test_duplicate_completion_is_noop() {
    let store = store();
    store.register_dependencies("t", 1, b"j1", &[]).unwrap();
    store.register_dependencies("t", 2, b"j2", &[1]).unwrap();

    let first = store.complete_node("t", 1, b"r1", false).unwrap();
    assert_eq!(first.ready.len(), 1);

    let again = store.complete_node("t", 1, b"other", false).unwrap();
    assert!(again.duplicate);
    assert!(again.ready.is_empty());
    assert_eq!(store.load_result("t", 1).unwrap().unwrap(), b"r1");
  }

  #[test]
  fn test_failed_completion_orphans_waiters() {
    let store = store();
    store.register_dependencies("t", 1, b"j1", &[]).unwrap();
    store.register_dependencies("t", 2, b"j2", &[]).unwrap();
    store.register_dependencies("t", 3, b"j3", &[1, 2]).unwrap();

    let failed = store.complete_node("t", 1, b"err", true).unwrap();
    assert_eq!(failed.orphaned, vec![3]);
    assert!(failed.ready.is_empty());

    // The orphan's pending count was not touched, so the other dependency
    // completing does not release it.
    let other = store.complete_node("t", 2, b"r2", false).unwrap();
    assert!(other.ready.is_empty());
  }

  #[test]
  fn test_completion_signal_wakes_waiter() {
    let store = std::sync::Arc::new(store());
    store.register_dependencies("t", 1, b"j1", &[]).unwrap();

    let waiter = {
      let store = store.clone();
      std::thread::spawn(move || {
        store
          .wait_completion("t", 1, Duration::from_secs(5))
          .unwrap()
      })
    };

    store.complete_node("t", 1, b"r1", false).unwrap();
    assert!(waiter.join().unwrap());
  }

  #[test]
  fn test_blocking_pop_times_out() {
    let store = store();
    let start = std::time::Instant::now();
    let item = store
      .blocking_pop("nothing", Some(Duration::from_millis(30)))
      .unwrap();
    assert!(item.is_none());
    assert!(start.elapsed() >= Duration::from_millis(30));
  }

  #[test]
  fn test_purge_task() {
    let store = store();
    store.next_exec_id("t").unwrap();
    store.register_dependencies("t", 1, b"j1", &[]).unwrap();
    store.complete_node("t", 1, b"r1", false).unwrap();

    store.purge_task("t").unwrap();

    assert!(store.load_result("t", 1).unwrap().is_none());
    assert!(
      !store
        .wait_completion("t", 1, Duration::from_millis(1))
        .unwrap()
    );
    assert_eq!(store.next_exec_id("t").unwrap(), 1);
  }
}
