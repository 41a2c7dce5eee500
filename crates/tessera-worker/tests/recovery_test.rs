use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tessera_config::FailurePolicy;
use tessera_graph::{Add, Backends, OperatorRegistry, Session, Value};
use tessera_store::{
  Completion, CoordinationStore, InMemoryBroker, InMemoryStore, Keyspace, StoreError,
};
use tessera_worker::{Worker, WorkerError, WorkerOptions, WorkerPool};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

/// In-memory store whose next `failures` completions fail like a dropped
/// connection.
struct FlakyStore {
  inner: InMemoryStore,
  failures: AtomicUsize,
}

impl FlakyStore {
  fn new(failures: usize) -> Self {
    Self {
      inner: InMemoryStore::new(Keyspace::new("test")),
      failures: AtomicUsize::new(failures),
    }
  }
}

impl CoordinationStore for FlakyStore {
  fn keyspace(&self) -> &Keyspace {
    self.inner.keyspace()
  }

  fn next_exec_id(&self, task_id: &str) -> Result<u64, StoreError> {
    self.inner.next_exec_id(task_id)
  }

  fn register_dependencies(
    &self,
    task_id: &str,
    exec_id: u64,
    job: &[u8],
    dependencies: &[u64],
  ) -> Result<u64, StoreError> {
    self
      .inner
      .register_dependencies(task_id, exec_id, job, dependencies)
  }

  fn complete_node(
    &self,
    task_id: &str,
    exec_id: u64,
    record: &[u8],
    failed: bool,
  ) -> Result<Completion, StoreError> {
    let failing = self
      .failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return Err(StoreError::backend("connection reset by peer"));
    }
    self.inner.complete_node(task_id, exec_id, record, failed)
  }

  fn load_job(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    self.inner.load_job(task_id, exec_id)
  }

  fn load_result(&self, task_id: &str, exec_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
    self.inner.load_result(task_id, exec_id)
  }

  fn push(&self, key: &str, payload: &[u8]) -> Result<(), StoreError> {
    self.inner.push(key, payload)
  }

  fn blocking_pop(
    &self,
    key: &str,
    timeout: Option<Duration>,
  ) -> Result<Option<Vec<u8>>, StoreError> {
    self.inner.blocking_pop(key, timeout)
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    self.inner.delete(key)
  }

  fn purge_task(&self, task_id: &str) -> Result<(), StoreError> {
    self.inner.purge_task(task_id)
  }
}

fn flaky_backends(failures: usize) -> (Backends, Arc<InMemoryBroker>) {
  let broker = Arc::new(InMemoryBroker::new());
  let mut backends = Backends::in_memory();
  backends.store = Arc::new(FlakyStore::new(failures));
  backends.broker = broker.clone();
  backends.poll_interval = Duration::from_millis(10);
  (backends, broker)
}

fn registry() -> Arc<OperatorRegistry> {
  Arc::new(OperatorRegistry::with_builtins())
}

#[test]
fn test_backend_error_requeues_and_retries() {
  let (backends, broker) = flaky_backends(2);
  let session = Session::new(backends.clone());
  let sum = session.invoke(&Add, [1, 2]).unwrap();

  let stats = Worker::new(backends.clone(), registry(), WorkerOptions::default())
    .run_until_idle()
    .unwrap();

  assert_eq!(stats.retried, 2);
  assert_eq!(stats.succeeded, 1);
  assert_eq!(sum.result_timeout(WAIT).unwrap(), Value::Int(3));
  assert_eq!(broker.in_flight(&backends.dispatch_queue).unwrap(), 0);
}

#[test]
fn test_pool_keeps_serving_after_transient_errors() {
  let (backends, _) = flaky_backends(3);
  let options = WorkerOptions {
    consumer: "flaky".to_string(),
    failure_policy: FailurePolicy::Propagate,
  };
  let pool = WorkerPool::spawn(
    backends.clone(),
    registry(),
    options,
    2,
    CancellationToken::new(),
  )
  .unwrap();

  let session = Session::new(backends.clone());
  let a = session.invoke(&Add, [1, 2]).unwrap();
  let b = &a * 4;
  assert_eq!(b.result_timeout(WAIT).unwrap(), Value::Int(12));

  let stats = pool.shutdown().unwrap();
  assert_eq!(stats.succeeded, 2);
  assert_eq!(stats.retried, 3);
}

#[test]
fn test_persistent_backend_error_stops_the_pool() {
  let (backends, _) = flaky_backends(usize::MAX);
  let options = WorkerOptions {
    consumer: "doomed".to_string(),
    failure_policy: FailurePolicy::Propagate,
  };
  let pool = WorkerPool::spawn(
    backends.clone(),
    registry(),
    options,
    2,
    CancellationToken::new(),
  )
  .unwrap();

  let session = Session::new(backends.clone());
  let _sum = session.invoke(&Add, [1, 2]).unwrap();

  let deadline = Instant::now() + WAIT;
  while !pool.cancel_token().is_cancelled() {
    assert!(Instant::now() < deadline, "pool kept running");
    std::thread::sleep(Duration::from_millis(10));
  }
  assert!(matches!(pool.join(), Err(WorkerError::Store(_))));
}
