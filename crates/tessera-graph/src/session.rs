use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tessera_codec::{Codec, NodeRef, Value};
use tessera_config::{BackendConfig, ObjectStoreConfig, TesseraConfig};
#[cfg(feature = "redis")]
use tessera_store::{RedisBroker, RedisStore};
use tessera_store::{
  Broker, CoordinationStore, FsObjectStore, InMemoryBroker, InMemoryObjectStore, InMemoryStore,
  Keyspace, ObjectStore,
};
use tracing::{debug, info, instrument, warn};

use crate::error::GraphError;
use crate::future::NodeFuture;
use crate::job::{Args, Job};
use crate::operator::{Operator, OperatorRegistry};

/// Live handles to every backend a session or worker needs.
#[derive(Clone)]
pub struct Backends {
  pub store: Arc<dyn CoordinationStore>,
  pub broker: Arc<dyn Broker>,
  pub objects: Arc<dyn ObjectStore>,
  pub codec: Codec,
  /// Broker destination for ready jobs.
  pub dispatch_queue: String,
  /// How long blocking waits last before state is rechecked.
  pub poll_interval: Duration,
}

impl Backends {
  /// Fresh in-memory backends with default settings.
  pub fn in_memory() -> Self {
    let config = TesseraConfig::default();
    Self {
      store: Arc::new(InMemoryStore::new(Keyspace::new(&config.key_prefix))),
      broker: Arc::new(InMemoryBroker::new()),
      objects: Arc::new(InMemoryObjectStore::new()),
      codec: Codec::plain(),
      dispatch_queue: config.dispatch_queue.clone(),
      poll_interval: config.poll_interval(),
    }
  }

  /// Connect the backends described by `config`. A Redis backend needs the
  /// `redis` feature.
  pub fn from_config(config: &TesseraConfig) -> Result<Self, GraphError> {
    let keyspace = Keyspace::new(&config.key_prefix);

    let (store, broker): (Arc<dyn CoordinationStore>, Arc<dyn Broker>) = match &config.backend {
      BackendConfig::Memory => (
        Arc::new(InMemoryStore::new(keyspace)),
        Arc::new(InMemoryBroker::new()),
      ),
      #[cfg(feature = "redis")]
      BackendConfig::Redis { url } => (
        Arc::new(RedisStore::connect(url, keyspace.clone())?),
        Arc::new(RedisBroker::connect(url, keyspace)?),
      ),
      #[cfg(not(feature = "redis"))]
      BackendConfig::Redis { .. } => {
        return Err(GraphError::BackendUnavailable { backend: "redis" });
      }
    };

    let objects: Arc<dyn ObjectStore> = match &config.object_store {
      ObjectStoreConfig::Memory => Arc::new(InMemoryObjectStore::new()),
      ObjectStoreConfig::Fs { root } => Arc::new(FsObjectStore::new(root)),
    };

    let codec = match config.codec_level() {
      Some(level) => Codec::zstd(level),
      None => Codec::plain(),
    };

    Ok(Self {
      store,
      broker,
      objects,
      codec,
      dispatch_queue: config.dispatch_queue.clone(),
      poll_interval: config.poll_interval(),
    })
  }

  pub fn keyspace(&self) -> &Keyspace {
    self.store.keyspace()
  }
}

impl fmt::Debug for Backends {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Backends")
      .field("keyspace", self.keyspace())
      .field("codec", &self.codec)
      .field("dispatch_queue", &self.dispatch_queue)
      .field("poll_interval", &self.poll_interval)
      .finish_non_exhaustive()
  }
}

struct SessionInner {
  task_id: String,
  backends: Backends,
  registry: Option<Arc<OperatorRegistry>>,
  purge_on_close: bool,
}

impl Drop for SessionInner {
  fn drop(&mut self) {
    if self.purge_on_close {
      match self.backends.store.purge_task(&self.task_id) {
        Ok(()) => info!(task_id = %self.task_id, "session closed, task purged"),
        Err(e) => warn!(task_id = %self.task_id, error = %e, "failed to purge task"),
      }
    } else {
      debug!(task_id = %self.task_id, "session closed");
    }
  }
}

/// The context graph nodes are built in.
///
/// A session binds one task id to a set of backends. Cloning is cheap and
/// every clone builds into the same task.
#[derive(Clone)]
pub struct Session {
  inner: Arc<SessionInner>,
}

impl Session {
  /// Open a session for a new task.
  pub fn new(backends: Backends) -> Self {
    Self::builder(backends).build()
  }

  /// Open a session for an existing task, as workers do for each job.
  pub fn with_task_id(backends: Backends, task_id: impl Into<String>) -> Self {
    Self::builder(backends).task_id(task_id).build()
  }

  pub fn builder(backends: Backends) -> SessionBuilder {
    SessionBuilder {
      backends,
      task_id: None,
      registry: None,
      purge_on_close: false,
    }
  }

  pub fn task_id(&self) -> &str {
    &self.inner.task_id
  }

  pub fn backends(&self) -> &Backends {
    &self.inner.backends
  }

  pub fn store(&self) -> &dyn CoordinationStore {
    self.inner.backends.store.as_ref()
  }

  pub fn broker(&self) -> &dyn Broker {
    self.inner.backends.broker.as_ref()
  }

  pub fn objects(&self) -> &dyn ObjectStore {
    self.inner.backends.objects.as_ref()
  }

  pub fn codec(&self) -> Codec {
    self.inner.backends.codec
  }

  pub fn registry(&self) -> Option<&OperatorRegistry> {
    self.inner.registry.as_deref()
  }

  /// Add a node that runs `operator` on `args`. Returns immediately.
  pub fn invoke<O>(&self, operator: &O, args: impl Into<Args>) -> Result<NodeFuture, GraphError>
  where
    O: Operator + ?Sized,
  {
    self.invoke_named(operator.kind(), operator.constructor_args(), args.into())
  }

  /// Add a node by operator tag.
  ///
  /// Every node reference in `args`, including references nested in lists
  /// and maps, becomes a dependency. The job is published to the dispatch
  /// queue here only if all of its dependencies have already completed;
  /// otherwise the completion of its last dependency publishes it.
  #[instrument(
    name = "node_invoke",
    skip(self, constructor_args, args),
    fields(task_id = %self.task_id())
  )]
  pub fn invoke_named(
    &self,
    kind: &str,
    constructor_args: Vec<Value>,
    args: Args,
  ) -> Result<NodeFuture, GraphError> {
    if let Some(registry) = self.registry() {
      if !registry.contains(kind) {
        return Err(GraphError::UnknownOperator {
          kind: kind.to_string(),
        });
      }
    }
    if constructor_args.iter().any(Value::contains_ref) {
      return Err(GraphError::RefInConstructor {
        kind: kind.to_string(),
      });
    }

    let backends = self.backends();
    let task_id = self.task_id();
    let exec_id = backends.store.next_exec_id(task_id)?;

    let dependencies: Vec<u64> = args.refs().into_iter().collect();
    if let Some(&reference) = dependencies.iter().find(|&&d| d == 0 || d >= exec_id) {
      return Err(GraphError::InvalidReference { exec_id, reference });
    }

    let job = Job {
      exec_id,
      task_id: task_id.to_string(),
      operator: kind.to_string(),
      args: args.positional,
      kwargs: args.named,
      constructor_args,
    };
    let blob = backends.codec.encode(&job)?;

    let pending = backends
      .store
      .register_dependencies(task_id, exec_id, &blob, &dependencies)?;
    if pending == 0 {
      backends.broker.publish(&backends.dispatch_queue, &blob)?;
      debug!(exec_id, operator = kind, "node dispatched");
    } else {
      debug!(exec_id, operator = kind, pending, "node waiting on dependencies");
    }

    Ok(NodeFuture::new(self.clone(), exec_id))
  }

  /// A handle to an existing node of this session's task.
  pub fn future(&self, node: NodeRef) -> NodeFuture {
    NodeFuture::new(self.clone(), node.exec_id)
  }

  /// Remove every stored key of this session's task.
  pub fn purge(&self) -> Result<(), GraphError> {
    self.store().purge_task(self.task_id())?;
    info!(task_id = %self.task_id(), "task purged");
    Ok(())
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("task_id", &self.inner.task_id)
      .field("purge_on_close", &self.inner.purge_on_close)
      .finish_non_exhaustive()
  }
}

/// Builder for a [`Session`].
pub struct SessionBuilder {
  backends: Backends,
  task_id: Option<String>,
  registry: Option<Arc<OperatorRegistry>>,
  purge_on_close: bool,
}

impl SessionBuilder {
  /// Use an existing task id instead of generating one.
  pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
    self.task_id = Some(task_id.into());
    self
  }

  /// Reject operator tags missing from `registry` when building nodes.
  pub fn registry(mut self, registry: Arc<OperatorRegistry>) -> Self {
    self.registry = Some(registry);
    self
  }

  /// Purge the task's keys when the last clone of the session is dropped.
  pub fn purge_on_close(mut self, purge: bool) -> Self {
    self.purge_on_close = purge;
    self
  }

  pub fn build(self) -> Session {
    let task_id = self
      .task_id
      .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    debug!(task_id = %task_id, "session opened");
    Session {
      inner: Arc::new(SessionInner {
        task_id,
        backends: self.backends,
        registry: self.registry,
        purge_on_close: self.purge_on_close,
      }),
    }
  }
}
