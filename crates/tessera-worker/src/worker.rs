use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tessera_config::{FailurePolicy, WorkerConfig};
use tessera_graph::{
  Args, Backends, Job, JobContext, NodeRef, OperatorRegistry, Outcome, ResultRecord, Session,
  Value, panic_message,
};
use tessera_store::{CoordinationStore, Delivery};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::WorkerError;

/// Settings for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  /// Name under which deliveries are held until acknowledged. A restarted
  /// worker with the same name re-queues what its predecessor left behind.
  pub consumer: String,
  pub failure_policy: FailurePolicy,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      consumer: format!("worker-{}", std::process::id()),
      failure_policy: FailurePolicy::default(),
    }
  }
}

impl WorkerOptions {
  pub fn from_config(config: &WorkerConfig) -> Self {
    let defaults = Self::default();
    Self {
      consumer: config.consumer.clone().unwrap_or(defaults.consumer),
      failure_policy: config.failure_policy,
    }
  }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobReport {
  /// The node succeeded and `dispatched` dependents became ready.
  Succeeded { dispatched: usize },
  /// The node failed and `propagated` transitive dependents were failed with
  /// it.
  Failed { propagated: usize },
  /// The node already had a result; nothing ran.
  Duplicate,
  /// A dependency's result is a reference to a node that has not finished.
  /// The job was registered as its waiter and runs again once it completes.
  Deferred { waiting_on: u64 },
}

/// Counters for a worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  pub recovered: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub propagated: usize,
  pub dispatched: usize,
  pub duplicates: usize,
  pub deferred: usize,
  pub malformed: usize,
  /// Deliveries re-queued after a backend error.
  pub retried: usize,
}

impl WorkerStats {
  /// Deliveries that ran an operator.
  pub fn executed(&self) -> usize {
    self.succeeded + self.failed
  }

  pub fn merge(&mut self, other: WorkerStats) {
    self.recovered += other.recovered;
    self.succeeded += other.succeeded;
    self.failed += other.failed;
    self.propagated += other.propagated;
    self.dispatched += other.dispatched;
    self.duplicates += other.duplicates;
    self.deferred += other.deferred;
    self.malformed += other.malformed;
    self.retried += other.retried;
  }

  fn record(&mut self, report: JobReport) {
    match report {
      JobReport::Succeeded { dispatched } => {
        self.succeeded += 1;
        self.dispatched += dispatched;
      }
      JobReport::Failed { propagated } => {
        self.failed += 1;
        self.propagated += propagated;
      }
      JobReport::Duplicate => self.duplicates += 1,
      JobReport::Deferred { .. } => self.deferred += 1,
    }
  }
}

/// Consecutive backend failures a worker absorbs before it stops.
const MAX_BACKEND_FAILURES: u32 = 5;

enum Resolve {
  Failed(String),
  Pending(u64),
  Worker(WorkerError),
}

enum Resolution {
  Ready(Args),
  Failed(String),
  Pending(u64),
}

/// Consumes jobs from the dispatch queue and executes them.
///
/// For each delivery the worker resolves the job's references from stored
/// result records, runs the operator, records the outcome, publishes the
/// dependents that became ready, and only then acknowledges the delivery.
pub struct Worker {
  backends: Backends,
  registry: Arc<OperatorRegistry>,
  options: WorkerOptions,
}

impl Worker {
  pub fn new(backends: Backends, registry: Arc<OperatorRegistry>, options: WorkerOptions) -> Self {
    Self {
      backends,
      registry,
      options,
    }
  }

  pub fn consumer(&self) -> &str {
    &self.options.consumer
  }

  /// Run until `cancel` fires. The token is checked between polls.
  pub fn run(&self, cancel: &CancellationToken) -> Result<WorkerStats, WorkerError> {
    let mut stats = WorkerStats::default();
    stats.recovered = self.recover()?;
    info!(
      consumer = %self.options.consumer,
      queue = %self.backends.dispatch_queue,
      recovered = stats.recovered,
      "worker started"
    );

    let mut failures = 0;
    while !cancel.is_cancelled() {
      if let Some(delivery) = self.next_delivery()? {
        self.handle_or_requeue(&delivery, &mut stats, &mut failures)?;
      }
    }

    info!(
      consumer = %self.options.consumer,
      executed = stats.executed(),
      "worker stopped"
    );
    Ok(stats)
  }

  /// Process deliveries until a poll comes back empty.
  pub fn run_until_idle(&self) -> Result<WorkerStats, WorkerError> {
    let mut stats = WorkerStats::default();
    stats.recovered = self.recover()?;
    let mut failures = 0;
    while let Some(delivery) = self.next_delivery()? {
      self.handle_or_requeue(&delivery, &mut stats, &mut failures)?;
    }
    Ok(stats)
  }

  /// Handle a delivery. A backend error re-queues the worker's unacknowledged
  /// deliveries and backs off; after [`MAX_BACKEND_FAILURES`] in a row the
  /// error is returned.
  fn handle_or_requeue(
    &self,
    delivery: &Delivery,
    stats: &mut WorkerStats,
    failures: &mut u32,
  ) -> Result<(), WorkerError> {
    let err = match self.handle(delivery, stats) {
      Ok(()) => {
        *failures = 0;
        return Ok(());
      }
      Err(e) => e,
    };

    *failures += 1;
    if *failures >= MAX_BACKEND_FAILURES {
      error!(
        consumer = %self.options.consumer,
        error = %err,
        failures = *failures,
        "giving up after repeated backend errors"
      );
      return Err(err);
    }

    warn!(
      consumer = %self.options.consumer,
      error = %err,
      failures = *failures,
      "backend error, re-queueing delivery"
    );
    self
      .backends
      .broker
      .recover(&self.backends.dispatch_queue, &self.options.consumer)?;
    stats.retried += 1;
    thread::sleep(self.backends.poll_interval * *failures);
    Ok(())
  }

  fn recover(&self) -> Result<usize, WorkerError> {
    let recovered = self
      .backends
      .broker
      .recover(&self.backends.dispatch_queue, &self.options.consumer)?;
    if recovered > 0 {
      warn!(
        consumer = %self.options.consumer,
        recovered,
        "re-queued unacknowledged deliveries"
      );
    }
    Ok(recovered)
  }

  fn next_delivery(&self) -> Result<Option<Delivery>, WorkerError> {
    Ok(self.backends.broker.consume(
      &self.backends.dispatch_queue,
      &self.options.consumer,
      self.backends.poll_interval,
    )?)
  }

  fn handle(&self, delivery: &Delivery, stats: &mut WorkerStats) -> Result<(), WorkerError> {
    match self.process(&delivery.payload) {
      Ok(report) => stats.record(report),
      Err(WorkerError::MalformedJob { message }) => {
        error!(consumer = %self.options.consumer, error = %message, "dropping malformed job");
        stats.malformed += 1;
      }
      // Left unacknowledged for recovery.
      Err(e) => return Err(e),
    }
    self.backends.broker.ack(delivery)?;
    Ok(())
  }

  /// Execute one job blob.
  pub fn process(&self, payload: &[u8]) -> Result<JobReport, WorkerError> {
    let job: Job = self
      .backends
      .codec
      .decode(payload)
      .map_err(|e| WorkerError::MalformedJob {
        message: e.to_string(),
      })?;
    let session = Session::builder(self.backends.clone())
      .task_id(job.task_id.clone())
      .registry(self.registry.clone())
      .build();
    self.execute(&session, job)
  }

  #[instrument(
    name = "job_execute",
    skip(self, session, job),
    fields(task_id = %job.task_id, exec_id = job.exec_id, operator = %job.operator)
  )]
  fn execute(&self, session: &Session, job: Job) -> Result<JobReport, WorkerError> {
    let store = session.store();
    if store.load_result(&job.task_id, job.exec_id)?.is_some() {
      info!("node already completed, skipping");
      return Ok(JobReport::Duplicate);
    }

    let outcome = loop {
      match self.resolve_args(session, &job)? {
        Resolution::Ready(args) => break self.compute(session, &job, args),
        Resolution::Failed(message) => break Outcome::Error(message),
        Resolution::Pending(target) => {
          let blob = self.backends.codec.encode(&job)?;
          if store.register_dependencies(&job.task_id, job.exec_id, &blob, &[target])? > 0 {
            info!(waiting_on = target, "deferred until referenced node completes");
            return Ok(JobReport::Deferred { waiting_on: target });
          }
          // Completed in the meantime.
        }
      }
    };

    let failed = outcome.is_error();
    match &outcome {
      Outcome::Success(value) => info!(result_type = value.type_name(), "node completed"),
      Outcome::Error(message) => warn!(error = %message, "node failed"),
    }

    let record = self.backends.codec.encode(&ResultRecord {
      exec_id: job.exec_id,
      outcome: outcome.clone(),
    })?;
    let completion = store.complete_node(&job.task_id, job.exec_id, &record, failed)?;
    if completion.duplicate {
      info!("node completed concurrently, discarding result");
      return Ok(JobReport::Duplicate);
    }

    for ready in &completion.ready {
      self
        .backends
        .broker
        .publish(&self.backends.dispatch_queue, &ready.job)?;
      debug!(ready_exec_id = ready.exec_id, "dependent dispatched");
    }

    match outcome {
      Outcome::Success(_) => Ok(JobReport::Succeeded {
        dispatched: completion.ready.len(),
      }),
      Outcome::Error(message) => {
        let propagated = match self.options.failure_policy {
          FailurePolicy::Propagate => {
            self.propagate(session, job.exec_id, &message, completion.orphaned)?
          }
          FailurePolicy::Hold => {
            if !completion.orphaned.is_empty() {
              debug!(held = completion.orphaned.len(), "dependents left pending");
            }
            0
          }
        };
        Ok(JobReport::Failed { propagated })
      }
    }
  }

  /// Replace every reference in the job's arguments with the referenced
  /// node's value.
  fn resolve_args(&self, session: &Session, job: &Job) -> Result<Resolution, WorkerError> {
    let store = session.store();
    let mut resolved: HashMap<u64, Value> = HashMap::new();

    let result = job.arguments().resolve(|node: NodeRef| -> Result<Value, Resolve> {
      if let Some(value) = resolved.get(&node.exec_id) {
        return Ok(value.clone());
      }
      let value = self.dependency_value(store, &job.task_id, node.exec_id)?;
      resolved.insert(node.exec_id, value.clone());
      Ok(value)
    });

    match result {
      Ok(args) => Ok(Resolution::Ready(args)),
      Err(Resolve::Failed(message)) => Ok(Resolution::Failed(message)),
      Err(Resolve::Pending(target)) => Ok(Resolution::Pending(target)),
      Err(Resolve::Worker(e)) => Err(e),
    }
  }

  /// The value of a completed dependency. A result that is itself a
  /// reference is followed to the node it names, which may not have
  /// finished yet.
  fn dependency_value(
    &self,
    store: &dyn CoordinationStore,
    task_id: &str,
    exec_id: u64,
  ) -> Result<Value, Resolve> {
    let mut current = exec_id;
    let mut seen = HashSet::new();

    loop {
      if !seen.insert(current) {
        return Err(Resolve::Failed(format!(
          "dependency {} resolves to a reference cycle",
          exec_id
        )));
      }
      let blob = store
        .load_result(task_id, current)
        .map_err(|e| Resolve::Worker(e.into()))?;
      let Some(blob) = blob else {
        return Err(if current == exec_id {
          Resolve::Failed(format!("dependency {} has no result", exec_id))
        } else {
          Resolve::Pending(current)
        });
      };
      let record: ResultRecord = self.backends.codec.decode(&blob).map_err(|e| {
        Resolve::Failed(format!("dependency {} result is unreadable: {}", current, e))
      })?;
      match record.outcome {
        Outcome::Success(Value::Ref(next)) => current = next.exec_id,
        Outcome::Success(value) => return Ok(value),
        Outcome::Error(message) => {
          return Err(Resolve::Failed(format!(
            "dependency {} failed: {}",
            current, message
          )));
        }
      }
    }
  }

  fn compute(&self, session: &Session, job: &Job, args: Args) -> Outcome {
    let operator = match self.registry.instantiate(&job.operator, &job.constructor_args) {
      Ok(operator) => operator,
      Err(e) => return Outcome::Error(e.to_string()),
    };
    let ctx = JobContext::new(session, job.exec_id);

    match panic::catch_unwind(AssertUnwindSafe(|| operator.compute(&ctx, args))) {
      Ok(Ok(value)) => Outcome::Success(value),
      Ok(Err(e)) => Outcome::Error(e.to_string()),
      Err(payload) => Outcome::Error(format!("operator panicked: {}", panic_message(&*payload))),
    }
  }

  /// Fail every transitive dependent of a failed node, without dispatching
  /// any of them.
  fn propagate(
    &self,
    session: &Session,
    exec_id: u64,
    message: &str,
    orphaned: Vec<u64>,
  ) -> Result<usize, WorkerError> {
    let store = session.store();
    let task_id = session.task_id();
    let mut worklist: VecDeque<(u64, String)> = orphaned
      .into_iter()
      .map(|id| (id, format!("dependency {} failed: {}", exec_id, message)))
      .collect();

    let mut propagated = 0;
    while let Some((dependent, reason)) = worklist.pop_front() {
      let record = self.backends.codec.encode(&ResultRecord {
        exec_id: dependent,
        outcome: Outcome::Error(reason.clone()),
      })?;
      let completion = store.complete_node(task_id, dependent, &record, true)?;
      if completion.duplicate {
        continue;
      }
      propagated += 1;
      debug!(dependent, "failure propagated");
      for next in completion.orphaned {
        worklist.push_back((next, format!("dependency {} failed: {}", dependent, reason)));
      }
    }
    Ok(propagated)
  }
}
