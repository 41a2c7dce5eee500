/// Builds every key the backends read or write, under one prefix.
///
/// ```text
/// {prefix}:counter:{task}                         exec id counter
/// {prefix}:jobs:{task}                            exec id -> job blob
/// {prefix}:pending:{task}                         exec id -> pending count
/// {prefix}:completed:{task}                       set of completed exec ids
/// {prefix}:results:{task}                         exec id -> result record
/// {prefix}:waiters:{task}:{exec_id}               set of dependents
/// {prefix}:done:{task}:{exec_id}                  completion signal list
/// {prefix}:service-response:{service}:{corr}      service reply list
/// {prefix}:queue:{destination}                    broker queue
/// {prefix}:queue:{destination}:processing:{who}   unacknowledged deliveries
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
  prefix: String,
}

impl Default for Keyspace {
  fn default() -> Self {
    Self::new("tessera")
  }
}

impl Keyspace {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  pub fn counter(&self, task_id: &str) -> String {
    format!("{}:counter:{}", self.prefix, task_id)
  }

  pub fn jobs(&self, task_id: &str) -> String {
    format!("{}:jobs:{}", self.prefix, task_id)
  }

  pub fn pending(&self, task_id: &str) -> String {
    format!("{}:pending:{}", self.prefix, task_id)
  }

  pub fn completed(&self, task_id: &str) -> String {
    format!("{}:completed:{}", self.prefix, task_id)
  }

  pub fn results(&self, task_id: &str) -> String {
    format!("{}:results:{}", self.prefix, task_id)
  }

  /// Prefix of the waiter sets; the exec id is appended.
  pub fn waiters_prefix(&self, task_id: &str) -> String {
    format!("{}:waiters:{}:", self.prefix, task_id)
  }

  pub fn waiters(&self, task_id: &str, exec_id: u64) -> String {
    format!("{}{}", self.waiters_prefix(task_id), exec_id)
  }

  /// Prefix of the completion signal lists; the exec id is appended.
  pub fn completion_prefix(&self, task_id: &str) -> String {
    format!("{}:done:{}:", self.prefix, task_id)
  }

  pub fn completion(&self, task_id: &str, exec_id: u64) -> String {
    format!("{}{}", self.completion_prefix(task_id), exec_id)
  }

  pub fn reply_channel(&self, service_id: &str, correlation_id: &str) -> String {
    format!(
      "{}:service-response:{}:{}",
      self.prefix, service_id, correlation_id
    )
  }

  pub fn queue(&self, destination: &str) -> String {
    format!("{}:queue:{}", self.prefix, destination)
  }

  pub fn processing(&self, destination: &str, consumer: &str) -> String {
    format!("{}:queue:{}:processing:{}", self.prefix, destination, consumer)
  }
}
