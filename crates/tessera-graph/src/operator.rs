use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tessera_codec::Value;
use tessera_store::ObjectStore;

use crate::error::{GraphError, OperatorError};
use crate::job::Args;
use crate::session::Session;

/// A computation that can become a graph node.
///
/// The `kind` is the registry tag workers use to rebuild the operator from
/// its constructor arguments.
pub trait Operator: Send + Sync {
  fn kind(&self) -> &str;

  /// Literal values the operator was configured with.
  fn constructor_args(&self) -> Vec<Value> {
    Vec::new()
  }

  /// Run the operator on fully resolved arguments.
  ///
  /// Returning the `Value::Ref` of another node makes this node's value that
  /// node's value. Dependents of this node wait until it has finished too.
  fn compute(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError>;
}

/// What an operator sees while it runs on a worker.
///
/// The session is bound to the job's task, so nodes built from inside
/// `compute` join the same graph.
pub struct JobContext<'a> {
  session: &'a Session,
  exec_id: u64,
}

impl<'a> JobContext<'a> {
  pub fn new(session: &'a Session, exec_id: u64) -> Self {
    Self { session, exec_id }
  }

  pub fn session(&self) -> &'a Session {
    self.session
  }

  pub fn task_id(&self) -> &'a str {
    self.session.task_id()
  }

  pub fn exec_id(&self) -> u64 {
    self.exec_id
  }

  pub fn objects(&self) -> &'a dyn ObjectStore {
    self.session.objects()
  }
}

type Factory = Arc<dyn Fn(&[Value]) -> Result<Box<dyn Operator>, OperatorError> + Send + Sync>;

/// Operator factories keyed by tag.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
  factories: HashMap<String, Factory>,
}

impl OperatorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with every built-in operator.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    crate::builtin::register_builtins(&mut registry);
    registry
  }

  /// Register a factory under `kind`.
  pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<(), GraphError>
  where
    F: Fn(&[Value]) -> Result<Box<dyn Operator>, OperatorError> + Send + Sync + 'static,
  {
    let kind = kind.into();
    if self.factories.contains_key(&kind) {
      return Err(GraphError::DuplicateOperator { kind });
    }
    self.factories.insert(kind, Arc::new(factory));
    Ok(())
  }

  /// Register an operator that takes no constructor arguments.
  pub fn register_unit<O>(&mut self) -> Result<(), GraphError>
  where
    O: Operator + Default + 'static,
  {
    let kind = O::default().kind().to_string();
    self.register(kind, |_| Ok(Box::new(O::default()) as Box<dyn Operator>))
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.factories.contains_key(kind)
  }

  /// Registered tags, sorted.
  pub fn kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }

  /// Rebuild an operator from its tag and constructor arguments.
  pub fn instantiate(
    &self,
    kind: &str,
    constructor_args: &[Value],
  ) -> Result<Box<dyn Operator>, OperatorError> {
    let factory = self
      .factories
      .get(kind)
      .ok_or_else(|| OperatorError::UnknownOperator {
        kind: kind.to_string(),
      })?;
    factory(constructor_args)
  }

  /// Check that every tag in `required` is registered.
  pub fn validate<I, S>(&self, required: I) -> Result<(), GraphError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let missing: Vec<String> = required
      .into_iter()
      .filter(|kind| !self.contains(kind.as_ref()))
      .map(|kind| kind.as_ref().to_string())
      .collect();
    if missing.is_empty() {
      Ok(())
    } else {
      Err(GraphError::MissingOperators { kinds: missing })
    }
  }
}

impl fmt::Debug for OperatorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperatorRegistry")
      .field("kinds", &self.kinds())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builtin::{Add, Mul};

  #[test]
  fn test_duplicate_registration() {
    let mut registry = OperatorRegistry::new();
    registry.register_unit::<Add>().unwrap();
    assert!(matches!(
      registry.register_unit::<Add>(),
      Err(GraphError::DuplicateOperator { kind }) if kind == "Add"
    ));
  }

  #[test]
  fn test_validate_reports_missing() {
    let registry = OperatorRegistry::with_builtins();
    registry.validate(["Add", "Mul", "Multiply"]).unwrap();

    let err = registry.validate(["Add", "Sandbox", "Llm"]).unwrap_err();
    assert_eq!(err.to_string(), "missing operators: Sandbox, Llm");
  }

  #[test]
  fn test_instantiate() {
    let registry = OperatorRegistry::with_builtins();
    let op = registry.instantiate("Multiply", &[]).unwrap();
    assert_eq!(op.kind(), Mul.kind());
    assert!(matches!(
      registry.instantiate("Nope", &[]),
      Err(OperatorError::UnknownOperator { .. })
    ));
  }
}
