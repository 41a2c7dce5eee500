use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tessera_codec::{NodeRef, Value};

use crate::error::OperatorError;

/// Positional and named arguments of an operator call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
  pub positional: Vec<Value>,
  pub named: BTreeMap<String, Value>,
}

impl Args {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a positional argument.
  pub fn arg(mut self, value: impl Into<Value>) -> Self {
    self.positional.push(value.into());
    self
  }

  /// Set a named argument.
  pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.named.insert(name.into(), value.into());
    self
  }

  pub fn get(&self, index: usize) -> Option<&Value> {
    self.positional.get(index)
  }

  pub fn named(&self, name: &str) -> Option<&Value> {
    self.named.get(name)
  }

  /// Look up a parameter passed either by name or at `index`. The named form
  /// wins when both are present.
  pub fn param(&self, index: usize, name: &str) -> Option<&Value> {
    self.named(name).or_else(|| self.get(index))
  }

  /// Like [`Args::param`], but missing parameters are an error.
  pub fn require(&self, index: usize, name: &str) -> Result<&Value, OperatorError> {
    self
      .param(index, name)
      .ok_or_else(|| OperatorError::MissingArgument {
        name: name.to_string(),
      })
  }

  /// A required string parameter.
  pub fn require_str(&self, index: usize, name: &str) -> Result<&str, OperatorError> {
    let value = self.require(index, name)?;
    value
      .as_str()
      .ok_or_else(|| OperatorError::invalid(name, format!("expected str, got {}", value.type_name())))
  }

  pub fn is_empty(&self) -> bool {
    self.positional.is_empty() && self.named.is_empty()
  }

  /// Exec ids of every node referenced anywhere in the arguments.
  pub fn refs(&self) -> BTreeSet<u64> {
    let mut refs = BTreeSet::new();
    for value in self.positional.iter().chain(self.named.values()) {
      value.collect_refs(&mut refs);
    }
    refs
  }

  /// Replace every reference with the value `resolve` returns for it.
  pub fn resolve<E>(
    self,
    mut resolve: impl FnMut(NodeRef) -> Result<Value, E>,
  ) -> Result<Args, E> {
    let positional = self
      .positional
      .into_iter()
      .map(|v| v.resolve_refs(&mut resolve))
      .collect::<Result<Vec<_>, E>>()?;
    let named = self
      .named
      .into_iter()
      .map(|(k, v)| v.resolve_refs(&mut resolve).map(|v| (k, v)))
      .collect::<Result<BTreeMap<_, _>, E>>()?;
    Ok(Args { positional, named })
  }
}

impl From<()> for Args {
  fn from(_: ()) -> Self {
    Args::default()
  }
}

impl From<Vec<Value>> for Args {
  fn from(positional: Vec<Value>) -> Self {
    Args {
      positional,
      named: BTreeMap::new(),
    }
  }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Args {
  fn from(values: [V; N]) -> Self {
    Args {
      positional: values.into_iter().map(Into::into).collect(),
      named: BTreeMap::new(),
    }
  }
}

/// A node as dispatched to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub exec_id: u64,
  pub task_id: String,
  /// Registry tag of the operator to run.
  pub operator: String,
  pub args: Vec<Value>,
  pub kwargs: BTreeMap<String, Value>,
  pub constructor_args: Vec<Value>,
}

impl Job {
  pub fn arguments(&self) -> Args {
    Args {
      positional: self.args.clone(),
      named: self.kwargs.clone(),
    }
  }
}

/// Result of a node, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
  Success(Value),
  Error(String),
}

impl Outcome {
  pub fn is_error(&self) -> bool {
    matches!(self, Outcome::Error(_))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
  pub exec_id: u64,
  pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_prefers_named() {
    let args = Args::from([1, 2]).kwarg("y", 5);
    assert_eq!(args.param(0, "x"), Some(&Value::Int(1)));
    assert_eq!(args.param(1, "y"), Some(&Value::Int(5)));
    assert!(matches!(
      args.require(2, "z"),
      Err(OperatorError::MissingArgument { .. })
    ));
  }

  #[test]
  fn test_refs_cover_named_and_nested() {
    let args = Args::new()
      .arg(NodeRef::new(3))
      .kwarg("items", vec![Value::Ref(NodeRef::new(1)), Value::Int(0)])
      .kwarg("again", NodeRef::new(3));
    assert_eq!(args.refs().into_iter().collect::<Vec<_>>(), vec![1, 3]);
  }

  #[test]
  fn test_resolve() {
    let args = Args::new()
      .arg(NodeRef::new(1))
      .kwarg("y", vec![Value::Ref(NodeRef::new(2))]);
    let resolved = args
      .resolve(|r| Ok::<_, ()>(Value::Int(r.exec_id as i64 + 100)))
      .unwrap();
    assert_eq!(resolved.positional, vec![Value::Int(101)]);
    assert_eq!(
      resolved.named("y"),
      Some(&Value::List(vec![Value::Int(102)]))
    );
  }
}
