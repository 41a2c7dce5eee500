//! Dynamic values exchanged between graph nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ciborium::value::{Integer, Value as Cbor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;

/// CBOR tag used to mark an embedded node reference.
pub const REF_TAG: u64 = 40000;

/// Reference to another node of the same task, by exec id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
  pub exec_id: u64,
}

impl NodeRef {
  pub fn new(exec_id: u64) -> Self {
    Self { exec_id }
  }
}

/// A dynamically typed value: an operator argument, a result payload, or a
/// constructor argument.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  Bytes(Vec<u8>),
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
  /// A not-yet-resolved reference to another node's result.
  Ref(NodeRef),
}

impl Value {
  /// Build a `Bytes` value.
  pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
    Value::Bytes(data.into())
  }

  /// Build a `Map` value from string-keyed pairs.
  pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<Value>,
  {
    Value::Map(
      entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }

  /// Short name of the variant, used in error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::Str(_) => "str",
      Value::Bytes(_) => "bytes",
      Value::List(_) => "list",
      Value::Map(_) => "map",
      Value::Ref(_) => "ref",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  /// Numeric view; integers widen to floats.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Int(i) => Some(*i as f64),
      Value::Float(f) => Some(*f),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_node_ref(&self) -> Option<NodeRef> {
    match self {
      Value::Ref(r) => Some(*r),
      _ => None,
    }
  }

  /// Truthiness: empty containers, zero, null and `false` are falsy.
  pub fn truthy(&self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::Str(s) => !s.is_empty(),
      Value::Bytes(b) => !b.is_empty(),
      Value::List(items) => !items.is_empty(),
      Value::Map(map) => !map.is_empty(),
      Value::Ref(_) => true,
    }
  }

  /// Whether a reference appears anywhere inside this value.
  pub fn contains_ref(&self) -> bool {
    match self {
      Value::Ref(_) => true,
      Value::List(items) => items.iter().any(Value::contains_ref),
      Value::Map(map) => map.values().any(Value::contains_ref),
      _ => false,
    }
  }

  /// Exec ids of every reference nested in this value, deduplicated.
  pub fn refs(&self) -> BTreeSet<u64> {
    let mut out = BTreeSet::new();
    self.collect_refs(&mut out);
    out
  }

  /// Collect the exec ids of every reference nested in this value.
  pub fn collect_refs(&self, out: &mut BTreeSet<u64>) {
    match self {
      Value::Ref(r) => {
        out.insert(r.exec_id);
      }
      Value::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
      Value::Map(map) => map.values().for_each(|v| v.collect_refs(out)),
      _ => {}
    }
  }

  /// Replace every nested reference with the value returned by `resolve`.
  pub fn resolve_refs<E>(
    self,
    resolve: &mut impl FnMut(NodeRef) -> Result<Value, E>,
  ) -> Result<Value, E> {
    match self {
      Value::Ref(r) => resolve(r),
      Value::List(items) => items
        .into_iter()
        .map(|v| v.resolve_refs(resolve))
        .collect::<Result<Vec<_>, E>>()
        .map(Value::List),
      Value::Map(map) => map
        .into_iter()
        .map(|(k, v)| v.resolve_refs(resolve).map(|v| (k, v)))
        .collect::<Result<BTreeMap<_, _>, E>>()
        .map(Value::Map),
      other => Ok(other),
    }
  }

  fn to_cbor(&self) -> Cbor {
    match self {
      Value::Null => Cbor::Null,
      Value::Bool(b) => Cbor::Bool(*b),
      Value::Int(i) => Cbor::Integer(Integer::from(*i)),
      Value::Float(f) => Cbor::Float(*f),
      Value::Str(s) => Cbor::Text(s.clone()),
      Value::Bytes(b) => Cbor::Bytes(b.clone()),
      Value::List(items) => Cbor::Array(items.iter().map(Value::to_cbor).collect()),
      Value::Map(map) => Cbor::Map(
        map
          .iter()
          .map(|(k, v)| (Cbor::Text(k.clone()), v.to_cbor()))
          .collect(),
      ),
      Value::Ref(r) => Cbor::Tag(REF_TAG, Box::new(Cbor::Integer(Integer::from(r.exec_id)))),
    }
  }

  fn from_cbor(raw: Cbor) -> Result<Self, CodecError> {
    match raw {
      Cbor::Null => Ok(Value::Null),
      Cbor::Bool(b) => Ok(Value::Bool(b)),
      Cbor::Integer(i) => i64::try_from(i)
        .map(Value::Int)
        .map_err(|_| CodecError::decode("integer does not fit in i64")),
      Cbor::Float(f) => Ok(Value::Float(f)),
      Cbor::Text(s) => Ok(Value::Str(s)),
      Cbor::Bytes(b) => Ok(Value::Bytes(b)),
      Cbor::Array(items) => items
        .into_iter()
        .map(Value::from_cbor)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List),
      Cbor::Map(entries) => {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
          let Cbor::Text(key) = key else {
            return Err(CodecError::decode("map keys must be strings"));
          };
          map.insert(key, Value::from_cbor(value)?);
        }
        Ok(Value::Map(map))
      }
      Cbor::Tag(REF_TAG, inner) => match *inner {
        Cbor::Integer(i) => u64::try_from(i)
          .map(|exec_id| Value::Ref(NodeRef { exec_id }))
          .map_err(|_| CodecError::decode("node reference must be a non-negative integer")),
        _ => Err(CodecError::decode("node reference must wrap an integer")),
      },
      Cbor::Tag(tag, _) => Err(CodecError::decode(format!("unsupported CBOR tag {}", tag))),
      _ => Err(CodecError::decode("unsupported CBOR item")),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_cbor().serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Value {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = Cbor::deserialize(deserializer)?;
    Value::from_cbor(raw).map_err(serde::de::Error::custom)
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Int(i) => write!(f, "{}", i),
      Value::Float(x) => write!(f, "{:?}", x),
      Value::Str(s) => write!(f, "{:?}", s),
      Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
      Value::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
      Value::Map(map) => {
        write!(f, "{{")?;
        for (i, (k, v)) in map.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{:?}: {}", k, v)?;
        }
        write!(f, "}}")
      }
      Value::Ref(r) => write!(f, "@{}", r.exec_id),
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Value::Int(i64::from(i))
  }
}

impl From<u32> for Value {
  fn from(i: u32) -> Self {
    Value::Int(i64::from(i))
  }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self {
    Value::Float(f)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl From<&[u8]> for Value {
  fn from(b: &[u8]) -> Self {
    Value::Bytes(b.to_vec())
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::List(items)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(map: BTreeMap<String, Value>) -> Self {
    Value::Map(map)
  }
}

impl From<NodeRef> for Value {
  fn from(r: NodeRef) -> Self {
    Value::Ref(r)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(opt: Option<T>) -> Self {
    opt.map_or(Value::Null, Into::into)
  }
}

macro_rules! try_from_value {
  ($ty:ty, $expected:literal, $pat:pat => $out:expr) => {
    impl TryFrom<Value> for $ty {
      type Error = CodecError;

      fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
          $pat => Ok($out),
          other => Err(CodecError::TypeMismatch {
            expected: $expected,
            found: other.type_name(),
          }),
        }
      }
    }
  };
}

try_from_value!(bool, "bool", Value::Bool(b) => b);
try_from_value!(i64, "int", Value::Int(i) => i);
try_from_value!(String, "str", Value::Str(s) => s);
try_from_value!(Vec<u8>, "bytes", Value::Bytes(b) => b);
try_from_value!(Vec<Value>, "list", Value::List(items) => items);

impl TryFrom<Value> for f64 {
  type Error = CodecError;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    value.as_f64().ok_or(CodecError::TypeMismatch {
      expected: "number",
      found: value.type_name(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_collect_refs_walks_nested_containers() {
    let value = Value::List(vec![
      Value::Int(1),
      Value::Ref(NodeRef::new(4)),
      Value::map([("inner", Value::List(vec![Value::Ref(NodeRef::new(2))]))]),
      Value::Ref(NodeRef::new(4)),
    ]);

    let mut refs = BTreeSet::new();
    value.collect_refs(&mut refs);

    assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![2, 4]);
    assert!(value.contains_ref());
    assert!(!Value::map([("a", 1)]).contains_ref());
  }

  #[test]
  fn test_resolve_refs_replaces_in_place() {
    let value = Value::map([
      ("x", Value::Ref(NodeRef::new(1))),
      ("ys", Value::List(vec![Value::Ref(NodeRef::new(2)), Value::Int(9)])),
    ]);

    let resolved = value
      .resolve_refs(&mut |r| Ok::<_, ()>(Value::Int(r.exec_id as i64 * 10)))
      .unwrap();

    assert_eq!(
      resolved,
      Value::map([
        ("x", Value::Int(10)),
        ("ys", Value::List(vec![Value::Int(20), Value::Int(9)])),
      ])
    );
  }

  #[test]
  fn test_try_from_reports_mismatch() {
    let err = i64::try_from(Value::Str("x".into())).unwrap_err();
    assert!(matches!(
      err,
      CodecError::TypeMismatch {
        expected: "int",
        found: "str"
      }
    ));
    assert_eq!(f64::try_from(Value::Int(3)).unwrap(), 3.0);
  }

  #[test]
  fn test_truthiness() {
    assert!(!Value::Null.truthy());
    assert!(!Value::Int(0).truthy());
    assert!(Value::Str("a".into()).truthy());
    assert!(!Value::List(vec![]).truthy());
    assert!(Value::Ref(NodeRef::new(1)).truthy());
  }

  #[test]
  fn test_display() {
    let value = Value::map([
      ("a", Value::List(vec![Value::Int(1), Value::Float(2.5)])),
      ("b", Value::Ref(NodeRef::new(7))),
    ]);
    assert_eq!(value.to_string(), r#"{"a": [1, 2.5], "b": @7}"#);
  }
}
