//! Built-in operators: arithmetic, bitwise, comparison and logical operators
//! used by future composition, plus object-store access.
//!
//! Binary operators take `x` and `y`, positionally or by name. Integer
//! arithmetic is checked; mixing integers and floats computes in floating
//! point. `Divide` always yields a float, while `FloorDivide` and `Modulo`
//! round toward negative infinity.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tessera_codec::Value;

use crate::error::OperatorError;
use crate::job::Args;
use crate::operator::{JobContext, Operator, OperatorRegistry};

macro_rules! binary_operator {
  ($($name:ident => $func:ident;)*) => {
    $(
      #[derive(Debug, Clone, Copy, Default)]
      pub struct $name;

      impl Operator for $name {
        fn kind(&self) -> &str {
          stringify!($name)
        }

        fn compute(&self, _ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
          let x = args.require(0, "x")?;
          let y = args.require(1, "y")?;
          $func(x, y)
        }
      }
    )*
  };
}

macro_rules! unary_operator {
  ($($name:ident => $func:ident;)*) => {
    $(
      #[derive(Debug, Clone, Copy, Default)]
      pub struct $name;

      impl Operator for $name {
        fn kind(&self) -> &str {
          stringify!($name)
        }

        fn compute(&self, _ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
          $func(args.require(0, "x")?)
        }
      }
    )*
  };
}

binary_operator! {
  Add => add;
  Subtract => subtract;
  Mul => multiply;
  Divide => divide;
  FloorDivide => floor_divide;
  Modulo => modulo;
  Power => power;
  BitwiseAnd => bitwise_and;
  BitwiseOr => bitwise_or;
  BitwiseXor => bitwise_xor;
  LeftShift => left_shift;
  RightShift => right_shift;
  Equal => equal;
  NotEqual => not_equal;
  Less => less;
  LessEqual => less_equal;
  Greater => greater;
  GreaterEqual => greater_equal;
  LogicalAnd => logical_and;
  LogicalOr => logical_or;
}

unary_operator! {
  Negate => negate;
  Invert => invert;
  LogicalNot => logical_not;
}

pub(crate) fn register_builtins(registry: &mut OperatorRegistry) {
  fn unit<O: Operator + Default + 'static>(registry: &mut OperatorRegistry) {
    // Built-in tags are distinct, so registration into a fresh registry
    // cannot collide.
    let _ = registry.register_unit::<O>();
  }

  unit::<Add>(registry);
  unit::<Subtract>(registry);
  unit::<Mul>(registry);
  unit::<Divide>(registry);
  unit::<FloorDivide>(registry);
  unit::<Modulo>(registry);
  unit::<Power>(registry);
  unit::<BitwiseAnd>(registry);
  unit::<BitwiseOr>(registry);
  unit::<BitwiseXor>(registry);
  unit::<LeftShift>(registry);
  unit::<RightShift>(registry);
  unit::<Equal>(registry);
  unit::<NotEqual>(registry);
  unit::<Less>(registry);
  unit::<LessEqual>(registry);
  unit::<Greater>(registry);
  unit::<GreaterEqual>(registry);
  unit::<LogicalAnd>(registry);
  unit::<LogicalOr>(registry);
  unit::<LogicalNot>(registry);
  unit::<Negate>(registry);
  unit::<Invert>(registry);
  unit::<ObjectWrite>(registry);
  unit::<ObjectRead>(registry);
  unit::<ObjectDelete>(registry);
  let _ = registry.register("Multiply", |_| Ok(Box::new(Mul) as Box<dyn Operator>));
}

fn unsupported(op: &str, x: &Value, y: &Value) -> OperatorError {
  OperatorError::failed(format!(
    "unsupported operand types for {}: {} and {}",
    op,
    x.type_name(),
    y.type_name()
  ))
}

fn overflow(op: &str) -> OperatorError {
  OperatorError::failed(format!("integer overflow in {}", op))
}

fn zero_division() -> OperatorError {
  OperatorError::failed("division by zero")
}

fn arith(
  op: &str,
  x: &Value,
  y: &Value,
  int: fn(i64, i64) -> Option<i64>,
  float: fn(f64, f64) -> f64,
) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Int(a), Value::Int(b)) => int(*a, *b).map(Value::Int).ok_or_else(|| overflow(op)),
    _ => match (x.as_f64(), y.as_f64()) {
      (Some(a), Some(b)) => Ok(Value::Float(float(a, b))),
      _ => Err(unsupported(op, x, y)),
    },
  }
}

fn add(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
    (Value::List(a), Value::List(b)) => Ok(Value::List([a.as_slice(), b.as_slice()].concat())),
    (Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([a.as_slice(), b.as_slice()].concat())),
    _ => arith("Add", x, y, i64::checked_add, |a, b| a + b),
  }
}

fn subtract(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  arith("Subtract", x, y, i64::checked_sub, |a, b| a - b)
}

fn multiply(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  arith("Mul", x, y, i64::checked_mul, |a, b| a * b)
}

fn divide(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  match (x.as_f64(), y.as_f64()) {
    (Some(_), Some(b)) if b == 0.0 => Err(zero_division()),
    (Some(a), Some(b)) => Ok(Value::Float(a / b)),
    _ => Err(unsupported("Divide", x, y)),
  }
}

fn floor_divide(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Int(_), Value::Int(0)) => Err(zero_division()),
    (Value::Int(a), Value::Int(b)) => {
      let q = a.checked_div(*b).ok_or_else(|| overflow("FloorDivide"))?;
      let adjust = a % b != 0 && ((*a < 0) != (*b < 0));
      Ok(Value::Int(if adjust { q - 1 } else { q }))
    }
    _ => match (x.as_f64(), y.as_f64()) {
      (Some(_), Some(b)) if b == 0.0 => Err(zero_division()),
      (Some(a), Some(b)) => Ok(Value::Float((a / b).floor())),
      _ => Err(unsupported("FloorDivide", x, y)),
    },
  }
}

fn modulo(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Int(_), Value::Int(0)) => Err(zero_division()),
    (Value::Int(a), Value::Int(b)) => {
      let r = a.checked_rem(*b).ok_or_else(|| overflow("Modulo"))?;
      Ok(Value::Int(if r != 0 && ((r < 0) != (*b < 0)) { r + b } else { r }))
    }
    _ => match (x.as_f64(), y.as_f64()) {
      (Some(_), Some(b)) if b == 0.0 => Err(zero_division()),
      (Some(a), Some(b)) => {
        let r = a % b;
        Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }))
      }
      _ => Err(unsupported("Modulo", x, y)),
    },
  }
}

fn power(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Int(a), Value::Int(b)) if *b >= 0 => {
      let exp = u32::try_from(*b).map_err(|_| overflow("Power"))?;
      a.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("Power"))
    }
    _ => match (x.as_f64(), y.as_f64()) {
      (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
      _ => Err(unsupported("Power", x, y)),
    },
  }
}

fn bitwise(
  op: &str,
  x: &Value,
  y: &Value,
  int: fn(i64, i64) -> i64,
  boolean: fn(bool, bool) -> bool,
) -> Result<Value, OperatorError> {
  match (x, y) {
    (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int(*a, *b))),
    (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(boolean(*a, *b))),
    _ => Err(unsupported(op, x, y)),
  }
}

fn bitwise_and(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  bitwise("BitwiseAnd", x, y, |a, b| a & b, |a, b| a & b)
}

fn bitwise_or(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  bitwise("BitwiseOr", x, y, |a, b| a | b, |a, b| a | b)
}

fn bitwise_xor(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  bitwise("BitwiseXor", x, y, |a, b| a ^ b, |a, b| a ^ b)
}

fn shift_operands(op: &str, x: &Value, y: &Value) -> Result<(i64, u32), OperatorError> {
  match (x, y) {
    (Value::Int(_), Value::Int(b)) if *b < 0 => Err(OperatorError::failed("negative shift count")),
    (Value::Int(a), Value::Int(b)) => Ok((*a, u32::try_from(*b).unwrap_or(u32::MAX))),
    _ => Err(unsupported(op, x, y)),
  }
}

fn left_shift(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  let (a, b) = shift_operands("LeftShift", x, y)?;
  if a == 0 {
    return Ok(Value::Int(0));
  }
  if b >= 64 {
    return Err(overflow("LeftShift"));
  }
  let shifted = a << b;
  if shifted >> b != a {
    return Err(overflow("LeftShift"));
  }
  Ok(Value::Int(shifted))
}

fn right_shift(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  let (a, b) = shift_operands("RightShift", x, y)?;
  Ok(Value::Int(a >> b.min(63)))
}

fn values_equal(x: &Value, y: &Value) -> bool {
  match (x, y) {
    (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => x.as_f64() == y.as_f64(),
    _ => x == y,
  }
}

fn compare(op: &str, x: &Value, y: &Value) -> Result<Ordering, OperatorError> {
  let ordering = match (x, y) {
    (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
    (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
    (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
    _ => match (x.as_f64(), y.as_f64()) {
      (Some(a), Some(b)) => a.partial_cmp(&b),
      _ => return Err(unsupported(op, x, y)),
    },
  };
  ordering.ok_or_else(|| OperatorError::failed(format!("{} is undefined for NaN", op)))
}

fn equal(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(values_equal(x, y)))
}

fn not_equal(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(!values_equal(x, y)))
}

fn less(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(compare("Less", x, y)?.is_lt()))
}

fn less_equal(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(compare("LessEqual", x, y)?.is_le()))
}

fn greater(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(compare("Greater", x, y)?.is_gt()))
}

fn greater_equal(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(compare("GreaterEqual", x, y)?.is_ge()))
}

/// `x` if it is falsy, otherwise `y`.
fn logical_and(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(if x.truthy() { y.clone() } else { x.clone() })
}

/// `x` if it is truthy, otherwise `y`.
fn logical_or(x: &Value, y: &Value) -> Result<Value, OperatorError> {
  Ok(if x.truthy() { x.clone() } else { y.clone() })
}

fn logical_not(x: &Value) -> Result<Value, OperatorError> {
  Ok(Value::Bool(!x.truthy()))
}

fn negate(x: &Value) -> Result<Value, OperatorError> {
  match x {
    Value::Int(a) => a.checked_neg().map(Value::Int).ok_or_else(|| overflow("Negate")),
    Value::Float(a) => Ok(Value::Float(-a)),
    other => Err(OperatorError::failed(format!(
      "unsupported operand type for Negate: {}",
      other.type_name()
    ))),
  }
}

/// Bitwise complement for integers, logical negation for booleans.
fn invert(x: &Value) -> Result<Value, OperatorError> {
  match x {
    Value::Int(a) => Ok(Value::Int(!a)),
    Value::Bool(b) => Ok(Value::Bool(!b)),
    other => Err(OperatorError::failed(format!(
      "unsupported operand type for Invert: {}",
      other.type_name()
    ))),
  }
}

/// Build the map that identifies a stored object.
pub fn object_ref(bucket: &str, object_name: &str) -> Value {
  let mut map = BTreeMap::new();
  map.insert("bucket".to_string(), Value::from(bucket));
  map.insert("object_name".to_string(), Value::from(object_name));
  Value::Map(map)
}

/// Bucket and object name from `bucket`/`object_name` parameters, or from an
/// object reference map passed as the first argument.
fn object_location(args: &Args) -> Result<(String, String), OperatorError> {
  if let Some(map) = args.get(0).and_then(Value::as_map) {
    let field = |name: &str| {
      map
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OperatorError::invalid("x", format!("object reference is missing '{}'", name)))
    };
    return Ok((field("bucket")?, field("object_name")?));
  }
  Ok((
    args.require_str(0, "bucket")?.to_string(),
    args.require_str(1, "object_name")?.to_string(),
  ))
}

/// Store `data` (bytes or a string) and return its object reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectWrite;

impl Operator for ObjectWrite {
  fn kind(&self) -> &str {
    "ObjectWrite"
  }

  fn compute(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
    let bucket = args.require_str(0, "bucket")?;
    let object_name = args.require_str(1, "object_name")?;
    let data = match args.require(2, "data")? {
      Value::Bytes(bytes) => bytes.as_slice(),
      Value::Str(s) => s.as_bytes(),
      other => {
        return Err(OperatorError::invalid(
          "data",
          format!("data must be bytes or str, got {}", other.type_name()),
        ));
      }
    };
    ctx.objects().put(bucket, object_name, data)?;
    Ok(object_ref(bucket, object_name))
  }
}

/// Read an object's bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectRead;

impl Operator for ObjectRead {
  fn kind(&self) -> &str {
    "ObjectRead"
  }

  fn compute(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
    let (bucket, object_name) = object_location(&args)?;
    Ok(Value::Bytes(ctx.objects().get(&bucket, &object_name)?))
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectDelete;

impl Operator for ObjectDelete {
  fn kind(&self) -> &str {
    "ObjectDelete"
  }

  fn compute(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
    let (bucket, object_name) = object_location(&args)?;
    ctx.objects().delete(&bucket, &object_name)?;
    Ok(Value::Bool(true))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::{Backends, Session};

  fn run(op: &dyn Operator, args: impl Into<Args>) -> Result<Value, OperatorError> {
    let session = Session::new(Backends::in_memory());
    let ctx = JobContext::new(&session, 1);
    op.compute(&ctx, args.into())
  }

  #[test]
  fn test_arithmetic() {
    assert_eq!(run(&Add, [1, 2]).unwrap(), Value::Int(3));
    assert_eq!(run(&Add, Args::new().arg(1).arg(0.5)).unwrap(), Value::Float(1.5));
    assert_eq!(run(&Add, ["ab", "cd"]).unwrap(), Value::Str("abcd".into()));
    assert_eq!(run(&Subtract, [3, 5]).unwrap(), Value::Int(-2));
    assert_eq!(run(&Mul, Args::new().kwarg("x", 3).kwarg("y", 2)).unwrap(), Value::Int(6));
    assert_eq!(run(&Divide, [7, 2]).unwrap(), Value::Float(3.5));
    assert_eq!(run(&Power, [2, 10]).unwrap(), Value::Int(1024));
    assert_eq!(run(&Power, [2, -1]).unwrap(), Value::Float(0.5));
  }

  #[test]
  fn test_floor_semantics() {
    assert_eq!(run(&FloorDivide, [7, 2]).unwrap(), Value::Int(3));
    assert_eq!(run(&FloorDivide, [-7, 2]).unwrap(), Value::Int(-4));
    assert_eq!(run(&Modulo, [-7, 3]).unwrap(), Value::Int(2));
    assert_eq!(run(&Modulo, [7, -3]).unwrap(), Value::Int(-2));
    assert_eq!(run(&Modulo, [6, 3]).unwrap(), Value::Int(0));
  }

  #[test]
  fn test_arithmetic_errors() {
    assert!(run(&Divide, [1, 0]).is_err());
    assert!(run(&FloorDivide, [1, 0]).is_err());
    assert!(run(&Modulo, [1, 0]).is_err());
    assert!(run(&Add, Args::new().arg(i64::MAX).arg(1)).is_err());
    assert!(run(&Subtract, Args::new().arg("a").arg(1)).is_err());
    assert!(matches!(
      run(&Add, [1]),
      Err(OperatorError::MissingArgument { name }) if name == "y"
    ));
  }

  #[test]
  fn test_bitwise_and_shifts() {
    assert_eq!(run(&BitwiseAnd, [6, 3]).unwrap(), Value::Int(2));
    assert_eq!(run(&BitwiseOr, [6, 3]).unwrap(), Value::Int(7));
    assert_eq!(run(&BitwiseXor, [6, 3]).unwrap(), Value::Int(5));
    assert_eq!(run(&BitwiseAnd, [true, false]).unwrap(), Value::Bool(false));
    assert_eq!(run(&LeftShift, [1, 4]).unwrap(), Value::Int(16));
    assert_eq!(run(&RightShift, [-16, 2]).unwrap(), Value::Int(-4));
    assert_eq!(run(&RightShift, [-1, 200]).unwrap(), Value::Int(-1));
    assert!(run(&LeftShift, [1, 64]).is_err());
    assert!(run(&LeftShift, [1, -1]).is_err());
  }

  #[test]
  fn test_comparisons_and_logic() {
    assert_eq!(run(&Equal, Args::new().arg(1).arg(1.0)).unwrap(), Value::Bool(true));
    assert_eq!(run(&NotEqual, ["a", "b"]).unwrap(), Value::Bool(true));
    assert_eq!(run(&Less, [1, 2]).unwrap(), Value::Bool(true));
    assert_eq!(run(&GreaterEqual, ["b", "a"]).unwrap(), Value::Bool(true));
    assert!(run(&Less, Args::new().arg("a").arg(1)).is_err());
    assert_eq!(run(&LogicalAnd, [0, 5]).unwrap(), Value::Int(0));
    assert_eq!(run(&LogicalOr, [0, 5]).unwrap(), Value::Int(5));
    assert_eq!(run(&LogicalNot, [0]).unwrap(), Value::Bool(true));
    assert_eq!(run(&Negate, [4]).unwrap(), Value::Int(-4));
    assert_eq!(run(&Invert, [0]).unwrap(), Value::Int(-1));
  }

  #[test]
  fn test_object_operators() {
    let session = Session::new(Backends::in_memory());
    let ctx = JobContext::new(&session, 1);

    let reference = ObjectWrite
      .compute(&ctx, Args::from(["inputs", "case.txt", "hello"]))
      .unwrap();
    assert_eq!(reference, object_ref("inputs", "case.txt"));

    let read = ObjectRead
      .compute(&ctx, Args::new().arg(reference.clone()))
      .unwrap();
    assert_eq!(read, Value::bytes(b"hello".to_vec()));

    let by_name = ObjectRead
      .compute(
        &ctx,
        Args::new()
          .kwarg("bucket", "inputs")
          .kwarg("object_name", "case.txt"),
      )
      .unwrap();
    assert_eq!(by_name, read);

    ObjectDelete.compute(&ctx, Args::new().arg(reference)).unwrap();
    assert!(!session.objects().exists("inputs", "case.txt").unwrap());
    assert!(matches!(
      ObjectRead.compute(&ctx, Args::from(["inputs", "case.txt"])),
      Err(OperatorError::Store(_))
    ));
  }
}
