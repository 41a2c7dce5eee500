use std::fmt;
use std::ops;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tessera_codec::{NodeRef, Value};

use crate::error::{FutureError, GraphError};
use crate::job::{Args, Outcome, ResultRecord};
use crate::session::Session;

/// Handle to a graph node's eventual result.
///
/// Futures are created without blocking. [`NodeFuture::result`] blocks until
/// the node has a result record. Clones share one cache, so only the first
/// successful wait touches the store.
///
/// Arithmetic, bitwise and unary operators on futures build new nodes:
///
/// ```ignore
/// let r1 = session.invoke(&Add, [1, 2])?;
/// let r2 = session.invoke(&Add, [3, 4])?;
/// let r4 = &r1 * &r2;       // Mul(r1, r2)
/// assert_eq!(r4.result()?, Value::Int(21));
/// ```
///
/// A node that cannot be built inside an operator expression produces a
/// detached future whose `result()` reports the build error.
#[derive(Clone)]
pub struct NodeFuture {
  session: Session,
  exec_id: u64,
  cache: Arc<OnceLock<Outcome>>,
  detached: Option<Arc<str>>,
}

impl NodeFuture {
  pub(crate) fn new(session: Session, exec_id: u64) -> Self {
    Self {
      session,
      exec_id,
      cache: Arc::new(OnceLock::new()),
      detached: None,
    }
  }

  fn detached(session: Session, error: &GraphError) -> Self {
    Self {
      session,
      exec_id: 0,
      cache: Arc::new(OnceLock::new()),
      detached: Some(Arc::from(error.to_string())),
    }
  }

  pub fn exec_id(&self) -> u64 {
    self.exec_id
  }

  pub fn task_id(&self) -> &str {
    self.session.task_id()
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn node_ref(&self) -> NodeRef {
    NodeRef::new(self.exec_id)
  }

  /// This future as an argument for another node.
  pub fn to_value(&self) -> Value {
    Value::Ref(self.node_ref())
  }

  /// The build error, for a future that was never attached to a node.
  pub fn build_error(&self) -> Option<&str> {
    self.detached.as_deref()
  }

  /// Whether the node already has a result, without blocking.
  pub fn is_done(&self) -> Result<bool, FutureError> {
    if self.cache.get().is_some() {
      return Ok(true);
    }
    if let Some(message) = &self.detached {
      return Err(FutureError::Detached {
        message: message.to_string(),
      });
    }
    let store = self.session.store();
    Ok(store.load_result(self.task_id(), self.exec_id)?.is_some())
  }

  /// Block until the node completes and return its value.
  pub fn result(&self) -> Result<Value, FutureError> {
    self.wait(None)
  }

  /// Like [`NodeFuture::result`], but give up after `timeout`.
  pub fn result_timeout(&self, timeout: Duration) -> Result<Value, FutureError> {
    self.wait(Some(timeout))
  }

  /// Block until the final value is known, following results that are
  /// themselves references to other nodes.
  pub fn resolve(&self) -> Result<Value, FutureError> {
    let mut value = self.result()?;
    while let Value::Ref(node) = value {
      value = self.session.future(node).result()?;
    }
    Ok(value)
  }

  fn wait(&self, timeout: Option<Duration>) -> Result<Value, FutureError> {
    if let Some(message) = &self.detached {
      return Err(FutureError::Detached {
        message: message.to_string(),
      });
    }

    let outcome = match self.cache.get() {
      Some(outcome) => outcome,
      None => {
        let fetched = self.fetch(timeout)?;
        self.cache.get_or_init(|| fetched)
      }
    };

    match outcome {
      Outcome::Success(value) => Ok(value.clone()),
      Outcome::Error(message) => Err(FutureError::Failed {
        exec_id: self.exec_id,
        message: message.clone(),
      }),
    }
  }

  /// Read the result record, waiting on completion signals until it exists.
  ///
  /// A signal is consumed by exactly one waiter, so the record is rechecked
  /// after every poll interval for handles that lost the race.
  fn fetch(&self, timeout: Option<Duration>) -> Result<Outcome, FutureError> {
    let store = self.session.store();
    let codec = self.session.codec();
    let task_id = self.task_id();
    let poll = self.session.backends().poll_interval;
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
      if let Some(blob) = store.load_result(task_id, self.exec_id)? {
        let record: ResultRecord = codec.decode(&blob)?;
        return Ok(record.outcome);
      }

      let wait = match deadline {
        None => poll,
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Err(FutureError::Timeout {
              exec_id: self.exec_id,
              waited: timeout.unwrap_or_default(),
            });
          }
          (deadline - now).min(poll)
        }
      };
      store.wait_completion(task_id, self.exec_id, wait)?;
    }
  }

  /// Build a node of `kind` with this future as its first argument.
  pub fn try_apply(&self, kind: &str, rhs: Option<Value>) -> Result<NodeFuture, GraphError> {
    if let Some(message) = &self.detached {
      return Err(GraphError::DetachedOperand {
        message: message.to_string(),
      });
    }
    let mut args = Args::new().arg(self.to_value());
    if let Some(rhs) = rhs {
      args = args.arg(rhs);
    }
    self.session.invoke_named(kind, Vec::new(), args)
  }

  /// Like [`NodeFuture::try_apply`], but a build failure becomes a detached
  /// future.
  pub fn apply(&self, kind: &str, rhs: Option<Value>) -> NodeFuture {
    self
      .try_apply(kind, rhs)
      .unwrap_or_else(|e| NodeFuture::detached(self.session.clone(), &e))
  }
}

macro_rules! binary_methods {
  ($($method:ident, $try_method:ident => $kind:literal;)*) => {
    impl NodeFuture {
      $(
        #[doc = concat!("Build a `", $kind, "` node of this future and `rhs`.")]
        pub fn $try_method(&self, rhs: impl Into<Value>) -> Result<NodeFuture, GraphError> {
          self.try_apply($kind, Some(rhs.into()))
        }

        #[doc = concat!("Infallible form of [`NodeFuture::", stringify!($try_method), "`].")]
        pub fn $method(&self, rhs: impl Into<Value>) -> NodeFuture {
          self.apply($kind, Some(rhs.into()))
        }
      )*
    }
  };
}

binary_methods! {
  add, try_add => "Add";
  sub, try_sub => "Subtract";
  mul, try_mul => "Mul";
  div, try_div => "Divide";
  rem, try_rem => "Modulo";
  pow, try_pow => "Power";
  floor_div, try_floor_div => "FloorDivide";
  bitand, try_bitand => "BitwiseAnd";
  bitor, try_bitor => "BitwiseOr";
  bitxor, try_bitxor => "BitwiseXor";
  shl, try_shl => "LeftShift";
  shr, try_shr => "RightShift";
  equal, try_equal => "Equal";
  not_equal, try_not_equal => "NotEqual";
  less, try_less => "Less";
  less_equal, try_less_equal => "LessEqual";
  greater, try_greater => "Greater";
  greater_equal, try_greater_equal => "GreaterEqual";
  logical_and, try_logical_and => "LogicalAnd";
  logical_or, try_logical_or => "LogicalOr";
}

impl NodeFuture {
  pub fn try_neg(&self) -> Result<NodeFuture, GraphError> {
    self.try_apply("Negate", None)
  }

  pub fn try_invert(&self) -> Result<NodeFuture, GraphError> {
    self.try_apply("Invert", None)
  }

  pub fn try_logical_not(&self) -> Result<NodeFuture, GraphError> {
    self.try_apply("LogicalNot", None)
  }

  pub fn logical_not(&self) -> NodeFuture {
    self.apply("LogicalNot", None)
  }
}

macro_rules! binary_operator {
  ($($trait:ident, $method:ident;)*) => {
    $(
      impl<R: Into<Value>> ops::$trait<R> for &NodeFuture {
        type Output = NodeFuture;

        fn $method(self, rhs: R) -> NodeFuture {
          NodeFuture::$method(self, rhs)
        }
      }

      impl<R: Into<Value>> ops::$trait<R> for NodeFuture {
        type Output = NodeFuture;

        fn $method(self, rhs: R) -> NodeFuture {
          NodeFuture::$method(&self, rhs)
        }
      }
    )*
  };
}

binary_operator! {
  Add, add;
  Sub, sub;
  Mul, mul;
  Div, div;
  Rem, rem;
  BitAnd, bitand;
  BitOr, bitor;
  BitXor, bitxor;
  Shl, shl;
  Shr, shr;
}

impl ops::Neg for &NodeFuture {
  type Output = NodeFuture;

  fn neg(self) -> NodeFuture {
    self.apply("Negate", None)
  }
}

impl ops::Neg for NodeFuture {
  type Output = NodeFuture;

  fn neg(self) -> NodeFuture {
    -&self
  }
}

impl ops::Not for &NodeFuture {
  type Output = NodeFuture;

  fn not(self) -> NodeFuture {
    self.apply("Invert", None)
  }
}

impl ops::Not for NodeFuture {
  type Output = NodeFuture;

  fn not(self) -> NodeFuture {
    !&self
  }
}

impl From<&NodeFuture> for Value {
  fn from(future: &NodeFuture) -> Self {
    future.to_value()
  }
}

impl From<NodeFuture> for Value {
  fn from(future: NodeFuture) -> Self {
    future.to_value()
  }
}

impl fmt::Debug for NodeFuture {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut debug = f.debug_struct("NodeFuture");
    debug
      .field("task_id", &self.task_id())
      .field("exec_id", &self.exec_id)
      .field("resolved", &self.cache.get().is_some());
    if let Some(message) = &self.detached {
      debug.field("detached", message);
    }
    debug.finish()
  }
}
