//! Tessera Graph
//!
//! This crate builds lazy computation graphs. Calling an operator through a
//! [`Session`] registers a node in the coordination store and immediately
//! returns a [`NodeFuture`]; workers execute nodes as their dependencies
//! complete, and the future blocks only when its result is requested.
//!
//! ```text
//!   session.invoke(&Add, [1, 2])        ──▶ node 1 (no deps)   ──▶ dispatched
//!   session.invoke(&Add, [3, 4])        ──▶ node 2 (no deps)   ──▶ dispatched
//!   &r1 * &r2                           ──▶ node 3 (deps 1, 2) ──▶ waits
//!                                                  │
//!           completion of the last dependency ─────┘──▶ dispatched exactly once
//! ```
//!
//! Operators are identified by a string tag and rebuilt on workers through an
//! [`OperatorRegistry`]. Code running inside an operator receives a
//! [`JobContext`] whose session is bound to the same task, so operators can
//! build further nodes and return references to them.

mod builtin;
mod error;
mod future;
mod job;
mod operator;
mod session;

pub use builtin::{
  Add, BitwiseAnd, BitwiseOr, BitwiseXor, Divide, Equal, FloorDivide, Greater, GreaterEqual,
  Invert, LeftShift, Less, LessEqual, LogicalAnd, LogicalNot, LogicalOr, Modulo, Mul, Negate,
  NotEqual, ObjectDelete, ObjectRead, ObjectWrite, Power, RightShift, Subtract, object_ref,
};
pub use error::{FutureError, GraphError, OperatorError, panic_message};
pub use future::NodeFuture;
pub use job::{Args, Job, Outcome, ResultRecord};
pub use operator::{JobContext, Operator, OperatorRegistry};
pub use session::{Backends, Session, SessionBuilder};
pub use tessera_codec::{Codec, CodecError, NodeRef, Value};
