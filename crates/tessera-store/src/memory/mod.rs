//! In-process backends. State lives behind a mutex, so each graph primitive
//! is a single critical section.

mod broker;
mod objects;
mod store;

pub use broker::InMemoryBroker;
pub use objects::InMemoryObjectStore;
pub use store::InMemoryStore;

use std::sync::{Condvar, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::StoreError;

/// Wait on `cond` until `take` yields an item or `timeout` elapses.
fn wait_for<'a, S, T>(
  cond: &Condvar,
  mut guard: MutexGuard<'a, S>,
  timeout: Option<Duration>,
  mut take: impl FnMut(&mut S) -> Option<T>,
) -> Result<Option<T>, StoreError> {
  let deadline = timeout.map(|t| Instant::now() + t);
  loop {
    if let Some(item) = take(&mut guard) {
      return Ok(Some(item));
    }
    guard = match deadline {
      None => cond.wait(guard)?,
      Some(deadline) => {
        let now = Instant::now();
        if now >= deadline {
          return Ok(None);
        }
        cond.wait_timeout(guard, deadline - now)?.0
      }
    };
  }
}
