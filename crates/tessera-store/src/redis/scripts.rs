use crate::error::StoreError;
use crate::{Completion, ReadyNode};

/// KEYS: jobs, pending, completed
/// ARGV: exec_id, job, waiters_prefix, dep...
pub(super) const REGISTER_DEPENDENCIES: &str = r#"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
local pending = 0
for i = 4, #ARGV do
  local dep = ARGV[i]
  if redis.call('SISMEMBER', KEYS[3], dep) == 0 then
    if redis.call('SADD', ARGV[3] .. dep, ARGV[1]) == 1 then
      pending = pending + 1
    end
  end
end
redis.call('HSET', KEYS[2], ARGV[1], pending)
return pending
"#;

/// KEYS: completed, results, pending, jobs, signal
/// ARGV: exec_id, record, waiters_prefix, failed ("1" or "0")
///
/// Reply: `{"dup"}` or `{"ok", n_ready, id_1, job_1, .., id_n, job_n, orphan..}`.
pub(super) const COMPLETE_NODE: &str = r#"
if redis.call('SADD', KEYS[1], ARGV[1]) == 0 then
  return {'dup'}
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('RPUSH', KEYS[5], '1')
local waiters_key = ARGV[3] .. ARGV[1]
local waiters = redis.call('SMEMBERS', waiters_key)
redis.call('DEL', waiters_key)
local ready = {}
local ready_count = 0
local orphaned = {}
for _, waiter in ipairs(waiters) do
  if redis.call('SISMEMBER', KEYS[1], waiter) == 0 then
    if ARGV[4] == '1' then
      table.insert(orphaned, waiter)
    elseif redis.call('HINCRBY', KEYS[3], waiter, -1) == 0 then
      table.insert(ready, waiter)
      table.insert(ready, redis.call('HGET', KEYS[4], waiter) or '')
      ready_count = ready_count + 1
    end
  end
end
local reply = {'ok', tostring(ready_count)}
for _, item in ipairs(ready) do table.insert(reply, item) end
for _, item in ipairs(orphaned) do table.insert(reply, item) end
return reply
"#;

fn parse_id(raw: &[u8]) -> Result<u64, StoreError> {
  std::str::from_utf8(raw)
    .ok()
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| StoreError::InvalidReply {
      message: format!("expected an integer, got {:?}", String::from_utf8_lossy(raw)),
    })
}

/// Decode the flat reply of [`COMPLETE_NODE`].
pub(super) fn parse_completion(reply: Vec<Vec<u8>>) -> Result<Completion, StoreError> {
  let mut items = reply.into_iter();
  match items.next().as_deref() {
    Some(b"dup") => return Ok(Completion::duplicate()),
    Some(b"ok") => {}
    other => {
      return Err(StoreError::InvalidReply {
        message: format!(
          "unexpected completion status {:?}",
          other.map(String::from_utf8_lossy)
        ),
      });
    }
  }

  let count = items
    .next()
    .ok_or_else(|| StoreError::InvalidReply {
      message: "completion reply is missing the ready count".to_string(),
    })
    .and_then(|raw| parse_id(&raw))?;

  let mut completion = Completion::default();
  for _ in 0..count {
    let (Some(id), Some(job)) = (items.next(), items.next()) else {
      return Err(StoreError::InvalidReply {
        message: "completion reply is shorter than its ready count".to_string(),
      });
    };
    completion.ready.push(ReadyNode {
      exec_id: parse_id(&id)?,
      job,
    });
  }
  for raw in items {
    completion.orphaned.push(parse_id(&raw)?);
  }
  Ok(completion)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn reply(items: &[&[u8]]) -> Vec<Vec<u8>> {
    items.iter().map(|i| i.to_vec()).collect()
  }

  #[test]
  fn test_parse_duplicate() {
    let completion = parse_completion(reply(&[b"dup"])).unwrap();
    assert!(completion.duplicate);
  }

  #[test]
  fn test_parse_ready_and_orphans() {
    let completion =
      parse_completion(reply(&[b"ok", b"2", b"4", b"\x00job4", b"7", b"job7"])).unwrap();
    assert!(!completion.duplicate);
    assert_eq!(completion.ready.len(), 2);
    assert_eq!(completion.ready[0].exec_id, 4);
    assert_eq!(completion.ready[0].job, b"\x00job4");
    assert!(completion.orphaned.is_empty());

    let failed = parse_completion(reply(&[b"ok", b"0", b"5", b"9"])).unwrap();
    assert_eq!(failed.orphaned, vec![5, 9]);
  }

  #[test]
  fn test_parse_rejects_truncated_reply() {
    assert!(parse_completion(reply(&[b"ok", b"1", b"4"])).is_err());
    assert!(parse_completion(reply(&[])).is_err());
    assert!(parse_completion(reply(&[b"ok", b"x"])).is_err());
  }
}
