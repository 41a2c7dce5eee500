use std::thread;
use std::time::Duration;

use tessera_graph::{
  Add, Args, Backends, FutureError, Job, NodeRef, Outcome, ResultRecord, Session, Value,
};

/// Write a result record the way a worker would.
fn complete(session: &Session, exec_id: u64, outcome: Outcome) {
  let codec = session.codec();
  let record = codec.encode(&ResultRecord { exec_id, outcome }).unwrap();
  session
    .store()
    .complete_node(session.task_id(), exec_id, &record, false)
    .unwrap();
}

fn load_job(session: &Session, exec_id: u64) -> Job {
  let blob = session
    .store()
    .load_job(session.task_id(), exec_id)
    .unwrap()
    .unwrap();
  session.codec().decode(&blob).unwrap()
}

fn fast_backends() -> Backends {
  let mut backends = Backends::in_memory();
  backends.poll_interval = Duration::from_millis(20);
  backends
}

#[test]
fn test_result_blocks_until_completion() {
  let session = Session::new(fast_backends());
  let future = session.invoke(&Add, [1, 2]).unwrap();

  let completer = {
    let session = session.clone();
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(50));
      complete(&session, 1, Outcome::Success(Value::Int(3)));
    })
  };

  assert_eq!(future.result().unwrap(), Value::Int(3));
  completer.join().unwrap();
}

#[test]
fn test_many_handles_to_one_node_all_wake() {
  let session = Session::new(fast_backends());
  let future = session.invoke(&Add, [1, 2]).unwrap();

  let waiters: Vec<_> = (0..4)
    .map(|_| {
      // Independent handles do not share a cache.
      let handle = session.future(future.node_ref());
      thread::spawn(move || handle.result_timeout(Duration::from_secs(5)))
    })
    .collect();

  thread::sleep(Duration::from_millis(30));
  complete(&session, 1, Outcome::Success(Value::Int(3)));

  for waiter in waiters {
    assert_eq!(waiter.join().unwrap().unwrap(), Value::Int(3));
  }
}

#[test]
fn test_result_is_repeatable_and_cached() {
  let session = Session::new(fast_backends());
  let future = session.invoke(&Add, [1, 2]).unwrap();
  complete(&session, 1, Outcome::Success(Value::Int(3)));

  assert!(future.is_done().unwrap());
  assert_eq!(future.result().unwrap(), Value::Int(3));

  // Served from the shared cache even after the task is gone.
  session.purge().unwrap();
  let clone = future.clone();
  assert_eq!(clone.result().unwrap(), Value::Int(3));
}

#[test]
fn test_error_record_surfaces_as_failed() {
  let session = Session::new(fast_backends());
  let future = session.invoke(&Add, [1, 2]).unwrap();
  complete(&session, 1, Outcome::Error("boom".to_string()));

  match future.result() {
    Err(FutureError::Failed { exec_id, message }) => {
      assert_eq!(exec_id, 1);
      assert_eq!(message, "boom");
    }
    other => panic!("expected failure, got {:?}", other),
  }
}

#[test]
fn test_result_timeout() {
  let session = Session::new(fast_backends());
  let future = session.invoke(&Add, [1, 2]).unwrap();

  let err = future.result_timeout(Duration::from_millis(60)).unwrap_err();
  assert!(matches!(err, FutureError::Timeout { exec_id: 1, .. }));
}

#[test]
fn test_resolve_follows_reference_results() {
  let session = Session::new(fast_backends());
  let outer = session.invoke(&Add, [1, 2]).unwrap();
  let inner = session.invoke(&Add, [3, 4]).unwrap();

  complete(&session, 1, Outcome::Success(inner.to_value()));
  complete(&session, 2, Outcome::Success(Value::Int(7)));

  assert_eq!(outer.result().unwrap(), Value::Ref(NodeRef::new(2)));
  assert_eq!(outer.resolve().unwrap(), Value::Int(7));
}

#[test]
fn test_operators_build_nodes() {
  let session = Session::new(fast_backends());
  let r1 = session.invoke(&Add, [1, 2]).unwrap();
  let r2 = session.invoke(&Add, [3, 4]).unwrap();
  let r3 = session.invoke(&Add, [5, 6]).unwrap();

  let sum = &r1 + &r2 * &r3;
  assert_eq!(sum.exec_id(), 5);

  let product = load_job(&session, 4);
  assert_eq!(product.operator, "Mul");
  assert_eq!(product.args, vec![r2.to_value(), r3.to_value()]);

  let total = load_job(&session, 5);
  assert_eq!(total.operator, "Add");
  assert_eq!(total.args, vec![r1.to_value(), Value::Ref(NodeRef::new(4))]);

  let negated = -&r1;
  assert_eq!(load_job(&session, negated.exec_id()).operator, "Negate");

  let inverted = !&r1;
  assert_eq!(load_job(&session, inverted.exec_id()).operator, "Invert");

  let floor = r1.floor_div(2);
  let job = load_job(&session, floor.exec_id());
  assert_eq!(job.operator, "FloorDivide");
  assert_eq!(job.args[1], Value::Int(2));
}

#[test]
fn test_failed_build_yields_detached_future() {
  let session = Session::builder(fast_backends())
    .registry(std::sync::Arc::new(tessera_graph::OperatorRegistry::new()))
    .build();
  let anchor = session.future(NodeRef::new(1));

  let detached = &anchor + 1;
  assert!(detached.build_error().is_some());
  assert!(matches!(detached.result(), Err(FutureError::Detached { .. })));

  // Errors carry through further composition.
  let chained = &detached * 2;
  assert!(matches!(chained.result(), Err(FutureError::Detached { .. })));
  assert!(anchor.try_add(1).is_err());
}

#[test]
fn test_nested_references_are_dependencies() {
  let session = Session::new(fast_backends());
  let a = session.invoke(&Add, [1, 2]).unwrap();
  let b = session.invoke(&Add, [3, 4]).unwrap();

  let args = Args::new().kwarg("items", vec![a.to_value(), Value::map([("b", &b)])]);
  let collect = session.invoke_named("Collect", vec![], args).unwrap();
  assert_eq!(collect.exec_id(), 3);

  let store = session.store();
  let record = |value: i64| {
    session
      .codec()
      .encode(&ResultRecord {
        exec_id: 0,
        outcome: Outcome::Success(Value::Int(value)),
      })
      .unwrap()
  };

  let first = store
    .complete_node(session.task_id(), 1, &record(3), false)
    .unwrap();
  assert!(first.ready.is_empty());

  let second = store
    .complete_node(session.task_id(), 2, &record(7), false)
    .unwrap();
  assert_eq!(second.ready.len(), 1);
  assert_eq!(second.ready[0].exec_id, 3);
}
