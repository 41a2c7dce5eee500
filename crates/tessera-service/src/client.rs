use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_config::ServiceConfig;
use tessera_graph::{
  Args, Backends, GraphError, JobContext, Operator, OperatorError, OperatorRegistry, Outcome,
  Value,
};
use tracing::{debug, info, instrument, warn};

use crate::error::ServiceError;

/// Broker destination a service consumes its requests from.
pub fn request_destination(service_id: &str) -> String {
  format!("service.request.{}", service_id)
}

/// One call to a service. The host pushes exactly one encoded [`Outcome`] to
/// `reply_channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
  pub reply_channel: String,
  pub args: Vec<Value>,
  #[serde(default)]
  pub kwargs: BTreeMap<String, Value>,
}

impl ServiceRequest {
  pub fn arguments(&self) -> Args {
    Args {
      positional: self.args.clone(),
      named: self.kwargs.clone(),
    }
  }
}

/// Synchronous request/reply client for one service.
#[derive(Debug, Clone)]
pub struct ServiceClient {
  service_id: String,
  timeout: Option<Duration>,
}

impl ServiceClient {
  /// A client that waits for replies indefinitely.
  pub fn new(service_id: impl Into<String>) -> Self {
    Self {
      service_id: service_id.into(),
      timeout: None,
    }
  }

  pub fn from_config(service_id: impl Into<String>, config: &ServiceConfig) -> Self {
    Self::new(service_id).with_timeout(config.rpc_timeout())
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn service_id(&self) -> &str {
    &self.service_id
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// Call the service from inside an operator.
  #[instrument(
    name = "service_call",
    skip(self, ctx, args),
    fields(service_id = %self.service_id, task_id = %ctx.task_id(), exec_id = ctx.exec_id())
  )]
  pub fn call(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, ServiceError> {
    self.call_with(ctx.session().backends(), args)
  }

  /// Call the service with a fresh correlation id.
  pub fn call_with(&self, backends: &Backends, args: Args) -> Result<Value, ServiceError> {
    let correlation_id = uuid::Uuid::new_v4().simple().to_string();
    self.call_correlated(backends, &correlation_id, args)
  }

  /// Call the service, replying on the channel derived from `correlation_id`.
  /// The channel is deleted once the call returns, reply or not.
  pub fn call_correlated(
    &self,
    backends: &Backends,
    correlation_id: &str,
    args: Args,
  ) -> Result<Value, ServiceError> {
    let reply_channel = backends
      .keyspace()
      .reply_channel(&self.service_id, correlation_id);
    let request = ServiceRequest {
      reply_channel: reply_channel.clone(),
      args: args.positional,
      kwargs: args.named,
    };
    let payload = backends.codec.encode(&request)?;
    backends
      .broker
      .publish(&request_destination(&self.service_id), &payload)?;
    debug!(correlation_id, "service request published");

    let reply = backends.store.blocking_pop(&reply_channel, self.timeout);
    backends.store.delete(&reply_channel)?;

    let Some(blob) = reply? else {
      let waited = self.timeout.unwrap_or_default();
      warn!(correlation_id, ?waited, "service call timed out");
      return Err(ServiceError::Timeout {
        service_id: self.service_id.clone(),
        waited,
      });
    };

    match backends.codec.decode::<Outcome>(&blob)? {
      Outcome::Success(value) => {
        info!(correlation_id, "service replied");
        Ok(value)
      }
      Outcome::Error(message) => Err(ServiceError::Remote {
        service_id: self.service_id.clone(),
        message,
      }),
    }
  }
}

/// A service call as a graph node.
///
/// Constructor arguments are the service id and an optional reply timeout in
/// milliseconds.
#[derive(Debug, Clone)]
pub struct Service {
  client: ServiceClient,
}

impl Service {
  pub const KIND: &'static str = "Service";

  pub fn new(service_id: impl Into<String>) -> Self {
    Self {
      client: ServiceClient::new(service_id),
    }
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.client = self.client.with_timeout(timeout);
    self
  }

  pub fn client(&self) -> &ServiceClient {
    &self.client
  }

  /// Register the `Service` operator. Nodes built without a timeout use
  /// `default_timeout`.
  pub fn register(
    registry: &mut OperatorRegistry,
    default_timeout: Option<Duration>,
  ) -> Result<(), GraphError> {
    registry.register(Self::KIND, move |ctor: &[Value]| {
      let service = Self::from_constructor_args(ctor)?;
      let timeout = service.client.timeout.or(default_timeout);
      Ok(Box::new(service.with_timeout(timeout)) as Box<dyn Operator>)
    })
  }

  fn from_constructor_args(ctor: &[Value]) -> Result<Self, OperatorError> {
    let service_id = ctor
      .first()
      .and_then(Value::as_str)
      .ok_or_else(|| OperatorError::invalid("service_id", "expected a service id string"))?;
    let timeout = match ctor.get(1) {
      None | Some(Value::Null) => None,
      Some(value) => {
        let millis = value
          .as_i64()
          .and_then(|ms| u64::try_from(ms).ok())
          .ok_or_else(|| OperatorError::invalid("timeout_ms", "expected a non-negative integer"))?;
        Some(Duration::from_millis(millis))
      }
    };
    Ok(Self::new(service_id).with_timeout(timeout))
  }
}

impl Operator for Service {
  fn kind(&self) -> &str {
    Self::KIND
  }

  fn constructor_args(&self) -> Vec<Value> {
    let timeout = self
      .client
      .timeout
      .map(|t| Value::Int(i64::try_from(t.as_millis()).unwrap_or(i64::MAX)));
    vec![Value::from(self.client.service_id()), Value::from(timeout)]
  }

  fn compute(&self, ctx: &JobContext<'_>, args: Args) -> Result<Value, OperatorError> {
    Ok(self.client.call(ctx, args)?)
  }
}
