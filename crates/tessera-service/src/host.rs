use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tessera_graph::{Args, Backends, OperatorError, Outcome, Value, panic_message};
use tessera_store::Delivery;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::client::{ServiceRequest, request_destination};
use crate::error::ServiceError;

/// Handles the requests of one service.
pub trait ServiceHandler: Send + Sync {
  fn handle(&self, args: Args) -> Result<Value, OperatorError>;
}

impl<F> ServiceHandler for F
where
  F: Fn(Args) -> Result<Value, OperatorError> + Send + Sync,
{
  fn handle(&self, args: Args) -> Result<Value, OperatorError> {
    self(args)
  }
}

/// Serves requests for one service id and pushes each reply to the caller's
/// reply channel.
pub struct ServiceHost {
  service_id: String,
  consumer: String,
  backends: Backends,
  handler: Arc<dyn ServiceHandler>,
}

impl ServiceHost {
  pub fn new(
    backends: Backends,
    service_id: impl Into<String>,
    handler: impl ServiceHandler + 'static,
  ) -> Self {
    let service_id = service_id.into();
    Self {
      consumer: format!("{}-{}", service_id, std::process::id()),
      service_id,
      backends,
      handler: Arc::new(handler),
    }
  }

  /// Consumer name used for crash recovery.
  pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
    self.consumer = consumer.into();
    self
  }

  pub fn service_id(&self) -> &str {
    &self.service_id
  }

  /// Serve until `cancel` fires. Returns the number of requests answered.
  pub fn run(&self, cancel: &CancellationToken) -> Result<usize, ServiceError> {
    let destination = request_destination(&self.service_id);
    let recovered = self.backends.broker.recover(&destination, &self.consumer)?;
    info!(
      service_id = %self.service_id,
      consumer = %self.consumer,
      recovered,
      "service host started"
    );

    let mut served = 0;
    while !cancel.is_cancelled() {
      if self.serve_one(self.backends.poll_interval)? {
        served += 1;
      }
    }

    info!(service_id = %self.service_id, served, "service host stopped");
    Ok(served)
  }

  /// Wait up to `timeout` for one request and answer it. Returns whether a
  /// request was answered.
  pub fn serve_one(&self, timeout: Duration) -> Result<bool, ServiceError> {
    let destination = request_destination(&self.service_id);
    let Some(delivery) = self
      .backends
      .broker
      .consume(&destination, &self.consumer, timeout)?
    else {
      return Ok(false);
    };

    let answered = match self.answer(&delivery) {
      Ok(()) => true,
      Err(ServiceError::MalformedRequest { message }) => {
        error!(service_id = %self.service_id, error = %message, "dropping malformed request");
        false
      }
      Err(e) => return Err(e),
    };
    self.backends.broker.ack(&delivery)?;
    Ok(answered)
  }

  #[instrument(
    name = "service_request",
    skip(self, delivery),
    fields(service_id = %self.service_id, tag = delivery.tag)
  )]
  fn answer(&self, delivery: &Delivery) -> Result<(), ServiceError> {
    let request: ServiceRequest = self
      .backends
      .codec
      .decode(&delivery.payload)
      .map_err(|e| ServiceError::MalformedRequest {
        message: e.to_string(),
      })?;

    let handler = &self.handler;
    let args = request.arguments();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(args))) {
      Ok(Ok(value)) => Outcome::Success(value),
      Ok(Err(e)) => Outcome::Error(e.to_string()),
      Err(payload) => Outcome::Error(format!("service panicked: {}", panic_message(&*payload))),
    };
    if let Outcome::Error(message) = &outcome {
      warn!(error = %message, "request failed");
    }

    let reply = self.backends.codec.encode(&outcome)?;
    self.backends.store.push(&request.reply_channel, &reply)?;
    info!(reply_channel = %request.reply_channel, "request answered");
    Ok(())
  }
}
