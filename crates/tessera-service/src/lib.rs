//! Tessera Service
//!
//! Request/reply calls to services deployed outside the worker fleet:
//!
//! ```text
//!   ServiceClient::call                       ServiceHost::run
//!        │                                          │
//!        ├──▶ publish service.request.{id} ────────▶ consume
//!        │                                          │ handler
//!        ◀── pop {prefix}:service-response:… ◀──── push reply, ack
//!        └──▶ delete reply channel
//! ```
//!
//! [`Service`] wraps a client as an operator, so a service call can be a
//! node in a graph.

mod client;
mod error;
mod host;

pub use client::{Service, ServiceClient, ServiceRequest, request_destination};
pub use error::ServiceError;
pub use host::{ServiceHandler, ServiceHost};
