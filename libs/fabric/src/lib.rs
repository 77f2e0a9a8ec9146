//! Message bus client
//!
//! Typed publish/subscribe and request/response over a pluggable transport.
//! Messages are [`Value`]s encoded through the envelope model in
//! [`msgbus_core`]: an object, a blob, or an `[object, blob]` pair.
//!
//! # Example
//!
//! ```no_run
//! use msgbus_fabric::{Client, Config, ReceiveTimeout, Value};
//!
//! # async fn example() -> msgbus_fabric::Result<()> {
//! let client = Client::new(Config::parse(r#"{"type": "inproc"}"#)?)?;
//!
//! let mut service = client.new_service("echo").await?;
//! let mut requester = client.get_service("echo").await?;
//!
//! requester.request(&Value::object([("hello", "world")])).await?;
//! if let Some(request) = service.receive_request(ReceiveTimeout::Block).await? {
//!     service.response(&request.into_value()).await?;
//! }
//! let response = requester.receive_response(ReceiveTimeout::from_millis(500)).await?;
//! assert!(response.is_some());
//!
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod publisher;
pub mod request;
pub mod service;
pub mod subscriber;
pub mod transport;
pub mod wire;

pub use client::Client;
pub use config::{Config, EndpointConfig, TransportKind};
pub use context::{Context, ReceiveTimeout};
pub use error::{Error, Result};
pub use msgbus_core::{Envelope, Value};
pub use publisher::Publisher;
pub use service::{Service, ServiceRequester};
pub use subscriber::Subscriber;
