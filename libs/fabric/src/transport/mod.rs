//! Transport primitives consumed by the message bus client
//!
//! A [`Transport`] is one transport context: it creates publisher and receive
//! endpoints and is destroyed once by its owning client. Endpoints move raw
//! [`SerializedEnvelope`]s; encoding and decoding happen above this layer.

use std::time::Duration;

use msgbus_core::SerializedEnvelope;
use thiserror::Error;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

pub mod inproc;
pub mod socket;

pub use self::inproc::InprocTransport;
pub use self::socket::SocketTransport;

/// Non-success status reported by a transport primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Status {
    #[error("No message available")]
    NoMessage,

    #[error("Interrupted")]
    Interrupted,

    #[error("Disconnected")]
    Disconnected,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("{0}")]
    Failed(String),
}

impl Status {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

pub type TransportResult<T> = std::result::Result<T, Status>;

/// Transport context
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Create a publisher bound to `topic`
    async fn publisher_new(&self, topic: &str) -> TransportResult<Box<dyn PublisherEndpoint>>;

    /// Subscribe to `topic`
    async fn subscriber_new(&self, topic: &str) -> TransportResult<Box<dyn ReceiveEndpoint>>;

    /// Register a service that receives requests and sends responses
    async fn service_new(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>>;

    /// Connect to a service to send requests and receive responses
    async fn service_get(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>>;

    /// Tear down the context. Pending receives on its endpoints return
    /// [`Status::Disconnected`]. Calling it again is a no-op.
    fn destroy(&self);
}

#[async_trait::async_trait]
pub trait PublisherEndpoint: Send {
    async fn publish(&mut self, message: &SerializedEnvelope) -> TransportResult<()>;

    /// Release the endpoint. Calling it again is a no-op.
    fn destroy(&mut self);
}

/// Endpoint that receives messages: a subscriber, a service, or a service
/// requester
#[async_trait::async_trait]
pub trait ReceiveEndpoint: Send {
    /// Block until a message arrives
    async fn recv_wait(&mut self) -> TransportResult<SerializedEnvelope>;

    /// Return a pending message or [`Status::NoMessage`] without waiting
    async fn recv_nowait(&mut self) -> TransportResult<SerializedEnvelope>;

    /// Wait up to `timeout`, then return [`Status::NoMessage`]
    async fn recv_timedwait(&mut self, timeout: Duration) -> TransportResult<SerializedEnvelope>;

    /// Send a request (service requesters only)
    async fn request(&mut self, _message: &SerializedEnvelope) -> TransportResult<()> {
        Err(Status::failed("endpoint cannot send requests"))
    }

    /// Respond to the last received request (services only)
    async fn response(&mut self, _message: &SerializedEnvelope) -> TransportResult<()> {
        Err(Status::failed("endpoint cannot send responses"))
    }

    /// Release the endpoint. Calling it again is a no-op.
    fn destroy(&mut self);
}

// Inbox helpers shared by endpoints that queue incoming messages

pub(crate) async fn wait<T>(inbox: &mut UnboundedReceiver<T>, shutdown: &CancellationToken) -> TransportResult<T> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(Status::Disconnected),
        message = inbox.recv() => message.ok_or(Status::Disconnected),
    }
}

pub(crate) fn poll<T>(inbox: &mut UnboundedReceiver<T>, shutdown: &CancellationToken) -> TransportResult<T> {
    if shutdown.is_cancelled() {
        return Err(Status::Disconnected);
    }
    match inbox.try_recv() {
        Ok(message) => Ok(message),
        Err(TryRecvError::Empty) => Err(Status::NoMessage),
        Err(TryRecvError::Disconnected) => Err(Status::Disconnected),
    }
}

pub(crate) async fn wait_for<T>(
    inbox: &mut UnboundedReceiver<T>,
    shutdown: &CancellationToken,
    timeout: Duration,
) -> TransportResult<T> {
    tokio::time::timeout(timeout, wait(inbox, shutdown))
        .await
        .unwrap_or(Err(Status::NoMessage))
}
