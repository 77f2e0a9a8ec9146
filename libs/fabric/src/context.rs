//! Transport context facade
//!
//! [`Context`] owns one transport context. Endpoint contexts wrap a single
//! transport endpoint each: outgoing values go through [`msgbus_core::encode`]
//! before reaching the transport, and received messages come back decoded.
//! Transport statuses are translated into [`Error`] here and nowhere else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use msgbus_core::{decode, encode, Envelope, SerializedEnvelope, Value};
use tracing::debug;

use crate::config::{Config, TransportKind};
use crate::error::{Error, Result};
use crate::transport::{
    InprocTransport, PublisherEndpoint, ReceiveEndpoint, SocketTransport, Status, Transport,
    TransportResult,
};

/// How long a receive may wait for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Wait until a message arrives or the endpoint disconnects
    Block,
    /// Return immediately
    NoWait,
    After(Duration),
}

impl ReceiveTimeout {
    /// Negative blocks forever, zero returns immediately, positive waits
    /// that many milliseconds
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Block,
            0 => Self::NoWait,
            ms => Self::After(Duration::from_millis(ms as u64)),
        }
    }
}

impl From<Duration> for ReceiveTimeout {
    fn from(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self::NoWait
        } else {
            Self::After(timeout)
        }
    }
}

fn status_error(op: &'static str, status: Status) -> Error {
    match status {
        Status::AuthenticationFailed => Error::AuthenticationFailed,
        Status::Disconnected => Error::Disconnected,
        Status::Interrupted => Error::Interrupted,
        Status::NoMessage => Error::Transport {
            op,
            reason: "no message available".to_string(),
        },
        Status::Failed(reason) => Error::Transport { op, reason },
    }
}

fn serialize(value: &Value) -> Result<SerializedEnvelope> {
    Ok(encode(value)?.serialize()?)
}

/// Decode a received message, treating [`Status::NoMessage`] as "nothing yet"
fn received(op: &'static str, result: TransportResult<SerializedEnvelope>) -> Result<Option<Envelope>> {
    match result {
        Ok(message) => Ok(Some(decode(message)?)),
        Err(Status::NoMessage) => Ok(None),
        Err(status) => Err(status_error(op, status)),
    }
}

/// Owner of a transport context
#[derive(Clone)]
pub struct Context {
    transport: Arc<dyn Transport>,
    destroyed: Arc<AtomicBool>,
}

impl Context {
    /// Create the transport selected by `config.transport`
    pub fn new(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Inproc => Arc::new(InprocTransport::new()),
            TransportKind::Tcp | TransportKind::Ipc => {
                Arc::new(SocketTransport::new(config.clone())?)
            }
        };
        Ok(Self::with_transport(transport))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::Closed("context"))
        } else {
            Ok(())
        }
    }

    pub async fn new_publisher(&self, topic: &str) -> Result<PublisherContext> {
        self.ensure_live()?;
        let endpoint = self
            .transport
            .publisher_new(topic)
            .await
            .map_err(|s| status_error("publisher_new", s))?;
        debug!(topic, "publisher created");
        Ok(PublisherContext {
            topic: topic.to_string(),
            endpoint: Some(endpoint),
        })
    }

    pub async fn new_subscriber(&self, topic: &str) -> Result<ReceiveContext> {
        self.ensure_live()?;
        let endpoint = self
            .transport
            .subscriber_new(topic)
            .await
            .map_err(|s| status_error("subscriber_new", s))?;
        debug!(topic, "subscriber created");
        Ok(ReceiveContext::new(topic, endpoint))
    }

    pub async fn new_service(&self, name: &str) -> Result<ReceiveContext> {
        self.ensure_live()?;
        let endpoint = self
            .transport
            .service_new(name)
            .await
            .map_err(|s| status_error("service_new", s))?;
        debug!(service = name, "service created");
        Ok(ReceiveContext::new(name, endpoint))
    }

    pub async fn get_service(&self, name: &str) -> Result<ReceiveContext> {
        self.ensure_live()?;
        let endpoint = self
            .transport
            .service_get(name)
            .await
            .map_err(|s| status_error("service_get", s))?;
        debug!(service = name, "service requester created");
        Ok(ReceiveContext::new(name, endpoint))
    }

    /// Destroy the transport context. Only the first call reaches the
    /// transport.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.transport.destroy();
            debug!("transport context destroyed");
        }
    }
}

/// Publisher endpoint bound to one topic
pub struct PublisherContext {
    topic: String,
    endpoint: Option<Box<dyn PublisherEndpoint>>,
}

impl PublisherContext {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_destroyed(&self) -> bool {
        self.endpoint.is_none()
    }

    pub async fn publish(&mut self, value: &Value) -> Result<()> {
        let endpoint = self.endpoint.as_mut().ok_or(Error::Closed("publisher"))?;
        let message = serialize(value)?;
        endpoint
            .publish(&message)
            .await
            .map_err(|s| status_error("publish", s))
    }

    /// Release the endpoint; returns whether this call did the release
    pub fn destroy(&mut self) -> bool {
        match self.endpoint.take() {
            Some(mut endpoint) => {
                endpoint.destroy();
                debug!(topic = %self.topic, "publisher destroyed");
                true
            }
            None => false,
        }
    }
}

impl Drop for PublisherContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Subscriber, service or service requester endpoint
pub struct ReceiveContext {
    name: String,
    endpoint: Option<Box<dyn ReceiveEndpoint>>,
}

impl ReceiveContext {
    fn new(name: &str, endpoint: Box<dyn ReceiveEndpoint>) -> Self {
        Self {
            name: name.to_string(),
            endpoint: Some(endpoint),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.endpoint.is_none()
    }

    fn endpoint(&mut self) -> Result<&mut Box<dyn ReceiveEndpoint>> {
        self.endpoint.as_mut().ok_or(Error::Closed("endpoint"))
    }

    /// Block until a message arrives
    pub async fn receive_wait(&mut self) -> Result<Envelope> {
        let result = self.endpoint()?.recv_wait().await;
        received("recv_wait", result)?.ok_or_else(|| Error::Transport {
            op: "recv_wait",
            reason: "no message available".to_string(),
        })
    }

    /// `Ok(None)` when nothing is queued
    pub async fn receive_nowait(&mut self) -> Result<Option<Envelope>> {
        let result = self.endpoint()?.recv_nowait().await;
        received("recv_nowait", result)
    }

    /// `Ok(None)` when `timeout` elapses first
    pub async fn receive_timedwait(&mut self, timeout: Duration) -> Result<Option<Envelope>> {
        let result = self.endpoint()?.recv_timedwait(timeout).await;
        received("recv_timedwait", result)
    }

    pub async fn receive(&mut self, timeout: ReceiveTimeout) -> Result<Option<Envelope>> {
        match timeout {
            ReceiveTimeout::Block => self.receive_wait().await.map(Some),
            ReceiveTimeout::NoWait => self.receive_nowait().await,
            ReceiveTimeout::After(timeout) => self.receive_timedwait(timeout).await,
        }
    }

    pub async fn request(&mut self, value: &Value) -> Result<()> {
        let endpoint = self.endpoint()?;
        let message = serialize(value)?;
        endpoint
            .request(&message)
            .await
            .map_err(|s| status_error("request", s))
    }

    pub async fn response(&mut self, value: &Value) -> Result<()> {
        let endpoint = self.endpoint()?;
        let message = serialize(value)?;
        endpoint
            .response(&message)
            .await
            .map_err(|s| status_error("response", s))
    }

    /// Release the endpoint; returns whether this call did the release
    pub fn destroy(&mut self) -> bool {
        match self.endpoint.take() {
            Some(mut endpoint) => {
                endpoint.destroy();
                debug!(name = %self.name, "endpoint destroyed");
                true
            }
            None => false,
        }
    }
}

impl Drop for ReceiveContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_from_millis() {
        assert_eq!(ReceiveTimeout::from_millis(-1), ReceiveTimeout::Block);
        assert_eq!(ReceiveTimeout::from_millis(0), ReceiveTimeout::NoWait);
        assert_eq!(
            ReceiveTimeout::from_millis(100),
            ReceiveTimeout::After(Duration::from_millis(100))
        );
        assert_eq!(ReceiveTimeout::from(Duration::ZERO), ReceiveTimeout::NoWait);
    }

    #[test]
    fn statuses_map_to_errors() {
        assert!(matches!(
            status_error("service_get", Status::AuthenticationFailed),
            Error::AuthenticationFailed
        ));
        assert!(matches!(
            status_error("recv_wait", Status::Disconnected),
            Error::Disconnected
        ));
        assert!(matches!(
            status_error("recv_wait", Status::Interrupted),
            Error::Interrupted
        ));
        match status_error("publish", Status::failed("boom")) {
            Error::Transport { op, reason } => {
                assert_eq!(op, "publish");
                assert_eq!(reason, "boom");
            }
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let context = Context::new(&Config::inproc()).unwrap();
        context.destroy();
        context.destroy();
        assert!(context.is_destroyed());
        assert!(matches!(
            context.new_publisher("test").await,
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn nowait_on_empty_topic_is_none() {
        let context = Context::new(&Config::inproc()).unwrap();
        let mut subscriber = context.new_subscriber("test").await.unwrap();
        assert!(subscriber.receive_nowait().await.unwrap().is_none());
        assert!(subscriber.destroy());
        assert!(!subscriber.destroy());
        assert!(matches!(
            subscriber.receive_nowait().await,
            Err(Error::Closed(_))
        ));
    }
}
