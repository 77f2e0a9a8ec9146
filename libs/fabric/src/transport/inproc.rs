//! In-memory transport
//!
//! Topics and services live in a broker owned by one [`InprocTransport`];
//! endpoints created from different transports never see each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use msgbus_core::SerializedEnvelope;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{
    poll, wait, wait_for, PublisherEndpoint, ReceiveEndpoint, Status, Transport, TransportResult,
};

struct Request {
    message: SerializedEnvelope,
    reply: UnboundedSender<SerializedEnvelope>,
}

#[derive(Default)]
struct Broker {
    topics: HashMap<String, Vec<(u64, UnboundedSender<SerializedEnvelope>)>>,
    services: HashMap<String, (u64, UnboundedSender<Request>)>,
    next_id: u64,
}

impl Broker {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

type SharedBroker = Arc<Mutex<Broker>>;

fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport whose broker lives inside the context
pub struct InprocTransport {
    broker: SharedBroker,
    shutdown: CancellationToken,
}

impl InprocTransport {
    pub fn new() -> Self {
        Self {
            broker: Arc::new(Mutex::new(Broker::default())),
            shutdown: CancellationToken::new(),
        }
    }

    fn ensure_live(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            Err(Status::failed("transport context destroyed"))
        } else {
            Ok(())
        }
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for InprocTransport {
    async fn publisher_new(&self, topic: &str) -> TransportResult<Box<dyn PublisherEndpoint>> {
        self.ensure_live()?;
        debug!(topic, "inproc publisher created");
        Ok(Box::new(InprocPublisher {
            topic: topic.to_string(),
            broker: self.broker.clone(),
            shutdown: self.shutdown.child_token(),
        }))
    }

    async fn subscriber_new(&self, topic: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let (tx, inbox) = mpsc::unbounded_channel();
        let id = {
            let mut broker = lock(&self.broker);
            let id = broker.next_id();
            broker
                .topics
                .entry(topic.to_string())
                .or_default()
                .push((id, tx));
            id
        };
        debug!(topic, id, "inproc subscriber registered");

        Ok(Box::new(InprocSubscriber {
            id,
            topic: topic.to_string(),
            inbox,
            broker: self.broker.clone(),
            shutdown: self.shutdown.child_token(),
        }))
    }

    async fn service_new(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let (tx, requests) = mpsc::unbounded_channel();
        let id = {
            let mut broker = lock(&self.broker);
            if let Some((_, existing)) = broker.services.get(name) {
                if !existing.is_closed() {
                    return Err(Status::failed(format!(
                        "service '{}' is already registered",
                        name
                    )));
                }
            }
            let id = broker.next_id();
            broker.services.insert(name.to_string(), (id, tx));
            id
        };
        debug!(service = name, id, "inproc service registered");

        Ok(Box::new(InprocService {
            id,
            name: name.to_string(),
            requests,
            pending_reply: None,
            broker: self.broker.clone(),
            shutdown: self.shutdown.child_token(),
        }))
    }

    async fn service_get(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let service = lock(&self.broker)
            .services
            .get(name)
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| Status::failed(format!("service '{}' not found", name)))?;
        let (reply_tx, replies) = mpsc::unbounded_channel();

        Ok(Box::new(InprocRequester {
            name: name.to_string(),
            service,
            reply_tx,
            replies,
            shutdown: self.shutdown.child_token(),
        }))
    }

    fn destroy(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let mut broker = lock(&self.broker);
        broker.topics.clear();
        broker.services.clear();
        debug!("inproc transport destroyed");
    }
}

struct InprocPublisher {
    topic: String,
    broker: SharedBroker,
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl PublisherEndpoint for InprocPublisher {
    async fn publish(&mut self, message: &SerializedEnvelope) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(Status::Disconnected);
        }
        let message = message.clone().with_name(self.topic.as_str());

        let mut broker = lock(&self.broker);
        if let Some(subscribers) = broker.topics.get_mut(&self.topic) {
            subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.shutdown.cancel();
    }
}

struct InprocSubscriber {
    id: u64,
    topic: String,
    inbox: UnboundedReceiver<SerializedEnvelope>,
    broker: SharedBroker,
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl ReceiveEndpoint for InprocSubscriber {
    async fn recv_wait(&mut self) -> TransportResult<SerializedEnvelope> {
        wait(&mut self.inbox, &self.shutdown).await
    }

    async fn recv_nowait(&mut self) -> TransportResult<SerializedEnvelope> {
        poll(&mut self.inbox, &self.shutdown)
    }

    async fn recv_timedwait(&mut self, timeout: Duration) -> TransportResult<SerializedEnvelope> {
        wait_for(&mut self.inbox, &self.shutdown, timeout).await
    }

    fn destroy(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let mut broker = lock(&self.broker);
        if let Some(subscribers) = broker.topics.get_mut(&self.topic) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                broker.topics.remove(&self.topic);
            }
        }
    }
}

impl Drop for InprocSubscriber {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct InprocService {
    id: u64,
    name: String,
    requests: UnboundedReceiver<Request>,
    pending_reply: Option<UnboundedSender<SerializedEnvelope>>,
    broker: SharedBroker,
    shutdown: CancellationToken,
}

impl InprocService {
    fn accept(&mut self, request: Request) -> SerializedEnvelope {
        self.pending_reply = Some(request.reply);
        request.message
    }
}

#[async_trait::async_trait]
impl ReceiveEndpoint for InprocService {
    async fn recv_wait(&mut self) -> TransportResult<SerializedEnvelope> {
        let request = wait(&mut self.requests, &self.shutdown).await?;
        Ok(self.accept(request))
    }

    async fn recv_nowait(&mut self) -> TransportResult<SerializedEnvelope> {
        let request = poll(&mut self.requests, &self.shutdown)?;
        Ok(self.accept(request))
    }

    async fn recv_timedwait(&mut self, timeout: Duration) -> TransportResult<SerializedEnvelope> {
        let request = wait_for(&mut self.requests, &self.shutdown, timeout).await?;
        Ok(self.accept(request))
    }

    async fn response(&mut self, message: &SerializedEnvelope) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(Status::Disconnected);
        }
        let reply = self
            .pending_reply
            .take()
            .ok_or_else(|| Status::failed("no request is waiting for a response"))?;
        reply
            .send(message.clone().with_name(self.name.as_str()))
            .map_err(|_| Status::Disconnected)
    }

    fn destroy(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.pending_reply = None;
        let mut broker = lock(&self.broker);
        if broker.services.get(&self.name).map(|(id, _)| *id) == Some(self.id) {
            broker.services.remove(&self.name);
        }
    }
}

impl Drop for InprocService {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct InprocRequester {
    name: String,
    service: UnboundedSender<Request>,
    reply_tx: UnboundedSender<SerializedEnvelope>,
    replies: UnboundedReceiver<SerializedEnvelope>,
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl ReceiveEndpoint for InprocRequester {
    async fn recv_wait(&mut self) -> TransportResult<SerializedEnvelope> {
        wait(&mut self.replies, &self.shutdown).await
    }

    async fn recv_nowait(&mut self) -> TransportResult<SerializedEnvelope> {
        poll(&mut self.replies, &self.shutdown)
    }

    async fn recv_timedwait(&mut self, timeout: Duration) -> TransportResult<SerializedEnvelope> {
        wait_for(&mut self.replies, &self.shutdown, timeout).await
    }

    async fn request(&mut self, message: &SerializedEnvelope) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(Status::Disconnected);
        }
        let request = Request {
            message: message.clone().with_name(self.name.as_str()),
            reply: self.reply_tx.clone(),
        };
        self.service
            .send(request)
            .map_err(|_| Status::Disconnected)
    }

    fn destroy(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgbus_core::ContentType;

    fn message(byte: u8) -> SerializedEnvelope {
        SerializedEnvelope {
            name: None,
            content_type: ContentType::Blob,
            parts: vec![vec![byte]],
        }
    }

    #[tokio::test]
    async fn publish_stamps_topic_name() {
        let transport = InprocTransport::new();
        let mut publisher = transport.publisher_new("frames").await.unwrap();
        let mut subscriber = transport.subscriber_new("frames").await.unwrap();

        publisher.publish(&message(1)).await.unwrap();

        let received = subscriber.recv_nowait().await.unwrap();
        assert_eq!(received.name.as_deref(), Some("frames"));
        assert_eq!(received.parts, vec![vec![1]]);
    }

    #[tokio::test]
    async fn destroyed_subscriber_is_unregistered() {
        let transport = InprocTransport::new();
        let mut first = transport.subscriber_new("frames").await.unwrap();
        let mut second = transport.subscriber_new("frames").await.unwrap();

        first.destroy();
        first.destroy();
        assert_eq!(lock(&transport.broker).topics["frames"].len(), 1);
        assert_eq!(first.recv_nowait().await, Err(Status::Disconnected));

        // The last subscriber takes the topic entry with it
        second.destroy();
        assert!(!lock(&transport.broker).topics.contains_key("frames"));
    }

    #[tokio::test]
    async fn duplicate_service_is_rejected() {
        let transport = InprocTransport::new();
        let _service = transport.service_new("echo").await.unwrap();
        assert!(matches!(
            transport.service_new("echo").await,
            Err(Status::Failed(_))
        ));
    }

    #[tokio::test]
    async fn service_name_is_reusable_after_destroy() {
        let transport = InprocTransport::new();
        let mut service = transport.service_new("echo").await.unwrap();
        service.destroy();
        assert!(transport.service_new("echo").await.is_ok());
    }

    #[tokio::test]
    async fn response_without_request_fails() {
        let transport = InprocTransport::new();
        let mut service = transport.service_new("echo").await.unwrap();
        assert!(matches!(
            service.response(&message(1)).await,
            Err(Status::Failed(_))
        ));
    }

    #[tokio::test]
    async fn context_destroy_disconnects_pending_receive() {
        let transport = Arc::new(InprocTransport::new());
        let mut subscriber = transport.subscriber_new("frames").await.unwrap();

        let waiter = tokio::spawn(async move { subscriber.recv_wait().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.destroy();

        assert_eq!(waiter.await.unwrap(), Err(Status::Disconnected));
        assert!(matches!(
            transport.publisher_new("frames").await,
            Err(Status::Failed(_))
        ));
    }
}
