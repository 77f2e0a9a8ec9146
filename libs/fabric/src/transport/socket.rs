//! Socket transport for `tcp` and `ipc` configurations
//!
//! Publishers and services bind a listener at the address configured for
//! their name; subscribers and requesters connect to it. Every connection
//! starts with a hello/welcome handshake that also checks the peer's client
//! key against `allowed_clients`.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use msgbus_core::SerializedEnvelope;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, TransportKind};
use crate::error::{Error, Result};
use crate::transport::{
    poll, wait, wait_for, PublisherEndpoint, ReceiveEndpoint, Status, Transport, TransportResult,
};
use crate::wire::{
    tcp, unix, Channel, ChannelListener, Frame, FrameReader, FrameWriter, Hello, PeerRole,
    Rejection, TcpChannelListener, UnixChannelListener,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

enum Address {
    Tcp(String),
    Ipc(PathBuf),
}

fn wire_status(err: Error) -> Status {
    match err {
        Error::ConnectionClosed => Status::Disconnected,
        other => Status::Failed(other.to_string()),
    }
}

/// Transport speaking the framed socket protocol over TCP or Unix sockets
pub struct SocketTransport {
    config: Arc<Config>,
    shutdown: CancellationToken,
}

impl SocketTransport {
    pub fn new(config: Config) -> Result<Self> {
        match config.transport {
            TransportKind::Tcp => {
                let mut names: Vec<_> = config.endpoints.keys().collect();
                names.sort();
                for name in names {
                    let endpoint = &config.endpoints[name];
                    if endpoint.host.is_none() || endpoint.port.is_none() {
                        return Err(Error::config(format!(
                            "tcp endpoint '{}' needs both host and port",
                            name
                        )));
                    }
                }
            }
            TransportKind::Ipc => {
                if config.socket_dir.is_none() {
                    return Err(Error::config("ipc transport requires 'socket_dir'"));
                }
            }
            TransportKind::Inproc => {
                return Err(Error::config(
                    "socket transport requires a tcp or ipc configuration",
                ));
            }
        }

        Ok(Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }

    fn ensure_live(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            Err(Status::failed("transport context destroyed"))
        } else {
            Ok(())
        }
    }

    fn resolve(&self, name: &str) -> TransportResult<Address> {
        let endpoint = self.config.endpoint(name);
        match self.config.transport {
            TransportKind::Tcp => {
                let endpoint = endpoint.ok_or_else(|| {
                    Status::failed(format!("no tcp endpoint configured for '{}'", name))
                })?;
                match (&endpoint.host, endpoint.port) {
                    (Some(host), Some(port)) => Ok(Address::Tcp(format!("{}:{}", host, port))),
                    _ => Err(Status::failed(format!(
                        "tcp endpoint '{}' needs both host and port",
                        name
                    ))),
                }
            }
            TransportKind::Ipc => {
                let dir = self
                    .config
                    .socket_dir
                    .as_ref()
                    .ok_or_else(|| Status::failed("ipc transport requires 'socket_dir'"))?;
                let file = endpoint
                    .and_then(|e| e.socket_file.clone())
                    .unwrap_or_else(|| name.to_string());
                Ok(Address::Ipc(dir.join(file)))
            }
            TransportKind::Inproc => Err(Status::failed("inproc endpoints have no address")),
        }
    }

    async fn bind(&self, name: &str) -> TransportResult<Box<dyn ChannelListener>> {
        let listener: Box<dyn ChannelListener> = match self.resolve(name)? {
            Address::Tcp(addr) => Box::new(
                TcpChannelListener::bind(addr.as_str())
                    .await
                    .map_err(|e| Status::failed(format!("failed to bind {}: {}", addr, e)))?,
            ),
            Address::Ipc(path) => {
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir).await.map_err(|e| {
                        Status::failed(format!("failed to create {}: {}", dir.display(), e))
                    })?;
                }
                Box::new(UnixChannelListener::bind(&path).await.map_err(|e| {
                    Status::failed(format!("failed to bind {}: {}", path.display(), e))
                })?)
            }
        };
        info!(name, address = %listener.describe(), "endpoint listening");
        Ok(listener)
    }

    /// Connect to `name` and complete the client side of the handshake
    async fn connect(&self, name: &str, role: PeerRole) -> TransportResult<(FrameReader, FrameWriter)> {
        let timeout = self.config.connect_timeout();
        let connected = match self.resolve(name)? {
            Address::Tcp(addr) => tcp::connect(addr.as_str(), timeout).await,
            Address::Ipc(path) => unix::connect(&path, timeout).await,
        };
        let mut channel = connected
            .map_err(|e| Status::failed(format!("failed to connect to '{}': {}", name, e)))?;

        let hello = Hello {
            role,
            name: name.to_string(),
            client_key: self
                .config
                .endpoint(name)
                .and_then(|e| e.client_key.clone()),
        };
        channel.send(&Frame::Hello(hello)).await.map_err(wire_status)?;

        match channel
            .receive_timeout::<Frame>(timeout)
            .await
            .map_err(wire_status)?
        {
            Frame::Welcome => {
                debug!(name, ?role, "handshake complete");
                Ok(channel.split())
            }
            Frame::Rejected(Rejection::AuthenticationFailed) => Err(Status::AuthenticationFailed),
            Frame::Rejected(Rejection::UnknownEndpoint) => Err(Status::failed(format!(
                "peer does not serve '{}' for {:?}",
                name, role
            ))),
            _ => Err(Status::failed("unexpected frame during handshake")),
        }
    }
}

/// Server side of the handshake. Sends the rejection itself on failure; the
/// caller sends the welcome once the peer is registered.
async fn accept_peer(
    channel: &mut Channel,
    role: PeerRole,
    name: &str,
    config: &Config,
) -> Result<Hello> {
    let hello = match channel.receive_timeout::<Frame>(HANDSHAKE_TIMEOUT).await? {
        Frame::Hello(hello) => hello,
        _ => {
            channel
                .send(&Frame::Rejected(Rejection::UnknownEndpoint))
                .await?;
            return Err(Error::InvalidFrame("expected hello".to_string()));
        }
    };

    if hello.role != role || hello.name != name {
        debug!(name, peer_name = %hello.name, ?role, "peer asked for another endpoint");
        channel
            .send(&Frame::Rejected(Rejection::UnknownEndpoint))
            .await?;
        return Err(Error::Custom(format!("peer requested '{}'", hello.name)));
    }

    if !config.is_client_allowed(hello.client_key.as_deref()) {
        warn!(name, client_key = ?hello.client_key, "rejecting unauthorized peer");
        channel
            .send(&Frame::Rejected(Rejection::AuthenticationFailed))
            .await?;
        return Err(Error::AuthenticationFailed);
    }

    Ok(hello)
}

/// Accept connections until `shutdown` fires, handing each to `on_connect`
/// on its own task
fn spawn_acceptor<F, Fut>(listener: Box<dyn ChannelListener>, shutdown: CancellationToken, on_connect: F)
where
    F: Fn(Channel) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let address = listener.describe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(channel) => {
                        tokio::spawn(on_connect(channel));
                    }
                    Err(e) => warn!(%address, error = %e, "accept failed"),
                },
            }
        }
        debug!(%address, "listener stopped");
    });
}

/// Pump message frames from `reader` into an inbox until the connection
/// closes or `shutdown` fires
fn spawn_reader(
    mut reader: FrameReader,
    shutdown: CancellationToken,
    name: String,
) -> UnboundedReceiver<SerializedEnvelope> {
    let (tx, inbox) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = reader.receive::<Frame>() => frame,
            };
            match frame {
                Ok(Frame::Message(message)) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(_) => debug!(%name, "ignoring non-message frame"),
                Err(e) => {
                    debug!(%name, error = %e, "connection ended");
                    break;
                }
            }
        }
    });
    inbox
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    async fn publisher_new(&self, topic: &str) -> TransportResult<Box<dyn PublisherEndpoint>> {
        self.ensure_live()?;
        let listener = self.bind(topic).await?;
        let peers: Arc<Mutex<Vec<FrameWriter>>> = Arc::default();
        let shutdown = self.shutdown.child_token();

        let config = self.config.clone();
        let name = topic.to_string();
        let registry = peers.clone();
        let stop = shutdown.clone();
        spawn_acceptor(listener, shutdown.clone(), move |mut channel| {
            let (config, name, registry, stop) =
                (config.clone(), name.clone(), registry.clone(), stop.clone());
            async move {
                if accept_peer(&mut channel, PeerRole::Subscriber, &name, &config)
                    .await
                    .is_err()
                    || stop.is_cancelled()
                {
                    let _ = channel.close().await;
                    return;
                }
                let (_reader, mut writer) = channel.split();
                // Register under the lock so a publish issued right after the
                // subscriber sees the welcome reaches it
                let mut peers = registry.lock().await;
                if writer.send(&Frame::Welcome).await.is_ok() {
                    peers.push(writer);
                    debug!(topic = %name, subscribers = peers.len(), "subscriber attached");
                }
            }
        });

        Ok(Box::new(SocketPublisher {
            topic: topic.to_string(),
            send_timeout: self.config.send_timeout(),
            peers,
            shutdown,
        }))
    }

    async fn subscriber_new(&self, topic: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let (reader, writer) = self.connect(topic, PeerRole::Subscriber).await?;
        let shutdown = self.shutdown.child_token();
        let inbox = spawn_reader(reader, shutdown.clone(), topic.to_string());

        Ok(Box::new(SocketReceiver {
            name: topic.to_string(),
            role: PeerRole::Subscriber,
            inbox,
            writer: Some(writer),
            shutdown,
        }))
    }

    async fn service_new(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let listener = self.bind(name).await?;
        let clients: Arc<Mutex<HashMap<u64, FrameWriter>>> = Arc::default();
        let next_id = Arc::new(AtomicU64::new(1));
        let shutdown = self.shutdown.child_token();
        let (tx, requests) = mpsc::unbounded_channel();

        let config = self.config.clone();
        let service = name.to_string();
        let registry = clients.clone();
        let stop = shutdown.clone();
        spawn_acceptor(listener, shutdown.clone(), move |mut channel| {
            let (config, service, registry, stop, next_id, tx) = (
                config.clone(),
                service.clone(),
                registry.clone(),
                stop.clone(),
                next_id.clone(),
                tx.clone(),
            );
            async move {
                if accept_peer(&mut channel, PeerRole::Requester, &service, &config)
                    .await
                    .is_err()
                {
                    let _ = channel.close().await;
                    return;
                }
                let (mut reader, mut writer) = channel.split();
                if writer.send(&Frame::Welcome).await.is_err() {
                    return;
                }
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                registry.lock().await.insert(id, writer);
                debug!(service = %service, id, "requester attached");

                loop {
                    let frame = tokio::select! {
                        _ = stop.cancelled() => break,
                        frame = reader.receive::<Frame>() => frame,
                    };
                    match frame {
                        Ok(Frame::Message(message)) => {
                            if tx.send((id, message.with_name(service.as_str()))).is_err() {
                                break;
                            }
                        }
                        Ok(_) => debug!(service = %service, id, "ignoring non-message frame"),
                        Err(_) => break,
                    }
                }

                registry.lock().await.remove(&id);
                debug!(service = %service, id, "requester detached");
            }
        });

        Ok(Box::new(SocketService {
            name: name.to_string(),
            requests,
            clients,
            pending: None,
            shutdown,
        }))
    }

    async fn service_get(&self, name: &str) -> TransportResult<Box<dyn ReceiveEndpoint>> {
        self.ensure_live()?;
        let (reader, writer) = self.connect(name, PeerRole::Requester).await?;
        let shutdown = self.shutdown.child_token();
        let inbox = spawn_reader(reader, shutdown.clone(), name.to_string());

        Ok(Box::new(SocketReceiver {
            name: name.to_string(),
            role: PeerRole::Requester,
            inbox,
            writer: Some(writer),
            shutdown,
        }))
    }

    fn destroy(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            debug!("socket transport destroyed");
        }
    }
}

struct SocketPublisher {
    topic: String,
    send_timeout: Duration,
    peers: Arc<Mutex<Vec<FrameWriter>>>,
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl PublisherEndpoint for SocketPublisher {
    async fn publish(&mut self, message: &SerializedEnvelope) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(Status::Disconnected);
        }
        let frame = Frame::Message(message.clone().with_name(self.topic.as_str()));

        // A subscriber that stops reading is dropped once a send stalls for
        // longer than `send_timeout`; it never blocks the others
        let mut peers = self.peers.lock().await;
        let mut live = Vec::with_capacity(peers.len());
        for mut writer in peers.drain(..) {
            match tokio::time::timeout(self.send_timeout, writer.send(&frame)).await {
                Ok(Ok(())) => live.push(writer),
                Ok(Err(e)) => debug!(topic = %self.topic, error = %e, "dropping subscriber"),
                Err(_) => warn!(
                    topic = %self.topic,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "dropping stalled subscriber"
                ),
            }
        }
        *peers = live;
        Ok(())
    }

    fn destroy(&mut self) {
        self.shutdown.cancel();
        if let Ok(mut peers) = self.peers.try_lock() {
            peers.clear();
        }
    }
}

/// Connected subscriber or service requester
struct SocketReceiver {
    name: String,
    role: PeerRole,
    inbox: UnboundedReceiver<SerializedEnvelope>,
    writer: Option<FrameWriter>,
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl ReceiveEndpoint for SocketReceiver {
    async fn recv_wait(&mut self) -> TransportResult<SerializedEnvelope> {
        wait(&mut self.inbox, &self.shutdown).await
    }

    async fn recv_nowait(&mut self) -> TransportResult<SerializedEnvelope> {
        poll(&mut self.inbox, &self.shutdown)
    }

    async fn recv_timedwait(&mut self, timeout: Duration) -> TransportResult<SerializedEnvelope> {
        wait_for(&mut self.inbox, &self.shutdown, timeout).await
    }

    async fn request(&mut self, message: &SerializedEnvelope) -> TransportResult<()> {
        if self.role != PeerRole::Requester {
            return Err(Status::failed("subscribers cannot send requests"));
        }
        if self.shutdown.is_cancelled() {
            return Err(Status::Disconnected);
        }
        let writer = self.writer.as_mut().ok_or(Status::Disconnected)?;
        writer
            .send(&Frame::Message(message.clone().with_name(self.name.as_str())))
            .await
            .map_err(wire_status)
    }

    fn destroy(&mut self) {
        self.shutdown.cancel();
        self.writer = None;
    }
}

struct SocketService {
    name: String,
    requests: UnboundedReceiver<(u64, SerializedEnvelope)>,
    clients: Arc<Mutex<HashMap<u64, FrameWriter>>>,
    /// Requester whose request was received last and awaits a response
    pending: Option<u64>,
    shutdown: CancellationToken,
}

impl SocketService {
    fn accept(&mut self, (id, message): (u64, SerializedEnvelope)) -> SerializedEnvelope {
        self.pending = Some(id);
        message
    }
}

#[async_trait::async_trait]
impl ReceiveEndpoint for SocketService {
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
        let id = self
            .pending
            .take()
            .ok_or_else(|| Status::failed("no request is waiting for a response"))?;
        let frame = Frame::Message(message.clone().with_name(self.name.as_str()));

        let mut clients = self.clients.lock().await;
        let writer = clients.get_mut(&id).ok_or(Status::Disconnected)?;
        writer.send(&frame).await.map_err(wire_status)
    }

    fn destroy(&mut self) {
        self.shutdown.cancel();
        self.pending = None;
        if let Ok(mut clients) = self.clients.try_lock() {
            clients.clear();
        }
    }
}

impl Drop for SocketService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Drop for SocketPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Drop for SocketReceiver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    #[test]
    fn rejects_inproc_config() {
        assert!(matches!(
            SocketTransport::new(Config::inproc()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn ipc_requires_socket_dir() {
        let mut config = Config::ipc("/tmp");
        config.socket_dir = None;
        assert!(matches!(SocketTransport::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn resolves_ipc_socket_file() {
        let config = Config::ipc("/run/bus")
            .with_endpoint("camera", EndpointConfig::default().with_socket_file("cam.sock"));
        let transport = SocketTransport::new(config).unwrap();

        match transport.resolve("camera") {
            Ok(Address::Ipc(path)) => assert_eq!(path, PathBuf::from("/run/bus/cam.sock")),
            _ => panic!("Expected ipc address"),
        }
        match transport.resolve("other") {
            Ok(Address::Ipc(path)) => assert_eq!(path, PathBuf::from("/run/bus/other")),
            _ => panic!("Expected ipc address"),
        }
    }

    #[test]
    fn resolves_tcp_endpoint() {
        let config =
            Config::tcp().with_endpoint("camera", EndpointConfig::tcp("127.0.0.1", 5569));
        let transport = SocketTransport::new(config).unwrap();

        match transport.resolve("camera") {
            Ok(Address::Tcp(addr)) => assert_eq!(addr, "127.0.0.1:5569"),
            _ => panic!("Expected tcp address"),
        }
        assert!(matches!(transport.resolve("missing"), Err(Status::Failed(_))));
    }

    #[test]
    fn rejects_incomplete_tcp_endpoint() {
        let config = Config::tcp().with_endpoint("broken", EndpointConfig::default());
        assert!(matches!(SocketTransport::new(config), Err(Error::Config(_))));
    }
}
