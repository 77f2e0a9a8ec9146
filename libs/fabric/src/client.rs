//! Top level message bus client

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::publisher::Publisher;
use crate::service::{Service, ServiceRequester};
use crate::subscriber::Subscriber;
use crate::transport::Transport;

struct ClientState {
    closed: bool,
    context: Option<Context>,
}

/// State shared between a client and the endpoints it created. Endpoints
/// only use it to check whether the client is still open.
pub(crate) struct ClientShared {
    state: Mutex<ClientState>,
}

impl ClientShared {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed("client"))
        } else {
            Ok(())
        }
    }

    fn context(&self) -> Result<Context> {
        let state = self.lock();
        match (&state.context, state.closed) {
            (Some(context), false) => Ok(context.clone()),
            _ => Err(Error::Closed("client")),
        }
    }

    fn close(&self) {
        let context = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.context.take()
        };
        if let Some(context) = context {
            context.destroy();
        }
        info!("message bus client closed");
    }
}

/// Message bus client
///
/// Owns the transport context and creates publishers, subscribers, services
/// and service requesters on it. Closing the client (or dropping it) destroys
/// the context; endpoints created earlier then fail with [`Error::Closed`].
///
/// ```no_run
/// use msgbus_fabric::{Client, Config, Value};
///
/// # async fn example() -> msgbus_fabric::Result<()> {
/// let client = Client::new(Config::inproc())?;
/// let mut subscriber = client.new_subscriber("camera").await?;
/// let mut publisher = client.new_publisher("camera").await?;
///
/// publisher.publish(&Value::object([("frame", 1)])).await?;
/// if let Some(Ok(envelope)) = subscriber.recv().await {
///     println!("{}: {:?}", envelope.name(), envelope.data());
/// }
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self> {
        let context = Context::new(&config)?;
        info!(transport = ?config.transport, "message bus client opened");
        Ok(Self::from_context(context))
    }

    /// Build a client on a caller supplied transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::from_context(Context::with_transport(transport))
    }

    fn from_context(context: Context) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                state: Mutex::new(ClientState {
                    closed: false,
                    context: Some(context),
                }),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Destroy the transport context. Later calls do nothing.
    pub fn close(&self) {
        self.shared.close();
    }

    pub async fn new_publisher(&self, topic: &str) -> Result<Publisher> {
        let context = self.shared.context()?;
        let inner = context.new_publisher(topic).await?;
        Ok(Publisher::new(self.shared.clone(), inner))
    }

    pub async fn new_subscriber(&self, topic: &str) -> Result<Subscriber> {
        let context = self.shared.context()?;
        let inner = context.new_subscriber(topic).await?;
        Ok(Subscriber::spawn(inner))
    }

    pub async fn new_service(&self, name: &str) -> Result<Service> {
        let context = self.shared.context()?;
        let inner = context.new_service(name).await?;
        Ok(Service::new(self.shared.clone(), inner))
    }

    pub async fn get_service(&self, name: &str) -> Result<ServiceRequester> {
        let context = self.shared.context()?;
        let inner = context.get_service(name).await?;
        Ok(ServiceRequester::new(self.shared.clone(), inner))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            debug!("closing dropped client");
            self.shared.close();
        }
    }
}
