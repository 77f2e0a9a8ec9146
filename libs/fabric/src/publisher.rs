use std::sync::Arc;

use msgbus_core::Value;

use crate::client::ClientShared;
use crate::context::PublisherContext;
use crate::error::{Error, Result};

/// Publishes values on one topic
pub struct Publisher {
    client: Arc<ClientShared>,
    inner: PublisherContext,
}

impl Publisher {
    pub(crate) fn new(client: Arc<ClientShared>, inner: PublisherContext) -> Self {
        Self { client, inner }
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    /// Encode `value` and publish it to every current subscriber
    ///
    /// `value` must be an object, bytes, or an `[object, bytes]` pair.
    pub async fn publish(&mut self, value: &Value) -> Result<()> {
        self.client.ensure_open()?;
        self.inner.publish(value).await
    }

    /// Release the publisher. Fails with [`Error::Closed`] if the publisher
    /// or its client is already closed.
    pub fn close(&mut self) -> Result<()> {
        let client_closed = self.client.is_closed();
        if !self.inner.destroy() {
            return Err(Error::Closed("publisher"));
        }
        if client_closed {
            return Err(Error::Closed("client"));
        }
        Ok(())
    }
}
