//! Request/response endpoints
//!
//! Neither type spawns work in the background: requests and responses are
//! sent and received on the caller's task, and each exchange has to finish
//! on the same endpoint before the next one starts.

use std::sync::Arc;

use msgbus_core::{Envelope, Value};

use crate::client::ClientShared;
use crate::context::{ReceiveContext, ReceiveTimeout};
use crate::error::Result;

/// Serves requests for one service name
pub struct Service {
    client: Arc<ClientShared>,
    inner: ReceiveContext,
}

impl Service {
    pub(crate) fn new(client: Arc<ClientShared>, inner: ReceiveContext) -> Self {
        Self { client, inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Wait for the next request. `Ok(None)` if `timeout` elapses first.
    pub async fn receive_request(&mut self, timeout: ReceiveTimeout) -> Result<Option<Envelope>> {
        self.client.ensure_open()?;
        self.inner.receive(timeout).await
    }

    /// Answer the request received last
    pub async fn response(&mut self, value: &Value) -> Result<()> {
        self.client.ensure_open()?;
        self.inner.response(value).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Release the service. Later calls do nothing.
    pub fn close(&mut self) {
        self.inner.destroy();
    }
}

/// Sends requests to a service and receives its responses
pub struct ServiceRequester {
    client: Arc<ClientShared>,
    inner: ReceiveContext,
}

impl ServiceRequester {
    pub(crate) fn new(client: Arc<ClientShared>, inner: ReceiveContext) -> Self {
        Self { client, inner }
    }

    pub fn service(&self) -> &str {
        self.inner.name()
    }

    pub async fn request(&mut self, value: &Value) -> Result<()> {
        self.client.ensure_open()?;
        self.inner.request(value).await
    }

    /// Wait for the response to the last request. `Ok(None)` if `timeout`
    /// elapses first.
    pub async fn receive_response(&mut self, timeout: ReceiveTimeout) -> Result<Option<Envelope>> {
        self.client.ensure_open()?;
        self.inner.receive(timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Release the requester. Later calls do nothing.
    pub fn close(&mut self) {
        self.inner.destroy();
    }
}
