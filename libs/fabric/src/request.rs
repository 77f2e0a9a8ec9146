//! One-shot exchanges
//!
//! Each helper opens an endpoint on the client, performs a single exchange
//! and closes the endpoint again.

use msgbus_core::{Envelope, Value};
use tracing::debug;

use crate::client::Client;
use crate::context::ReceiveTimeout;
use crate::error::Result;

/// Send one request to `service` and wait for its response
///
/// Returns `Ok(None)` if no response arrives within `timeout`.
pub async fn request(
    client: &Client,
    service: &str,
    value: &Value,
    timeout: ReceiveTimeout,
) -> Result<Option<Envelope>> {
    let mut requester = client.get_service(service).await?;
    requester.request(value).await?;
    let response = requester.receive_response(timeout).await;
    requester.close();
    debug!(service, answered = matches!(response, Ok(Some(_))), "one-shot request finished");
    response
}

/// Publish one message on `topic` (fire-and-forget)
///
/// Only subscribers that are already attached to the topic receive it.
pub async fn publish(client: &Client, topic: &str, value: &Value) -> Result<()> {
    let mut publisher = client.new_publisher(topic).await?;
    publisher.publish(value).await?;
    publisher.close()
}
