use msgbus_core::Envelope;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ReceiveContext;
use crate::error::{Error, Result};

/// Receives messages published on one topic
///
/// A background task keeps receiving from the transport. Decoded envelopes
/// arrive on [`messages`](Self::messages), receive failures on
/// [`errors`](Self::errors). A disconnect is reported once and ends the task.
pub struct Subscriber {
    topic: String,
    messages: UnboundedReceiver<Envelope>,
    errors: UnboundedReceiver<Error>,
    cancel: CancellationToken,
    closed: bool,
}

impl Subscriber {
    pub(crate) fn spawn(inner: ReceiveContext) -> Self {
        let topic = inner.name().to_string();
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(receive_loop(inner, message_tx, error_tx, cancel.clone()));

        Self {
            topic,
            messages,
            errors,
            cancel,
            closed: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Channel of received envelopes, in transport delivery order
    pub fn messages(&mut self) -> &mut UnboundedReceiver<Envelope> {
        &mut self.messages
    }

    /// Channel of receive errors
    pub fn errors(&mut self) -> &mut UnboundedReceiver<Error> {
        &mut self.errors
    }

    /// Next message or error, whichever comes first. `None` once the
    /// subscriber is closed and both channels are drained.
    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        tokio::select! {
            Some(envelope) = self.messages.recv() => Some(Ok(envelope)),
            Some(error) = self.errors.recv() => Some(Err(error)),
            else => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop the receive task and close both channels. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.messages.close();
        self.errors.close();
        debug!(topic = %self.topic, "subscriber closed");
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    mut inner: ReceiveContext,
    messages: UnboundedSender<Envelope>,
    errors: UnboundedSender<Error>,
    cancel: CancellationToken,
) {
    debug!(topic = %inner.name(), "receive loop started");

    loop {
        // Transport receives are cancel safe, so close does not have to wait
        // for the next message
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = inner.receive_wait() => received,
        };
        if cancel.is_cancelled() {
            break;
        }

        match received {
            Ok(envelope) => {
                if messages.send(envelope).is_err() {
                    break;
                }
            }
            Err(Error::Disconnected) => {
                let _ = errors.send(Error::Disconnected);
                break;
            }
            Err(err) => {
                if let Error::Decode(reason) = &err {
                    warn!(topic = %inner.name(), %reason, "dropping malformed message");
                }
                if errors.send(err).is_err() {
                    break;
                }
            }
        }
    }

    inner.destroy();
    debug!(topic = %inner.name(), "receive loop stopped");
}
