//! Socket wire layer
//!
//! Frames are bincode-encoded [`Frame`] values, each prefixed with a 4-byte
//! big-endian length. A connecting peer opens with [`Frame::Hello`] and the
//! listening endpoint answers [`Frame::Welcome`] or [`Frame::Rejected`]
//! before any message frames flow.

use msgbus_core::SerializedEnvelope;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod channel;
pub mod tcp;
pub mod unix;

pub use self::channel::{Channel, FrameReader, FrameWriter};
pub use self::tcp::TcpChannelListener;
pub use self::unix::UnixChannelListener;

/// Largest frame accepted from a peer (100 MiB)
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    Subscriber,
    Requester,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub role: PeerRole,
    /// Topic or service name the peer expects to reach
    pub name: String,
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    AuthenticationFailed,
    UnknownEndpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Hello(Hello),
    Welcome,
    Rejected(Rejection),
    Message(SerializedEnvelope),
}

/// Listener yielding framed channels, implemented for TCP and Unix sockets
#[async_trait::async_trait]
pub trait ChannelListener: Send + Sync {
    /// Accept the next incoming connection
    async fn accept(&self) -> Result<Channel>;

    /// Human readable address for logging
    fn describe(&self) -> String;
}
