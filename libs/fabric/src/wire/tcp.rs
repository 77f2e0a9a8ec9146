use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::codec::BincodeCodec;
use crate::error::{Error, Result};
use crate::wire::{Channel, ChannelListener};

/// Connect to a TCP address, giving up after `timeout`
pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Channel> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??;
    from_stream(stream)
}

fn from_stream(stream: TcpStream) -> Result<Channel> {
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    Ok(Channel::from_halves(read, write, BincodeCodec::default()))
}

/// TCP listener producing framed channels
pub struct TcpChannelListener {
    listener: TcpListener,
}

impl TcpChannelListener {
    /// Bind to a local address
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl ChannelListener for TcpChannelListener {
    async fn accept(&self) -> Result<Channel> {
        let (stream, _) = self.listener.accept().await?;
        from_stream(stream)
    }

    fn describe(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => format!("tcp://{}", addr),
            Err(_) => "tcp://<unbound>".to_string(),
        }
    }
}
