use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::codec::BincodeCodec;
use crate::error::{Error, Result};
use crate::wire::{Channel, ChannelListener};

/// Connect to a Unix socket, giving up after `timeout`
pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Channel> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(path.as_ref()))
        .await
        .map_err(|_| Error::Custom("Connect timeout exceeded".to_string()))??;
    Ok(from_stream(stream))
}

fn from_stream(stream: UnixStream) -> Channel {
    let (read, write) = stream.into_split();
    Channel::from_halves(read, write, BincodeCodec::default())
}

/// Unix socket listener producing framed channels
///
/// The socket file is removed when the listener is dropped.
pub struct UnixChannelListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixChannelListener {
    /// Bind to a Unix socket path, replacing a stale socket file
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixChannelListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.path());
    }
}

#[async_trait::async_trait]
impl ChannelListener for UnixChannelListener {
    async fn accept(&self) -> Result<Channel> {
        let (stream, _) = self.listener.accept().await?;
        Ok(from_stream(stream))
    }

    fn describe(&self) -> String {
        format!("ipc://{}", self.path().display())
    }
}
