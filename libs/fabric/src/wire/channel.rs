use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{BincodeCodec, Codec};
use crate::error::{Error, Result};
use crate::wire::MAX_FRAME_LEN;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

fn closed_on_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

/// Read half of a framed connection
pub struct FrameReader<C = BincodeCodec> {
    inner: BoxedRead,
    codec: C,
}

impl<C: Codec> FrameReader<C> {
    /// Read one length-prefixed frame and decode it
    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        let len = self.inner.read_u32().await.map_err(closed_on_eof)? as usize;

        if len > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(closed_on_eof)?;

        self.codec.decode(&buf)
    }

    /// Receive with an upper bound on the wait
    pub async fn receive_timeout<T: for<'de> Deserialize<'de>>(
        &mut self,
        timeout: Duration,
    ) -> Result<T> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| Error::Custom("Receive timeout exceeded".to_string()))?
    }
}

/// Write half of a framed connection
pub struct FrameWriter<C = BincodeCodec> {
    inner: BoxedWrite,
    codec: C,
}

impl<C: Codec> FrameWriter<C> {
    /// Encode a value and write it as one length-prefixed frame
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                bytes.len()
            )));
        }

        self.inner.write_u32(bytes.len() as u32).await?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Bidirectional framed connection over any byte stream
///
/// Split it with [`Channel::split`] when reading and writing happen on
/// different tasks.
pub struct Channel<C = BincodeCodec> {
    reader: FrameReader<C>,
    writer: FrameWriter<C>,
}

impl<C: Codec + Clone> Channel<C> {
    /// Create a channel from the two halves of a stream
    pub fn from_halves(
        read: impl AsyncRead + Send + Unpin + 'static,
        write: impl AsyncWrite + Send + Unpin + 'static,
        codec: C,
    ) -> Self {
        Self {
            reader: FrameReader {
                inner: Box::new(read),
                codec: codec.clone(),
            },
            writer: FrameWriter {
                inner: Box::new(write),
                codec,
            },
        }
    }
}

impl<C: Codec> Channel<C> {
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.writer.send(value).await
    }

    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        self.reader.receive().await
    }

    pub async fn receive_timeout<T: for<'de> Deserialize<'de>>(
        &mut self,
        timeout: Duration,
    ) -> Result<T> {
        self.reader.receive_timeout(timeout).await
    }

    pub fn split(self) -> (FrameReader<C>, FrameWriter<C>) {
        (self.reader, self.writer)
    }

    /// Close the channel
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}
