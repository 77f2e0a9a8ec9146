use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::wire::MAX_FRAME_LEN;

/// Bincode codec for socket transport frames
///
/// Decoding is bounded by `limit` so a corrupt length field inside a frame
/// cannot trigger an oversized allocation.
#[derive(Debug, Clone, Copy)]
pub struct BincodeCodec {
    limit: u64,
}

impl BincodeCodec {
    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_limit(self.limit)
            .reject_trailing_bytes()
    }
}

impl Default for BincodeCodec {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_LEN as u64)
    }
}

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        self.options()
            .serialize(value)
            .map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        self.options()
            .deserialize(bytes)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}
