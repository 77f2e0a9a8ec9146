//! Message bus envelope model
//!
//! Defines the [`Value`] tree callers build messages from, the transport-level
//! [`MsgEnvelope`] it encodes into, the [`SerializedEnvelope`] parts that cross
//! a transport, and the decoded [`Envelope`] handed back to receivers.
//!
//! # Example
//!
//! ```
//! use msgbus_core::{decode, encode, Value};
//! use serde_json::json;
//!
//! let meta = Value::from(json!({"camera": 1, "score": 0.75}));
//! let frame = Value::bytes(vec![0u8, 1, 2, 3]);
//! let message = Value::Array(vec![meta.clone(), frame]);
//!
//! let parts = encode(&message).unwrap().serialize().unwrap();
//! let received = decode(parts).unwrap();
//!
//! assert_eq!(received.data(), Some(&meta));
//! assert_eq!(received.blob(), Some(&[0u8, 1, 2, 3][..]));
//! ```

pub mod envelope;
pub mod error;
pub mod value;

pub use envelope::{decode, encode, ContentType, Envelope, MsgEnvelope, SerializedEnvelope};
pub use error::{EnvelopeError, Result};
pub use value::{Object, Value};
