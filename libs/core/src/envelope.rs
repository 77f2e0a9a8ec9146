use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};
use crate::value::{object_to_json, Object, Value};

/// Content type of a message envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// JSON body, optionally followed by a blob part
    Json,
    /// Single opaque blob part
    Blob,
}

/// Transport-level message envelope built from a [`Value`]
///
/// A JSON envelope always carries an object body and may carry one blob; a
/// blob envelope carries only the blob.
#[derive(Debug, Clone, PartialEq)]
pub struct MsgEnvelope {
    content_type: ContentType,
    body: Option<serde_json::Map<String, serde_json::Value>>,
    blob: Option<Vec<u8>>,
}

/// Serialized parts of an envelope, as carried by a transport
///
/// `name` is filled in by the transport on delivery (the topic a subscriber
/// received on); senders leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEnvelope {
    pub name: Option<String>,
    pub content_type: ContentType,
    pub parts: Vec<Vec<u8>>,
}

/// Decoded message handed back to receivers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub name: String,
    pub data: Option<Value>,
    pub blob: Option<Vec<u8>>,
}

/// Encode a caller supplied value into an envelope
///
/// Accepts an object, a blob, or a two element array holding one object and
/// one blob in either order.
pub fn encode(value: &Value) -> Result<MsgEnvelope> {
    match value {
        Value::Object(map) => MsgEnvelope::json(map, None),
        Value::Bytes(bytes) => Ok(MsgEnvelope::blob(bytes.clone())),
        Value::Array(items) => encode_multipart(items),
        other => Err(EnvelopeError::shape(format!(
            "expected object, bytes or [object, bytes], got {}",
            other.type_name()
        ))),
    }
}

fn encode_multipart(items: &[Value]) -> Result<MsgEnvelope> {
    if items.len() != 2 {
        return Err(EnvelopeError::shape(format!(
            "multi-part message must have exactly 2 elements, got {}",
            items.len()
        )));
    }

    match (&items[0], &items[1]) {
        (Value::Object(map), Value::Bytes(bytes)) | (Value::Bytes(bytes), Value::Object(map)) => {
            MsgEnvelope::json(map, Some(bytes.clone()))
        }
        (first, second) => Err(EnvelopeError::shape(format!(
            "multi-part message must hold one object and one bytes element, got {} and {}",
            first.type_name(),
            second.type_name()
        ))),
    }
}

/// Decode serialized parts received from a transport
pub fn decode(message: SerializedEnvelope) -> Result<Envelope> {
    let SerializedEnvelope {
        name,
        content_type,
        mut parts,
    } = message;
    let name = name.unwrap_or_default();

    match (content_type, parts.len()) {
        (_, 0) => Err(EnvelopeError::decode("message has no serialized parts")),
        (ContentType::Blob, 1) => Ok(Envelope {
            name,
            data: None,
            blob: parts.pop(),
        }),
        (ContentType::Json, 1 | 2) => {
            let blob = if parts.len() == 2 { parts.pop() } else { None };
            let json = parts.pop().unwrap_or_default();
            let data: serde_json::Value = serde_json::from_slice(&json)
                .map_err(|e| EnvelopeError::decode(format!("malformed JSON part: {}", e)))?;
            Ok(Envelope {
                name,
                data: Some(Value::from(data)),
                blob,
            })
        }
        (content_type, n) => Err(EnvelopeError::decode(format!(
            "{:?} message has {} parts",
            content_type, n
        ))),
    }
}

impl MsgEnvelope {
    fn json(map: &Object, blob: Option<Vec<u8>>) -> Result<Self> {
        Ok(Self {
            content_type: ContentType::Json,
            body: Some(object_to_json(map)?),
            blob,
        })
    }

    fn blob(bytes: Vec<u8>) -> Self {
        Self {
            content_type: ContentType::Blob,
            body: None,
            blob: Some(bytes),
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn has_blob(&self) -> bool {
        self.blob.is_some()
    }

    /// Serialize into transport parts
    pub fn serialize(self) -> Result<SerializedEnvelope> {
        let mut parts = Vec::with_capacity(2);

        if let Some(body) = self.body {
            let json = serde_json::to_vec(&body)
                .map_err(|e| EnvelopeError::element(format!("failed to serialize body: {}", e)))?;
            parts.push(json);
        }
        if let Some(blob) = self.blob {
            parts.push(blob);
        }

        Ok(SerializedEnvelope {
            name: None,
            content_type: self.content_type,
            parts,
        })
    }
}

impl SerializedEnvelope {
    /// Stamp the delivery name (topic or service) onto the message
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Envelope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Rebuild the value this envelope was encoded from
    ///
    /// The result can be handed straight back to a publisher or service, e.g.
    /// to echo a request.
    pub fn into_value(self) -> Value {
        match (self.data, self.blob) {
            (Some(data), Some(blob)) => Value::Array(vec![data, Value::Bytes(blob)]),
            (Some(data), None) => data,
            (None, Some(blob)) => Value::Bytes(blob),
            (None, None) => Value::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_envelope_has_single_part() {
        let parts = encode(&Value::bytes(b"abc".to_vec()))
            .unwrap()
            .serialize()
            .unwrap();
        assert_eq!(parts.content_type, ContentType::Blob);
        assert_eq!(parts.parts, vec![b"abc".to_vec()]);
    }

    #[test]
    fn multipart_envelope_puts_json_first() {
        let value = Value::Array(vec![
            Value::bytes(vec![9u8]),
            Value::object([("k", Value::from(1))]),
        ]);
        let envelope = encode(&value).unwrap();
        assert_eq!(envelope.content_type(), ContentType::Json);
        assert!(envelope.has_blob());

        let parts = envelope.serialize().unwrap();
        assert_eq!(parts.parts.len(), 2);
        assert_eq!(parts.parts[0], br#"{"k":1}"#.to_vec());
        assert_eq!(parts.parts[1], vec![9u8]);
    }
}
