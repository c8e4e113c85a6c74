use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// A serializer failed for one event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SerializeError {
    pub message: String,
}

impl From<serde_json::Error> for SerializeError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Turns a caller value into the wire payload.
///
/// Must be deterministic for a given event: the same event may be
/// re-serialized never, but the same bytes are re-sent across retries and
/// replicant failover.
pub trait EventSerializer<T>: Send + Sync {
    fn serialize(&self, event: &T) -> Result<Bytes, SerializeError>;
}

/// Default serializer: JSON via serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T: Serialize> EventSerializer<T> for JsonSerializer {
    fn serialize(&self, event: &T) -> Result<Bytes, SerializeError> {
        let buf = serde_json::to_vec(event)?;
        Ok(Bytes::from(buf))
    }
}
