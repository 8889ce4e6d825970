//! Codec trait and the JSON implementation.
//!
//! The server never touches `serde_json` directly when framing; it goes
//! through a [`Codec`] so a binary format can be swapped in without
//! changing the handler.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Turns typed frames into bytes and back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do
    /// not match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`. Frames are UTF-8 text, which the
/// transport sends as WebSocket text messages.
///
/// ```rust
/// use ratrace_protocol::{Codec, Envelope, JsonCodec, RoomId, ServerMessage};
///
/// let codec = JsonCodec;
/// let envelope = Envelope {
///     seq: 1,
///     timestamp: 5000,
///     payload: ServerMessage::RoomRemoved { room_id: RoomId(1) },
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope<ServerMessage> = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
