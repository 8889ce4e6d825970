//! Unified error type for the Ratrace server.

use ratrace_protocol::ProtocolError;
use ratrace_room::{PersistError, RoomError};
use ratrace_session::SessionError;
use ratrace_store::StoreError;
use ratrace_transport::TransportError;

/// Top-level error wrapping every layer's error type, so `?` works across
/// crate boundaries inside the server.
#[derive(Debug, thiserror::Error)]
pub enum RatraceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// Loading rooms from the persistence gateway at startup failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// An environment setting could not be parsed.
    #[error("invalid setting {name}: {reason}")]
    Settings { name: &'static str, reason: String },
}
