//! Wire protocol for Ratrace.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Types** ([`PlayerId`], [`RoomId`], [`RoomView`], ...): identities
//!   and the read-only room snapshots pushed to clients.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`], [`Envelope`]):
//!   the inbound actions and outbound notifications.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes in, typed frames out.
//! - **Errors** ([`ProtocolError`], [`ErrorCode`]).
//!
//! It knows nothing about sockets or rooms; it only describes frames.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Engine (room state)
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::{ErrorCode, ProtocolError};
pub use message::{ClientMessage, Envelope, ServerMessage};
pub use types::{
    GameResult, GoalId, PlayerId, PlayerView, RoleId, RoleSelectionMode, RoomId, RoomListEntry,
    RoomSettings, RoomStatus, RoomView, Timestamp, TurnOrderPolicy, TurnView,
};
