//! # Ratrace
//!
//! Room and turn coordination server for turn-based board games.
//!
//! Players authenticate over a WebSocket, gather in rooms, negotiate
//! roles and goals, and take timed turns. One engine task owns all room
//! state; every connection task only forwards actions to it and relays
//! the notifications it pushes back.
//!
//! ```text
//! client ⇄ transport ⇄ handler ──ops──→ engine ──snapshots──→ gateway
//!                         ↑                │
//!                         └──notifications─┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ratrace::prelude::*;
//!
//! struct AnyToken;
//!
//! impl Authenticator for AnyToken {
//!     async fn authenticate(&self, token: &str) -> Result<PlayerId, SessionError> {
//!         token
//!             .parse()
//!             .map(PlayerId)
//!             .map_err(|_| SessionError::AuthFailed("numeric token expected".into()))
//!     }
//! }
//!
//! # async fn run() -> Result<(), RatraceError> {
//! let server = RatraceServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build::<OpenTable, _, _>(AnyToken, Arc::new(NoPersistence))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;
mod settings;

pub use error::RatraceError;
pub use server::{PROTOCOL_VERSION, RatraceServer, RatraceServerBuilder};
pub use settings::ServerSettings;

pub mod prelude {
    pub use crate::{PROTOCOL_VERSION, RatraceError, RatraceServer, RatraceServerBuilder, ServerSettings};
    pub use ratrace_clock::Clock;
    pub use ratrace_protocol::{
        ClientMessage, Codec, Envelope, ErrorCode, GameResult, GoalId, JsonCodec, PlayerId, RoleId,
        RoleSelectionMode, RoomId, RoomSettings, RoomStatus, RoomView, ServerMessage,
        TurnOrderPolicy,
    };
    pub use ratrace_room::{
        EngineConfig, EngineHandle, GameRules, InMemoryGateway, NoPersistence, OpenTable,
        PersistenceGateway, Room, RoomError,
    };
    pub use ratrace_session::{Authenticator, SessionConfig, SessionError};
    pub use ratrace_store::JsonFileStore;
}
