//! Player identity and connection binding for Ratrace.
//!
//! Two jobs live here:
//!
//! 1. **Authentication**: turning a handshake token into a stable
//!    [`PlayerId`](ratrace_protocol::PlayerId) via the [`Authenticator`]
//!    trait. Identity issuance itself is external; the server only
//!    consumes it.
//! 2. **Connection binding**: [`SessionManager`] remembers which live
//!    connection currently speaks for each player and which room that
//!    player was last in, so a dropped socket can be turned into an
//!    implicit `disconnect` for the right room.
//!
//! ```text
//! Room engine (above)   ← told "player left connection X in room R"
//!     ↕
//! Session (this crate)  ← PlayerId ↔ ConnectionId ↔ last RoomId
//!     ↕
//! Transport (below)     ← provides ConnectionId
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;

pub use auth::Authenticator;
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionState};
