//! Rooms, role negotiation, and turn scheduling for Ratrace.
//!
//! All room state lives in one [`RoomStore`] owned by a single engine task
//! (actor model). Connection handlers send it commands through an
//! [`EngineHandle`]; it answers with results and pushes notifications to
//! every affected player.
//!
//! # Key types
//!
//! - [`Room`], [`Player`], [`TurnState`]: the room record and its parts
//! - [`RoomStore`]: every operation on rooms, synchronous and testable
//! - [`EngineHandle`] / [`spawn_engine`]: the engine task and its handle
//! - [`GameRules`]: hooks for the board game running in a room
//! - [`PersistenceGateway`] / [`PersistenceMirror`]: snapshot storage
//! - [`EngineConfig`], [`RoomLimits`], [`EvictionPolicy`], [`RetryPolicy`]

#![allow(async_fn_in_trait)]

mod broadcast;
mod config;
mod engine;
mod error;
mod password;
mod persist;
mod player;
mod roles;
mod room;
mod rules;
mod store;
mod turn;

pub use broadcast::{Broadcaster, Outbound, PlayerSender};
pub use config::{EngineConfig, EvictionPolicy, RetryPolicy, RoomLimits};
pub use engine::{EngineHandle, RoomOp, spawn_engine};
pub use error::{ConfigViolation, PersistError, RoomError};
pub use password::{hash_password, verify_password};
pub use persist::{
    GameSummary, InMemoryGateway, NoPersistence, PersistJob, PersistenceGateway,
    PersistenceMirror, RestorePoint, SeatSummary,
};
pub use player::Player;
pub use room::Room;
pub use rules::{GameRules, OpenTable};
pub use store::{Effects, RoomStore};
pub use turn::TurnState;
