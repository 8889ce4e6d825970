//! `ratrace-server`: the room engine behind a WebSocket, persisted to a
//! JSON data directory.
//!
//! Identity issuance lives elsewhere. This binary accepts tokens of the
//! form `player-<id>` and trusts the id; put a real authenticator in
//! front for anything but local play.

use std::sync::Arc;

use ratrace::prelude::*;
use tracing_subscriber::EnvFilter;

struct PlayerTokenAuth;

impl Authenticator for PlayerTokenAuth {
    async fn authenticate(&self, token: &str) -> Result<PlayerId, SessionError> {
        token
            .strip_prefix("player-")
            .and_then(|id| id.parse().ok())
            .map(PlayerId)
            .ok_or_else(|| SessionError::AuthFailed("expected token player-<id>".into()))
    }
}

#[tokio::main]
async fn main() -> Result<(), RatraceError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ratrace=debug")),
        )
        .init();

    let settings = ServerSettings::from_env()?;
    tracing::info!(bind = %settings.bind, data_dir = %settings.data_dir.display(), "starting");

    let store = Arc::new(JsonFileStore::open(&settings.data_dir).await?);
    let server = RatraceServerBuilder::new()
        .bind(&settings.bind)
        .engine_config(settings.engine_config())
        .build::<OpenTable, _, _>(PlayerTokenAuth, store)
        .await?;
    let engine = server.engine();

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down, flushing room snapshots");
            engine.flush().await?;
            engine.shutdown().await?;
            Ok(())
        }
    }
}
