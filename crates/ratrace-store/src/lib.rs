//! File-backed persistence for Ratrace.
//!
//! Layout under the data directory:
//!
//! ```text
//! <dir>/rooms/room-<id>.json   one snapshot per live room, replaced whole
//! <dir>/history.jsonl          one finished game per line, append only
//! <dir>/last-room-id.json      highest room id ever saved
//! ```
//!
//! Snapshots and the id mark are written to a temporary file and renamed
//! into place, so a crash mid-write leaves the previous version intact.
//!
//! The id mark outlives the snapshots. Finished snapshots are deleted the
//! next time the store is loaded, and evicted rooms are removed, but their
//! ids must never be handed out again or `history.jsonl` would hold two
//! games under one `room_id`.

mod error;

pub use error::StoreError;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ratrace_protocol::{RoomId, RoomStatus};
use ratrace_room::{GameSummary, PersistError, PersistenceGateway, Room};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const ROOMS_DIR: &str = "rooms";
const HISTORY_FILE: &str = "history.jsonl";
const LAST_ID_FILE: &str = "last-room-id.json";

/// [`PersistenceGateway`] over plain JSON files.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    rooms_dir: PathBuf,
    history_path: PathBuf,
    last_id_path: PathBuf,
    /// Cached content of `last_id_path`; 0 when nothing was saved.
    last_id: Arc<AtomicU64>,
}

impl JsonFileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let rooms_dir = dir.join(ROOMS_DIR);
        fs::create_dir_all(&rooms_dir)
            .await
            .map_err(StoreError::io(&rooms_dir))?;
        let last_id_path = dir.join(LAST_ID_FILE);
        let recorded = read_last_id(&last_id_path).await?;
        let on_disk = highest_snapshot_id(&rooms_dir).await?;
        let last_id = recorded.max(on_disk);

        tracing::info!(dir = %dir.display(), last_id, "json store opened");
        Ok(Self {
            rooms_dir,
            history_path: dir.join(HISTORY_FILE),
            last_id_path,
            last_id: Arc::new(AtomicU64::new(last_id)),
        })
    }

    /// Raises the persisted id mark to `id` if it is higher. The mark is
    /// written before the cache moves, so a failed write is retried by the
    /// next save of the same room.
    async fn raise_last_id(&self, id: u64) -> Result<(), StoreError> {
        if id <= self.last_id.load(Ordering::SeqCst) {
            return Ok(());
        }
        let path = &self.last_id_path;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&id).map_err(StoreError::Encode)?;

        fs::write(&tmp, bytes).await.map_err(StoreError::io(&tmp))?;
        fs::rename(&tmp, path).await.map_err(StoreError::io(path))?;
        self.last_id.fetch_max(id, Ordering::SeqCst);
        tracing::debug!(last_id = id, "room id mark raised");
        Ok(())
    }

    fn room_path(&self, room_id: RoomId) -> PathBuf {
        self.rooms_dir.join(format!("room-{}.json", room_id.0))
    }

    async fn write_snapshot(&self, room: &Room) -> Result<(), StoreError> {
        let path = self.room_path(room.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(room).map_err(StoreError::Encode)?;

        fs::write(&tmp, bytes).await.map_err(StoreError::io(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(StoreError::io(&path))?;
        tracing::trace!(room_id = %room.id, "snapshot written");
        Ok(())
    }

    async fn read_snapshot(path: &Path) -> Result<Room, StoreError> {
        let bytes = fs::read(path).await.map_err(StoreError::io(path))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every snapshot on disk, finished or not, ordered by room id.
    /// Unreadable files are logged and skipped.
    pub async fn load_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut entries = fs::read_dir(&self.rooms_dir)
            .await
            .map_err(StoreError::io(&self.rooms_dir))?;
        let mut rooms = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io(&self.rooms_dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_snapshot(&path).await {
                Ok(room) => rooms.push(room),
                Err(err) => tracing::warn!(error = %err, "skipping unreadable snapshot"),
            }
        }

        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn append_history(&self, summary: &GameSummary) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(summary).map_err(StoreError::Encode)?;
        line.push(b'\n');

        let path = &self.history_path;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(StoreError::io(path))?;
        file.write_all(&line).await.map_err(StoreError::io(path))?;
        file.flush().await.map_err(StoreError::io(path))?;
        Ok(())
    }

    /// Every recorded game, oldest first. A missing history file is an
    /// empty history.
    pub async fn history(&self) -> Result<Vec<GameSummary>, StoreError> {
        let path = &self.history_path;
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(path)(err)),
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| StoreError::Decode {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// The stored id mark, 0 if the file does not exist yet.
async fn read_last_id(path: &Path) -> Result<u64, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(StoreError::io(path)(err)),
    }
}

/// The highest id among the `room-<id>.json` names in `dir`, 0 if none.
/// Covers data directories written before the id mark existed.
async fn highest_snapshot_id(dir: &Path) -> Result<u64, StoreError> {
    let mut entries = fs::read_dir(dir).await.map_err(StoreError::io(dir))?;
    let mut highest = 0;
    while let Some(entry) = entries.next_entry().await.map_err(StoreError::io(dir))? {
        let name = entry.file_name();
        let id = name
            .to_str()
            .and_then(|n| n.strip_prefix("room-"))
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(id) = id {
            highest = highest.max(id);
        }
    }
    Ok(highest)
}

impl PersistenceGateway for JsonFileStore {
    async fn save(&self, room: &Room) -> Result<(), PersistError> {
        self.raise_last_id(room.id.0).await?;
        Ok(self.write_snapshot(room).await?)
    }

    async fn remove(&self, room_id: RoomId) -> Result<(), PersistError> {
        let path = self.room_path(room_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(path)(err).into()),
        }
    }

    /// Also deletes the finished snapshots it finds. Their games reached
    /// the history when they finished, and they are never restored.
    async fn load_all_active(&self) -> Result<Vec<Room>, PersistError> {
        let (finished, active): (Vec<Room>, Vec<Room>) = self
            .load_rooms()
            .await?
            .into_iter()
            .partition(|r| r.status == RoomStatus::Finished);

        for room in &finished {
            self.remove(room.id).await?;
        }
        if !finished.is_empty() {
            tracing::info!(pruned = finished.len(), "finished snapshots deleted");
        }
        Ok(active)
    }

    async fn last_room_id(&self) -> Result<Option<RoomId>, PersistError> {
        match self.last_id.load(Ordering::SeqCst) {
            0 => Ok(None),
            id => Ok(Some(RoomId(id))),
        }
    }

    async fn record_completed_game(&self, summary: &GameSummary) -> Result<(), PersistError> {
        Ok(self.append_history(summary).await?)
    }
}
