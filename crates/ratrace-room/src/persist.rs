//! Persistence seam: a gateway trait the engine writes snapshots through,
//! and a background mirror that keeps those writes off the engine task.
//!
//! The engine never waits on storage. Every state change is queued on the
//! [`PersistenceMirror`] as a job; one worker applies jobs in order and
//! retries failures with backoff. A job that still fails after the last
//! attempt is logged and dropped, and play goes on from memory.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ratrace_protocol::{GameResult, GoalId, PlayerId, RoleId, RoomId, RoomStatus, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::{PersistError, RetryPolicy, Room};

// ---------------------------------------------------------------------------
// Completed-game history
// ---------------------------------------------------------------------------

/// A seat in a finished game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSummary {
    pub player_id: PlayerId,
    pub display_name: String,
    pub role: Option<RoleId>,
    pub goal: Option<GoalId>,
    /// Whether the player was still in the game at the end.
    pub finished_active: bool,
}

/// History record written once per finished game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub room_id: RoomId,
    pub name: String,
    pub seats: Vec<SeatSummary>,
    pub result: GameResult,
    pub started_at: Option<Timestamp>,
    pub finished_at: Timestamp,
}

impl GameSummary {
    pub fn of(room: &Room, result: GameResult, finished_at: Timestamp) -> Self {
        Self {
            room_id: room.id,
            name: room.name.clone(),
            seats: room
                .players
                .iter()
                .map(|p| SeatSummary {
                    player_id: p.id,
                    display_name: p.display_name.clone(),
                    role: p.role.clone(),
                    goal: p.goal.clone(),
                    finished_active: p.is_active,
                })
                .collect(),
            result,
            started_at: room.started_at,
            finished_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Durable storage for room snapshots and game history.
///
/// Implementations are shared between the mirror worker and startup
/// code, hence `&self` receivers.
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Writes the full snapshot of `room`, replacing any earlier one.
    fn save(&self, room: &Room) -> impl Future<Output = Result<(), PersistError>> + Send;

    /// Forgets the snapshot of `room_id`. Removing an unknown room is not
    /// an error.
    fn remove(&self, room_id: RoomId) -> impl Future<Output = Result<(), PersistError>> + Send;

    /// Every stored room that has not finished.
    fn load_all_active(&self) -> impl Future<Output = Result<Vec<Room>, PersistError>> + Send;

    /// The highest room id ever saved, including rooms that have since
    /// finished or been removed. `None` if nothing was ever saved.
    fn last_room_id(&self) -> impl Future<Output = Result<Option<RoomId>, PersistError>> + Send;

    /// Appends one finished game to the history.
    fn record_completed_game(
        &self,
        summary: &GameSummary,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}

/// Keeps nothing. The engine runs purely in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl PersistenceGateway for NoPersistence {
    async fn save(&self, _room: &Room) -> Result<(), PersistError> {
        Ok(())
    }

    async fn remove(&self, _room_id: RoomId) -> Result<(), PersistError> {
        Ok(())
    }

    async fn load_all_active(&self) -> Result<Vec<Room>, PersistError> {
        Ok(Vec::new())
    }

    async fn last_room_id(&self) -> Result<Option<RoomId>, PersistError> {
        Ok(None)
    }

    async fn record_completed_game(&self, _summary: &GameSummary) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Everything the engine needs from storage to pick up after a restart.
#[derive(Debug, Clone, Default)]
pub struct RestorePoint {
    pub rooms: Vec<Room>,
    /// New rooms are numbered above this.
    pub last_room_id: Option<RoomId>,
}

impl RestorePoint {
    pub async fn load<P: PersistenceGateway>(gateway: &P) -> Result<Self, PersistError> {
        let rooms = gateway.load_all_active().await?;
        let last_room_id = gateway.last_room_id().await?;
        Ok(Self {
            rooms,
            last_room_id,
        })
    }
}

/// A gateway that keeps everything in memory. Used by tests to inspect
/// what the engine wrote and to inject storage outages.
///
/// `load_all_active` forgets the finished snapshots it passes over, as the
/// file store does.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    rooms: Mutex<BTreeMap<RoomId, Room>>,
    history: Mutex<Vec<GameSummary>>,
    last_id: AtomicU64,
    failures: AtomicU32,
    writes: AtomicU32,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with [`PersistError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn snapshot(&self, room_id: RoomId) -> Option<Room> {
        self.rooms.lock().await.get(&room_id).cloned()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.lock().await.keys().copied().collect()
    }

    pub async fn history(&self) -> Vec<GameSummary> {
        self.history.lock().await.clone()
    }

    /// Successful saves so far.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_outage(&self) -> Result<(), PersistError> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(PersistError::Unavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }
}

impl PersistenceGateway for InMemoryGateway {
    async fn save(&self, room: &Room) -> Result<(), PersistError> {
        self.check_outage()?;
        self.rooms.lock().await.insert(room.id, room.clone());
        self.last_id.fetch_max(room.id.0, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, room_id: RoomId) -> Result<(), PersistError> {
        self.check_outage()?;
        self.rooms.lock().await.remove(&room_id);
        Ok(())
    }

    async fn load_all_active(&self) -> Result<Vec<Room>, PersistError> {
        self.check_outage()?;
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, r| r.status != RoomStatus::Finished);
        Ok(rooms.values().cloned().collect())
    }

    async fn last_room_id(&self) -> Result<Option<RoomId>, PersistError> {
        self.check_outage()?;
        match self.last_id.load(Ordering::SeqCst) {
            0 => Ok(None),
            id => Ok(Some(RoomId(id))),
        }
    }

    async fn record_completed_game(&self, summary: &GameSummary) -> Result<(), PersistError> {
        self.check_outage()?;
        self.history.lock().await.push(summary.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// Work queued for the mirror worker.
#[derive(Debug)]
pub enum PersistJob {
    Save(Box<Room>),
    Remove(RoomId),
    Record(Box<GameSummary>),
    /// Answered once every job queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

impl PersistJob {
    fn label(&self) -> &'static str {
        match self {
            Self::Save(_) => "save",
            Self::Remove(_) => "remove",
            Self::Record(_) => "record",
            Self::Flush(_) => "flush",
        }
    }
}

/// Asynchronous, ordered, retrying writer in front of a gateway.
#[derive(Debug, Clone)]
pub struct PersistenceMirror {
    jobs: mpsc::UnboundedSender<PersistJob>,
}

impl PersistenceMirror {
    /// Starts the worker task. It stops when every mirror clone is dropped
    /// and the queue is drained.
    pub fn spawn<P: PersistenceGateway>(gateway: Arc<P>, retry: RetryPolicy) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(gateway, retry, queue));
        Self { jobs }
    }

    /// Queues `job`. Never blocks.
    pub fn submit(&self, job: PersistJob) {
        if let Err(err) = self.jobs.send(job) {
            tracing::error!(job = err.0.label(), "persistence worker gone, job dropped");
        }
    }

    /// Waits until every job submitted so far has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.submit(PersistJob::Flush(done));
        let _ = wait.await;
    }
}

async fn run_worker<P: PersistenceGateway>(
    gateway: Arc<P>,
    retry: RetryPolicy,
    mut queue: mpsc::UnboundedReceiver<PersistJob>,
) {
    tracing::debug!("persistence worker started");
    while let Some(job) = queue.recv().await {
        if let PersistJob::Flush(done) = job {
            let _ = done.send(());
            continue;
        }
        run_job(gateway.as_ref(), &retry, &job).await;
    }
    tracing::debug!("persistence worker stopped");
}

async fn run_job<P: PersistenceGateway>(gateway: &P, retry: &RetryPolicy, job: &PersistJob) {
    let mut attempt = 1;
    loop {
        let result = match job {
            PersistJob::Save(room) => gateway.save(room).await,
            PersistJob::Remove(room_id) => gateway.remove(*room_id).await,
            PersistJob::Record(summary) => gateway.record_completed_game(summary).await,
            PersistJob::Flush(_) => Ok(()),
        };

        match result {
            Ok(()) => return,
            Err(err) if attempt < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                tracing::warn!(
                    job = job.label(),
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "persistence write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    job = job.label(),
                    attempts = attempt,
                    error = %err,
                    "persistence write abandoned"
                );
                return;
            }
        }
    }
}
