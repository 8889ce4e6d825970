//! The engine actor: one Tokio task that owns the [`RoomStore`] and
//! serializes every operation on it.
//!
//! Connection handlers talk to it through an [`EngineHandle`]. Commands
//! are handled one at a time, in arrival order, alongside turn timeouts
//! and the periodic sweep:
//!
//! ```text
//! handlers ──commands──→ ┌──────────────┐ ──notifications──→ player channels
//!                        │ engine task  │
//! turn timers ─expiry──→ │  RoomStore   │ ──snapshots──→ persistence mirror
//! sweep interval ──────→ └──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use ratrace_clock::{Clock, TurnTimers};
use ratrace_protocol::{
    GoalId, PlayerId, RoleId, RoomId, RoomListEntry, RoomSettings, RoomStatus, RoomView,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{
    Broadcaster, Effects, EngineConfig, GameRules, PersistJob, PersistenceGateway,
    PersistenceMirror, PlayerSender, RestorePoint, Room, RoomError, RoomStore,
};

/// A player action on a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomOp {
    Create {
        settings: RoomSettings,
        creator_name: String,
    },
    Join {
        room_id: RoomId,
        player_name: String,
        password: Option<String>,
    },
    Leave {
        room_id: RoomId,
    },
    SelectRole {
        room_id: RoomId,
        role_id: RoleId,
    },
    ConfirmRole {
        room_id: RoomId,
        confirmed: bool,
    },
    SelectGoal {
        room_id: RoomId,
        goal_id: GoalId,
    },
    SetReady {
        room_id: RoomId,
    },
    Start {
        room_id: RoomId,
    },
    Roll {
        room_id: RoomId,
    },
    Pass {
        room_id: RoomId,
        turn: u64,
    },
}

impl RoomOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::SelectRole { .. } => "select_role",
            Self::ConfirmRole { .. } => "confirm_role",
            Self::SelectGoal { .. } => "select_goal",
            Self::SetReady { .. } => "set_ready",
            Self::Start { .. } => "start",
            Self::Roll { .. } => "roll",
            Self::Pass { .. } => "pass",
        }
    }
}

enum EngineCommand {
    Connect {
        player_id: PlayerId,
        last_room: Option<RoomId>,
        sender: PlayerSender,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        player_id: PlayerId,
        last_room: Option<RoomId>,
        reply: oneshot::Sender<()>,
    },
    Apply {
        player_id: PlayerId,
        op: RoomOp,
        reply: oneshot::Sender<Result<RoomId, RoomError>>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomListEntry>>,
    },
    GetRoom {
        room_id: RoomId,
        reply: oneshot::Sender<Option<RoomView>>,
    },
    RoomOf {
        player_id: PlayerId,
        reply: oneshot::Sender<Option<RoomId>>,
    },
    Sweep {
        reply: oneshot::Sender<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the engine task.
///
/// Every method fails with [`RoomError::Unavailable`] once the engine has
/// stopped.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// Registers `player_id`'s outbound channel and marks them connected
    /// in the room they sit in (or `last_room`).
    pub async fn connect(
        &self,
        player_id: PlayerId,
        last_room: Option<RoomId>,
        sender: PlayerSender,
    ) -> Result<(), RoomError> {
        self.request(|reply| EngineCommand::Connect {
            player_id,
            last_room,
            sender,
            reply,
        })
        .await
    }

    /// Drops `player_id`'s channel and applies the disconnect rules.
    pub async fn disconnect(
        &self,
        player_id: PlayerId,
        last_room: Option<RoomId>,
    ) -> Result<(), RoomError> {
        self.request(|reply| EngineCommand::Disconnect {
            player_id,
            last_room,
            reply,
        })
        .await
    }

    /// Applies `op` for `player_id`. Returns the room the op acted on,
    /// which for `Create` is the new room.
    pub async fn apply(&self, player_id: PlayerId, op: RoomOp) -> Result<RoomId, RoomError> {
        self.request(|reply| EngineCommand::Apply {
            player_id,
            op,
            reply,
        })
        .await?
    }

    pub async fn create_room(
        &self,
        player_id: PlayerId,
        settings: RoomSettings,
        creator_name: impl Into<String>,
    ) -> Result<RoomId, RoomError> {
        let creator_name = creator_name.into();
        self.apply(player_id, RoomOp::Create { settings, creator_name })
            .await
    }

    pub async fn join_room(
        &self,
        player_id: PlayerId,
        room_id: RoomId,
        player_name: impl Into<String>,
        password: Option<String>,
    ) -> Result<RoomId, RoomError> {
        let player_name = player_name.into();
        self.apply(
            player_id,
            RoomOp::Join {
                room_id,
                player_name,
                password,
            },
        )
        .await
    }

    pub async fn leave_room(&self, player_id: PlayerId, room_id: RoomId) -> Result<RoomId, RoomError> {
        self.apply(player_id, RoomOp::Leave { room_id }).await
    }

    pub async fn start_game(&self, player_id: PlayerId, room_id: RoomId) -> Result<RoomId, RoomError> {
        self.apply(player_id, RoomOp::Start { room_id }).await
    }

    pub async fn pass_turn(
        &self,
        player_id: PlayerId,
        room_id: RoomId,
        turn: u64,
    ) -> Result<RoomId, RoomError> {
        self.apply(player_id, RoomOp::Pass { room_id, turn }).await
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomListEntry>, RoomError> {
        self.request(|reply| EngineCommand::ListRooms { reply }).await
    }

    pub async fn room_view(&self, room_id: RoomId) -> Result<Option<RoomView>, RoomError> {
        self.request(|reply| EngineCommand::GetRoom { room_id, reply })
            .await
    }

    pub async fn room_of(&self, player_id: PlayerId) -> Result<Option<RoomId>, RoomError> {
        self.request(|reply| EngineCommand::RoomOf { player_id, reply })
            .await
    }

    /// Runs the idle sweep now instead of waiting for the interval.
    pub async fn sweep(&self) -> Result<(), RoomError> {
        self.request(|reply| EngineCommand::Sweep { reply }).await
    }

    /// Waits until every snapshot queued so far has reached the gateway.
    pub async fn flush(&self) -> Result<(), RoomError> {
        self.request(|reply| EngineCommand::Flush { reply }).await
    }

    /// Stops the engine task. Pending persistence jobs still drain.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Engine<R: GameRules> {
    store: RoomStore<R>,
    timers: TurnTimers<RoomId>,
    broadcaster: Broadcaster,
    mirror: PersistenceMirror,
    clock: Clock,
    sweep_interval: Duration,
    receiver: mpsc::Receiver<EngineCommand>,
}

impl<R: GameRules> Engine<R> {
    async fn run(mut self) {
        tracing::info!(rooms = self.store.len(), "room engine started");

        let mut sweep = time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                expiry = self.timers.next_expiry() => {
                    let now = self.clock.now_ms();
                    let effects = self.store.expire_turn(expiry.key, expiry.turn, now);
                    self.apply(effects);
                }
                _ = sweep.tick() => self.sweep(),
            }
        }

        tracing::info!("room engine stopped");
    }

    /// Handles one command. Returns `false` to stop the loop.
    fn handle(&mut self, cmd: EngineCommand) -> bool {
        let now = self.clock.now_ms();
        match cmd {
            EngineCommand::Connect {
                player_id,
                last_room,
                sender,
                reply,
            } => {
                self.broadcaster.register(player_id, sender);
                let effects = self.store.connect(player_id, last_room, now);
                self.apply(effects);
                let _ = reply.send(());
            }
            EngineCommand::Disconnect {
                player_id,
                last_room,
                reply,
            } => {
                self.broadcaster.unregister(player_id);
                let effects = self.store.disconnect(player_id, last_room, now);
                self.apply(effects);
                let _ = reply.send(());
            }
            EngineCommand::Apply {
                player_id,
                op,
                reply,
            } => {
                let op_name = op.name();
                let result = self.run_op(player_id, op, now);
                let result = match result {
                    Ok((room_id, effects)) => {
                        self.apply(effects);
                        Ok(room_id)
                    }
                    Err(err) => {
                        tracing::debug!(%player_id, op = op_name, error = %err, "room op rejected");
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            EngineCommand::ListRooms { reply } => {
                let _ = reply.send(self.store.list_rooms());
            }
            EngineCommand::GetRoom { room_id, reply } => {
                let _ = reply.send(self.store.view(room_id));
            }
            EngineCommand::RoomOf { player_id, reply } => {
                let _ = reply.send(self.store.room_of(player_id));
            }
            EngineCommand::Sweep { reply } => {
                self.sweep();
                let _ = reply.send(());
            }
            EngineCommand::Flush { reply } => {
                self.mirror.submit(PersistJob::Flush(reply));
            }
            EngineCommand::Shutdown => {
                tracing::info!("room engine shutting down");
                return false;
            }
        }
        true
    }

    fn run_op(
        &mut self,
        player: PlayerId,
        op: RoomOp,
        now: u64,
    ) -> Result<(RoomId, Effects), RoomError> {
        let store = &mut self.store;
        match op {
            RoomOp::Create {
                settings,
                creator_name,
            } => store.create_room(player, settings, &creator_name, now),
            RoomOp::Join {
                room_id,
                player_name,
                password,
            } => store
                .join_room(player, room_id, &player_name, password.as_deref(), now)
                .map(|e| (room_id, e)),
            RoomOp::Leave { room_id } => store
                .leave_room(player, room_id, now)
                .map(|e| (room_id, e)),
            RoomOp::SelectRole { room_id, role_id } => store
                .select_role(player, room_id, role_id, now)
                .map(|e| (room_id, e)),
            RoomOp::ConfirmRole { room_id, confirmed } => store
                .confirm_role(player, room_id, confirmed, now)
                .map(|e| (room_id, e)),
            RoomOp::SelectGoal { room_id, goal_id } => store
                .select_goal(player, room_id, goal_id, now)
                .map(|e| (room_id, e)),
            RoomOp::SetReady { room_id } => store
                .set_ready(player, room_id, now)
                .map(|e| (room_id, e)),
            RoomOp::Start { room_id } => store
                .start_game(player, room_id, now)
                .map(|e| (room_id, e)),
            RoomOp::Roll { room_id } => store
                .roll_for_turn(player, room_id, now)
                .map(|e| (room_id, e)),
            RoomOp::Pass { room_id, turn } => store
                .pass_turn(player, room_id, turn, now)
                .map(|e| (room_id, e)),
        }
    }

    fn sweep(&mut self) {
        let effects = self.store.sweep(self.clock.now_ms());
        let timers = self.timers.stats();
        tracing::debug!(
            evicted = effects.removed.len(),
            rooms = self.store.len(),
            armed = self.timers.len(),
            scheduled = timers.scheduled,
            replaced = timers.replaced,
            cancelled = timers.cancelled,
            fired = timers.fired,
            "sweep done"
        );
        self.apply(effects);
    }

    /// Carries out what a store operation asked for: deliver, persist,
    /// re-arm timers, record history.
    fn apply(&mut self, effects: Effects) {
        let Effects {
            outbound,
            changed,
            removed,
            finished,
        } = effects;

        for out in outbound {
            self.broadcaster.deliver(out);
        }
        for room_id in changed {
            if let Some(room) = self.store.get(room_id) {
                sync_timer(&mut self.timers, &self.clock, room);
                self.mirror.submit(PersistJob::Save(Box::new(room.clone())));
            }
        }
        for room_id in removed {
            self.timers.cancel(room_id);
            self.mirror.submit(PersistJob::Remove(room_id));
        }
        for summary in finished {
            self.mirror.submit(PersistJob::Record(Box::new(summary)));
        }
    }
}

/// Keeps exactly one timer per playing room, armed for its current turn.
fn sync_timer(timers: &mut TurnTimers<RoomId>, clock: &Clock, room: &Room) {
    match (&room.status, &room.turn) {
        (RoomStatus::Playing, Some(turn)) => {
            let deadline = clock.instant_at(turn.deadline);
            if timers.deadline_of(room.id) != Some((deadline, turn.turn)) {
                timers.schedule(room.id, turn.turn, deadline);
            }
        }
        _ => {
            timers.cancel(room.id);
        }
    }
}

/// Spawns the engine task with the `restored` rooms already loaded and
/// returns a handle to it. New room ids continue above both the restored
/// rooms and `restored.last_room_id`.
pub fn spawn_engine<R, P>(
    config: EngineConfig,
    clock: Clock,
    gateway: Arc<P>,
    restored: RestorePoint,
) -> EngineHandle
where
    R: GameRules,
    P: PersistenceGateway,
{
    let (tx, rx) = mpsc::channel(config.channel_size);

    let mut engine = Engine::<R> {
        store: RoomStore::new(&config),
        timers: TurnTimers::new(),
        broadcaster: Broadcaster::new(),
        mirror: PersistenceMirror::spawn(gateway, config.retry.clone()),
        clock,
        sweep_interval: config.sweep_interval,
        receiver: rx,
    };
    if let Some(last) = restored.last_room_id {
        engine.store.reserve_ids_through(last);
    }
    let effects = engine.store.restore(restored.rooms, clock.now_ms());
    engine.apply(effects);

    tokio::spawn(engine.run());

    EngineHandle { sender: tx }
}
