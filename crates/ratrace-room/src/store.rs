//! The room registry and every state transition on it.
//!
//! `RoomStore` is synchronous and owns all rooms plus the
//! player → room index. Each operation either fails without touching
//! anything, or applies its change and returns the [`Effects`] the caller
//! must carry out: notifications, snapshots to write, timers to re-arm.
//! The engine task is the only caller in production; tests drive the
//! store directly with explicit timestamps.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use ratrace_protocol::{
    GameResult, GoalId, PlayerId, RoleId, RoomId, RoomListEntry, RoomSettings, RoomStatus,
    RoomView, ServerMessage, Timestamp, TurnOrderPolicy,
};

use crate::{
    EngineConfig, EvictionPolicy, GameRules, GameSummary, Outbound, Player, Room, RoomError,
    RoomLimits, hash_password, verify_password,
};

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// What an operation asks its caller to do once it has succeeded.
#[derive(Debug, Default)]
pub struct Effects {
    /// Notifications, in the order they must be delivered.
    pub outbound: Vec<Outbound>,
    /// Rooms whose state changed and must be persisted and re-timed.
    pub changed: BTreeSet<RoomId>,
    /// Rooms that no longer exist.
    pub removed: Vec<RoomId>,
    /// Games that ended.
    pub finished: Vec<GameSummary>,
}

impl Effects {
    fn roster_of(room: &Room) -> Self {
        let mut effects = Self::default();
        effects.roster(room);
        effects
    }

    fn to_room(&mut self, room: &Room, message: ServerMessage) {
        self.outbound.push(Outbound {
            recipients: room.audience(),
            message,
        });
    }

    fn to_player(&mut self, player: PlayerId, message: ServerMessage) {
        self.outbound.push(Outbound {
            recipients: vec![player],
            message,
        });
    }

    /// Broadcasts the current roster and marks the room changed.
    fn roster(&mut self, room: &Room) {
        self.to_room(
            room,
            ServerMessage::RoomRosterUpdated { room: room.view() },
        );
        self.changed.insert(room.id);
    }

    fn merge(&mut self, other: Effects) {
        self.outbound.extend(other.outbound);
        self.changed.extend(other.changed);
        self.removed.extend(other.removed);
        self.finished.extend(other.finished);
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
            && self.changed.is_empty()
            && self.removed.is_empty()
            && self.finished.is_empty()
    }

    /// Every message addressed to `player`, in delivery order.
    pub fn messages_for(&self, player: PlayerId) -> Vec<&ServerMessage> {
        self.outbound
            .iter()
            .filter(|o| o.recipients.contains(&player))
            .map(|o| &o.message)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RoomStore
// ---------------------------------------------------------------------------

/// All rooms, keyed by id, plus which room each player is in.
pub struct RoomStore<R> {
    rooms: BTreeMap<RoomId, Room>,
    /// A player appears here while they hold a seat they can act from or
    /// rejoin. Finished rooms hold nobody.
    memberships: HashMap<PlayerId, RoomId>,
    next_id: u64,
    limits: RoomLimits,
    eviction: EvictionPolicy,
    rng: StdRng,
    _rules: PhantomData<fn() -> R>,
}

fn display_name(name: &str, player: PlayerId) -> String {
    let name = name.trim();
    if name.is_empty() {
        player.to_string()
    } else {
        name.to_string()
    }
}

impl<R: GameRules> RoomStore<R> {
    pub fn new(config: &EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rooms: BTreeMap::new(),
            memberships: HashMap::new(),
            next_id: 1,
            limits: config.limits.clone(),
            eviction: config.eviction.clone(),
            rng,
            _rules: PhantomData,
        }
    }

    // -- queries ----------------------------------------------------------

    pub fn get(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn view(&self, room_id: RoomId) -> Option<RoomView> {
        self.rooms.get(&room_id).map(Room::view)
    }

    /// Joinable rooms, oldest first.
    pub fn list_rooms(&self) -> Vec<RoomListEntry> {
        self.rooms
            .values()
            .filter(|r| r.status.is_joinable())
            .map(Room::list_entry)
            .collect()
    }

    /// The room `player` currently holds a seat in.
    pub fn room_of(&self, player: PlayerId) -> Option<RoomId> {
        self.memberships.get(&player).copied()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    // -- membership -------------------------------------------------------

    /// Opens a waiting room with `player` as its creator and first seat.
    ///
    /// # Errors
    /// [`RoomError::AlreadyInRoom`] if `player` sits elsewhere,
    /// [`RoomError::InvalidConfig`] if the settings break the limits.
    pub fn create_room(
        &mut self,
        player: PlayerId,
        settings: RoomSettings,
        creator_name: &str,
        now: Timestamp,
    ) -> Result<(RoomId, Effects), RoomError> {
        if let Some(current) = self.room_of(player) {
            return Err(RoomError::AlreadyInRoom(player, current));
        }
        self.limits.validate(&settings)?;
        let password_hash = settings.password.as_deref().map(hash_password).transpose()?;

        let id = RoomId(self.next_id);
        self.next_id += 1;
        let creator = Player::new(player, display_name(creator_name, player), now);
        let room = Room::new(id, settings, creator, password_hash, now);
        tracing::info!(
            room_id = %id,
            creator = %player,
            mode = %room.role_selection_mode,
            max_players = room.max_players,
            "room created"
        );

        let effects = Effects::roster_of(&room);
        self.memberships.insert(player, id);
        self.rooms.insert(id, room);
        Ok((id, effects))
    }

    /// Seats `player` in a waiting room, or brings an existing member back
    /// after a leave or a dropped connection.
    pub fn join_room(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        player_name: &str,
        password: Option<&str>,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        let indexed = self.room_of(player);
        self.with_room(room_id, |store, room| {
            if room.is_member(player) {
                return store.rejoin(room, player, indexed, now);
            }
            if let Some(current) = indexed {
                return Err(RoomError::AlreadyInRoom(player, current));
            }
            if !room.status.is_joinable() {
                return Err(RoomError::GameAlreadyStarted(room.id));
            }
            if room.is_full() {
                return Err(RoomError::RoomFull(room.id));
            }
            if let Some(hash) = &room.password_hash {
                if !password.is_some_and(|p| verify_password(p, hash)) {
                    return Err(RoomError::InvalidPassword(room.id));
                }
            }

            room.players
                .push(Player::new(player, display_name(player_name, player), now));
            room.touch(now);
            store.memberships.insert(player, room.id);
            tracing::info!(
                room_id = %room.id,
                %player,
                players = room.players.len(),
                "player joined"
            );
            Ok(Effects::roster_of(room))
        })
    }

    fn rejoin(
        &mut self,
        room: &mut Room,
        player: PlayerId,
        indexed: Option<RoomId>,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        if room.status == RoomStatus::Finished {
            return Err(RoomError::GameNotRunning(room.id));
        }
        if let Some(current) = indexed.filter(|&r| r != room.id) {
            return Err(RoomError::AlreadyInRoom(player, current));
        }
        let room_id = room.id;
        let seat = room
            .player_mut(player)
            .ok_or(RoomError::NotInRoom(player, room_id))?;
        if seat.is_active && seat.connected {
            return Err(RoomError::AlreadyInRoom(player, room_id));
        }

        seat.is_active = true;
        seat.connected = true;
        room.touch(now);
        self.memberships.insert(player, room_id);
        tracing::info!(%room_id, %player, status = %room.status, "player rejoined");
        Ok(Effects::roster_of(room))
    }

    /// Gives up `player`'s seat. In a waiting room the seat disappears; in
    /// a running game it stays in the turn order but is skipped.
    pub fn leave_room(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        let indexed = self.room_of(player);
        self.with_room(room_id, |store, room| {
            let active = match room.player(player) {
                Some(p) if p.is_active => true,
                // dropped mid-game: still holds the seat, just not acting
                Some(_) if indexed == Some(room.id) => false,
                _ => return Err(RoomError::NotInRoom(player, room.id)),
            };

            let mut effects = Effects::default();
            effects.to_player(player, ServerMessage::RoomLeft { room_id: room.id });
            store.release_membership(player, room.id);
            if active {
                store.depart(room, player, now, &mut effects);
            }
            tracing::info!(room_id = %room.id, %player, "player left");
            Ok(effects)
        })
    }

    /// A connection for `player` came up. Marks them connected wherever
    /// they hold a seat and sends them the room's current state.
    pub fn connect(
        &mut self,
        player: PlayerId,
        last_room: Option<RoomId>,
        now: Timestamp,
    ) -> Effects {
        let Some(room_id) = self.room_of(player).or(last_room) else {
            return Effects::default();
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Effects::default();
        };
        let Some(seat) = room.player_mut(player) else {
            return Effects::default();
        };
        seat.connected = true;
        let active = seat.is_active;
        room.touch(now);

        let mut effects = Effects::roster_of(room);
        if !active {
            // not in the audience, but should still see where things stand
            effects.to_player(player, ServerMessage::RoomRosterUpdated { room: room.view() });
        }
        tracing::debug!(%room_id, %player, active, "player reconnected to room");
        effects
    }

    /// `player`'s connection went away.
    ///
    /// Waiting: the seat is given up as if they had left. Playing: the
    /// player turns inactive, their turn passes, and the seat is kept for
    /// a rejoin. Finished: only the connected flag changes.
    pub fn disconnect(
        &mut self,
        player: PlayerId,
        last_room: Option<RoomId>,
        now: Timestamp,
    ) -> Effects {
        let Some(room_id) = self.room_of(player).or(last_room) else {
            return Effects::default();
        };
        self.with_room(room_id, |store, room| {
            let mut effects = Effects::default();
            let Some(seat) = room.player_mut(player) else {
                return Ok(effects);
            };
            let was_active = seat.is_active;
            seat.connected = false;

            match room.status {
                RoomStatus::Waiting => {
                    store.release_membership(player, room.id);
                    store.depart(room, player, now, &mut effects);
                }
                RoomStatus::Playing if was_active => {
                    store.depart(room, player, now, &mut effects);
                }
                _ => effects.roster(room),
            }
            tracing::info!(room_id = %room.id, %player, status = %room.status, "player disconnected");
            Ok(effects)
        })
        .unwrap_or_default()
    }

    // -- negotiation ------------------------------------------------------

    pub fn select_role(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        role: RoleId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |_, room| {
            room.select_role(player, role)?;
            room.touch(now);
            Ok(Effects::roster_of(room))
        })
    }

    /// Confirms or releases the selected role. A fresh confirmation runs
    /// the rules' setup hook and stores its result on the player.
    pub fn confirm_role(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        confirmed: bool,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |_, room| {
            if let Some(role) = room.confirm_role(player, confirmed)? {
                let setup = R::on_role_confirmed(room, player, &role);
                if let Some(p) = room.player_mut(player) {
                    p.setup = setup;
                }
                tracing::debug!(room_id = %room.id, %player, %role, "role confirmed");
            }
            room.touch(now);
            Ok(Effects::roster_of(room))
        })
    }

    pub fn select_goal(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        goal: GoalId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |_, room| {
            room.select_goal(player, goal)?;
            room.touch(now);
            Ok(Effects::roster_of(room))
        })
    }

    pub fn set_ready(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |_, room| {
            room.set_ready(player)?;
            room.touch(now);
            Ok(Effects::roster_of(room))
        })
    }

    // -- game flow --------------------------------------------------------

    /// Starts the game: fixes the turn order, hands out roles outside
    /// `choice` mode, and opens turn 1.
    pub fn start_game(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |store, room| {
            room.ensure_member(player)?;
            if room.creator != player {
                return Err(RoomError::NotRoomCreator(player));
            }
            room.ensure_waiting()?;
            let have = room.active_count();
            let need = store.limits.min_players_to_start;
            if have < need {
                return Err(RoomError::NotEnoughPlayers { have, need });
            }
            let blockers = room.not_ready();
            if !blockers.is_empty() {
                return Err(RoomError::PlayersNotReady(blockers));
            }

            let mut rng = match room.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(&mut store.rng),
            };
            let mut order = room.audience();
            if room.turn_order_policy == TurnOrderPolicy::Shuffled {
                order.shuffle(&mut rng);
            }
            for (seat, role) in room.assign_roles(&order, &mut rng) {
                let setup = R::on_role_confirmed(room, seat, &role);
                if let Some(p) = room.player_mut(seat) {
                    p.setup = setup;
                }
            }
            room.begin_turns(order, now);

            let mut effects = Effects::default();
            if let Some(turn) = &room.turn {
                effects.to_room(
                    room,
                    ServerMessage::GameStarted {
                        room_id: room.id,
                        turn_order: turn.order.clone(),
                        active_player: turn.active_player(),
                        turn: turn.turn,
                        deadline: turn.deadline,
                    },
                );
                tracing::info!(
                    room_id = %room.id,
                    players = turn.order.len(),
                    first = %turn.active_player(),
                    "game started"
                );
            }
            effects.roster(room);
            Ok(effects)
        })
    }

    /// Resolves a turn action by the active player through the rules.
    /// One action settles the turn; it stays open until passed or timed
    /// out, and further rolls fail with `TurnAlreadySettled`.
    pub fn roll_for_turn(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |store, room| {
            room.ensure_member(player)?;
            let active = room
                .active_player()
                .ok_or(RoomError::GameNotRunning(room.id))?;
            if active != player {
                return Err(RoomError::NotYourTurn { player, active });
            }

            if let Some(settled) = room.turn.as_ref().filter(|t| t.is_settled()) {
                return Err(RoomError::TurnAlreadySettled { turn: settled.turn });
            }

            let outcome = R::on_turn_action(room, player, &mut store.rng);
            let turn = match room.turn.as_mut() {
                Some(turn) => {
                    turn.actions += 1;
                    turn.turn
                }
                None => return Err(RoomError::GameNotRunning(room.id)),
            };
            room.touch(now);

            let mut effects = Effects::default();
            effects.to_room(
                room,
                ServerMessage::TurnActed {
                    room_id: room.id,
                    player_id: player,
                    turn,
                    outcome,
                },
            );
            effects.changed.insert(room.id);
            Ok(effects)
        })
    }

    /// Ends turn `turn` early.
    ///
    /// Only the player who held `turn` may pass it. A pass quoting an older
    /// turn is ignored, since it lost a race with a timeout or an earlier
    /// pass; if that turn belonged to someone else it is `NotYourTurn`.
    pub fn pass_turn(
        &mut self,
        player: PlayerId,
        room_id: RoomId,
        turn: u64,
        now: Timestamp,
    ) -> Result<Effects, RoomError> {
        self.with_room(room_id, |store, room| {
            room.ensure_member(player)?;
            let state = match (&room.status, &room.turn) {
                (RoomStatus::Playing, Some(state)) => state,
                _ => return Err(RoomError::GameNotRunning(room.id)),
            };
            if let Some(owner) = state.owner_of(turn).filter(|&o| o != player) {
                return Err(RoomError::NotYourTurn {
                    player,
                    active: owner,
                });
            }
            if state.turn != turn {
                let current = state.turn;
                tracing::debug!(room_id = %room.id, %player, turn, current, "stale pass ignored");
                return Ok(Effects::default());
            }

            let mut effects = Effects::default();
            store.advance(room, now, &mut effects);
            Ok(effects)
        })
    }

    /// Turn `turn` of `room_id` ran out of time. Does nothing if the room
    /// has moved past that turn.
    ///
    /// A timed-out player who is not connected is treated as gone: they
    /// turn inactive before the turn moves on. This only happens to seats
    /// restored after a restart whose owners never came back.
    pub fn expire_turn(&mut self, room_id: RoomId, turn: u64, now: Timestamp) -> Effects {
        self.with_room(room_id, |store, room| {
            let mut effects = Effects::default();
            if room.current_turn() != Some(turn) {
                tracing::trace!(%room_id, turn, "expired turn already over");
                return Ok(effects);
            }
            let Some(timed_out) = room.active_player() else {
                return Ok(effects);
            };
            tracing::info!(%room_id, turn, player = %timed_out, "turn timed out");

            let absent = room.player(timed_out).is_some_and(|p| !p.connected);
            if absent {
                if let Some(p) = room.player_mut(timed_out) {
                    p.is_active = false;
                }
                store.depart(room, timed_out, now, &mut effects);
            } else {
                store.advance(room, now, &mut effects);
            }
            Ok(effects)
        })
        .unwrap_or_default()
    }

    // -- maintenance ------------------------------------------------------

    /// Expires overdue turns, then evicts idle rooms.
    pub fn sweep(&mut self, now: Timestamp) -> Effects {
        let mut effects = Effects::default();

        let overdue: Vec<(RoomId, u64)> = self
            .rooms
            .values()
            .filter(|r| r.deadline_passed(now))
            .filter_map(|r| r.current_turn().map(|turn| (r.id, turn)))
            .collect();
        for (room_id, turn) in overdue {
            effects.merge(self.expire_turn(room_id, turn, now));
        }

        let doomed: Vec<RoomId> = self
            .rooms
            .values()
            .filter(|r| r.should_evict(now, &self.eviction))
            .map(|r| r.id)
            .collect();
        for room_id in doomed {
            let Some(room) = self.rooms.remove(&room_id) else {
                continue;
            };
            effects.to_room(&room, ServerMessage::RoomRemoved { room_id });
            self.memberships.retain(|_, r| *r != room_id);
            effects.changed.remove(&room_id);
            effects.removed.push(room_id);
            tracing::info!(%room_id, status = %room.status, "idle room evicted");
        }

        effects
    }

    /// Never hands out `last` or any id below it. Ids of finished rooms
    /// stay taken after a restart even though those rooms are not restored.
    pub fn reserve_ids_through(&mut self, last: RoomId) {
        self.next_id = self.next_id.max(last.0 + 1);
    }

    /// Loads rooms saved before a restart. Nobody is connected yet, and a
    /// running turn gets a fresh deadline.
    pub fn restore(&mut self, rooms: Vec<Room>, now: Timestamp) -> Effects {
        let mut effects = Effects::default();
        for mut room in rooms {
            for p in &mut room.players {
                p.connected = false;
            }
            if room.status == RoomStatus::Playing {
                room.reset_deadline(now);
            }
            if room.status != RoomStatus::Finished {
                for p in room.active_players() {
                    self.memberships.insert(p.id, room.id);
                }
            }
            self.next_id = self.next_id.max(room.id.0 + 1);
            effects.changed.insert(room.id);
            self.rooms.insert(room.id, room);
        }
        tracing::info!(rooms = self.rooms.len(), "rooms restored");
        effects
    }

    // -- internals --------------------------------------------------------

    /// Runs `f` with `room_id` lifted out of the map, so `f` can mutate
    /// the room and the rest of the store at once.
    fn with_room<T>(
        &mut self,
        room_id: RoomId,
        f: impl FnOnce(&mut Self, &mut Room) -> Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        let mut room = self
            .rooms
            .remove(&room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        let result = f(self, &mut room);
        self.rooms.insert(room_id, room);
        result
    }

    fn release_membership(&mut self, player: PlayerId, room_id: RoomId) {
        if self.memberships.get(&player) == Some(&room_id) {
            self.memberships.remove(&player);
        }
    }

    /// An active player stops acting in `room`.
    fn depart(&mut self, room: &mut Room, player: PlayerId, now: Timestamp, effects: &mut Effects) {
        match room.status {
            RoomStatus::Waiting => {
                room.remove_player(player);
            }
            RoomStatus::Playing => {
                if let Some(p) = room.player_mut(player) {
                    p.is_active = false;
                }
                if room.active_count() == 0 {
                    let rounds = room.turn.as_ref().map_or(0, |t| t.round);
                    self.finish(room, GameResult::abandoned(rounds), now, effects);
                    return;
                }
                if room.active_player() == Some(player) {
                    self.advance(room, now, effects);
                }
            }
            RoomStatus::Finished => {
                if let Some(p) = room.player_mut(player) {
                    p.is_active = false;
                }
            }
        }
        room.touch(now);
        effects.roster(room);
    }

    fn advance(&mut self, room: &mut Room, now: Timestamp, effects: &mut Effects) {
        let step = room.advance_turn(now);
        let Some(next) = step.next else {
            let rounds = room.turn.as_ref().map_or(0, |t| t.round);
            self.finish(room, GameResult::abandoned(rounds), now, effects);
            return;
        };
        if step.cycle_closed {
            if let Some(result) = R::is_finished(room) {
                self.finish(room, result, now, effects);
                return;
            }
        }

        if let Some(turn) = &room.turn {
            effects.to_room(
                room,
                ServerMessage::TurnAdvanced {
                    room_id: room.id,
                    active_player: next,
                    turn: turn.turn,
                    round: turn.round,
                    deadline: turn.deadline,
                },
            );
            tracing::debug!(room_id = %room.id, player = %next, turn = turn.turn, round = turn.round, "turn advanced");
        }
        effects.changed.insert(room.id);
    }

    fn finish(&mut self, room: &mut Room, result: GameResult, now: Timestamp, effects: &mut Effects) {
        room.status = RoomStatus::Finished;
        room.result = Some(result.clone());
        room.touch(now);
        for p in &room.players {
            self.release_membership(p.id, room.id);
        }
        tracing::info!(
            room_id = %room.id,
            winner = ?result.winner,
            reason = %result.reason,
            rounds = result.rounds,
            "game finished"
        );

        effects.to_room(
            room,
            ServerMessage::GameFinished {
                room_id: room.id,
                result: result.clone(),
            },
        );
        effects.finished.push(GameSummary::of(room, result, now));
        effects.roster(room);
    }
}
