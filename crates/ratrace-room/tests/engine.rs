//! Integration tests for the engine task: timers, delivery, persistence.
//!
//! All tests run on paused Tokio time. The engine clock is anchored at
//! `T0`, so deadlines in notifications are exact.

use std::sync::Arc;
use std::time::Duration;

use ratrace_clock::Clock;
use ratrace_protocol::{
    GoalId, PlayerId, RoleId, RoleSelectionMode, RoomId, RoomSettings, RoomStatus, ServerMessage,
    TurnOrderPolicy,
};
use ratrace_room::{
    EngineConfig, EngineHandle, InMemoryGateway, OpenTable, PersistenceGateway, RestorePoint,
    RoomError, RoomOp, spawn_engine,
};
use tokio::sync::mpsc;
use tokio::time;

const T0: u64 = 1_700_000_000_000;
const P1: PlayerId = PlayerId(1);
const P2: PlayerId = PlayerId(2);
const P3: PlayerId = PlayerId(3);

type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

// =========================================================================
// Helpers
// =========================================================================

fn settings() -> RoomSettings {
    RoomSettings {
        name: "night shift".into(),
        max_players: 2,
        turn_duration_secs: 30,
        password: None,
        role_selection_mode: RoleSelectionMode::Choice,
        available_roles: vec![RoleId::new("medic"), RoleId::new("scout")],
        available_goals: Vec::new(),
        turn_order: TurnOrderPolicy::Insertion,
        seed: None,
    }
}

fn engine(gateway: Arc<InMemoryGateway>) -> EngineHandle {
    let config = EngineConfig {
        seed: Some(3),
        ..EngineConfig::default()
    };
    spawn_engine::<OpenTable, _>(config, Clock::starting_at(T0), gateway, RestorePoint::default())
}

async fn connect(engine: &EngineHandle, player: PlayerId) -> Inbox {
    let (tx, rx) = mpsc::unbounded_channel();
    engine.connect(player, None, tx).await.unwrap();
    rx
}

/// Waits for the first message matching `pred`, skipping the rest.
async fn expect(inbox: &mut Inbox, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
    loop {
        let msg = time::timeout(Duration::from_secs(600), inbox.recv())
            .await
            .expect("no matching message in time")
            .expect("inbox closed");
        if pred(&msg) {
            return msg;
        }
    }
}

fn drain(inbox: &mut Inbox) {
    while inbox.try_recv().is_ok() {}
}

async fn negotiate(engine: &EngineHandle, player: PlayerId, room_id: RoomId, role: &str) {
    for op in [
        RoomOp::SelectRole {
            room_id,
            role_id: RoleId::new(role),
        },
        RoomOp::ConfirmRole {
            room_id,
            confirmed: true,
        },
        RoomOp::SelectGoal {
            room_id,
            goal_id: GoalId::new("survive"),
        },
        RoomOp::SetReady { room_id },
    ] {
        engine.apply(player, op).await.unwrap();
    }
}

struct Table {
    engine: EngineHandle,
    room_id: RoomId,
    p1: Inbox,
    p2: Inbox,
}

/// Two connected players in a started room, inboxes drained.
async fn started_table(gateway: Arc<InMemoryGateway>) -> Table {
    let engine = engine(gateway);
    let mut p1 = connect(&engine, P1).await;
    let mut p2 = connect(&engine, P2).await;

    let room_id = engine.create_room(P1, settings(), "ann").await.unwrap();
    engine.join_room(P2, room_id, "bo", None).await.unwrap();
    negotiate(&engine, P1, room_id, "medic").await;
    negotiate(&engine, P2, room_id, "scout").await;
    engine.start_game(P1, room_id).await.unwrap();

    expect(&mut p1, |m| matches!(m, ServerMessage::GameStarted { .. })).await;
    expect(&mut p2, |m| matches!(m, ServerMessage::GameStarted { .. })).await;
    drain(&mut p1);
    drain(&mut p2);

    Table {
        engine,
        room_id,
        p1,
        p2,
    }
}

// =========================================================================
// Turn timers
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_turn_timeout_advances_turn_and_notifies_all() {
    let mut table = started_table(Arc::new(InMemoryGateway::new())).await;

    time::sleep(Duration::from_secs(29)).await;
    assert!(table.p2.try_recv().is_err(), "nothing before the deadline");

    let msg = expect(&mut table.p2, |m| matches!(m, ServerMessage::TurnAdvanced { .. })).await;

    match msg {
        ServerMessage::TurnAdvanced {
            active_player,
            turn,
            deadline,
            ..
        } => {
            assert_eq!(active_player, P2);
            assert_eq!(turn, 2);
            assert_eq!(deadline, T0 + 60_000);
        }
        other => panic!("expected TurnAdvanced, got {other:?}"),
    }
    expect(&mut table.p1, |m| matches!(m, ServerMessage::TurnAdvanced { turn: 2, .. })).await;
}

#[tokio::test(start_paused = true)]
async fn test_unattended_turns_cycle_through_active_seats_only() {
    let engine = engine(Arc::new(InMemoryGateway::new()));
    let mut p1 = connect(&engine, P1).await;
    let _p2 = connect(&engine, P2).await;
    let _p3 = connect(&engine, P3).await;

    let mut three = settings();
    three.max_players = 3;
    three.available_roles.push(RoleId::new("pilot"));
    let room_id = engine.create_room(P1, three, "ann").await.unwrap();
    engine.join_room(P2, room_id, "bo", None).await.unwrap();
    engine.join_room(P3, room_id, "cy", None).await.unwrap();
    negotiate(&engine, P1, room_id, "medic").await;
    negotiate(&engine, P2, room_id, "scout").await;
    negotiate(&engine, P3, room_id, "pilot").await;
    engine.start_game(P1, room_id).await.unwrap();
    engine.leave_room(P3, room_id).await.unwrap();
    drain(&mut p1);

    let mut seen = Vec::new();
    for _ in 0..4 {
        match expect(&mut p1, |m| matches!(m, ServerMessage::TurnAdvanced { .. })).await {
            ServerMessage::TurnAdvanced {
                active_player,
                turn,
                round,
                deadline,
                ..
            } => seen.push((active_player, turn, round, deadline - T0)),
            other => panic!("expected TurnAdvanced, got {other:?}"),
        }
    }

    assert_eq!(
        seen,
        vec![
            (P2, 2, 1, 60_000),
            (P1, 3, 2, 90_000),
            (P2, 4, 2, 120_000),
            (P1, 5, 3, 150_000),
        ]
    );
    let view = engine.room_view(room_id).await.unwrap().unwrap();
    assert_eq!(view.status, RoomStatus::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_pass_turn_rearms_timer_without_ghost_turn() {
    let mut table = started_table(Arc::new(InMemoryGateway::new())).await;

    time::sleep(Duration::from_secs(10)).await;
    table.engine.pass_turn(P1, table.room_id, 1).await.unwrap();
    drain(&mut table.p1);

    // the first turn's deadline passes without effect
    time::sleep(Duration::from_secs(25)).await;
    let view = table.engine.room_view(table.room_id).await.unwrap().unwrap();
    assert_eq!(view.turn.as_ref().unwrap().turn, 2);
    assert!(table.p1.try_recv().is_err());

    let msg = expect(&mut table.p1, |m| matches!(m, ServerMessage::TurnAdvanced { .. })).await;
    assert!(matches!(msg, ServerMessage::TurnAdvanced { turn: 3, active_player: P1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_stale_pass_after_timeout_changes_nothing() {
    let mut table = started_table(Arc::new(InMemoryGateway::new())).await;
    expect(&mut table.p1, |m| matches!(m, ServerMessage::TurnAdvanced { turn: 2, .. })).await;

    let result = table.engine.pass_turn(P1, table.room_id, 1).await;

    assert_eq!(result, Ok(table.room_id));
    let view = table.engine.room_view(table.room_id).await.unwrap().unwrap();
    assert_eq!(view.turn.unwrap().turn, 2);
}

// =========================================================================
// Delivery and rejection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_op_returns_error_and_broadcasts_nothing() {
    let mut table = started_table(Arc::new(InMemoryGateway::new())).await;

    let err = table
        .engine
        .apply(P2, RoomOp::Roll { room_id: table.room_id })
        .await
        .unwrap_err();

    assert_eq!(err, RoomError::NotYourTurn { player: P2, active: P1 });
    assert!(table.p1.try_recv().is_err());
    assert!(table.p2.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_active_player_passes_turn_to_others() {
    let mut table = started_table(Arc::new(InMemoryGateway::new())).await;

    table.engine.disconnect(P1, Some(table.room_id)).await.unwrap();

    expect(&mut table.p2, |m| {
        matches!(m, ServerMessage::TurnAdvanced { active_player: P2, turn: 2, .. })
    })
    .await;
    let roster = expect(&mut table.p2, |m| matches!(m, ServerMessage::RoomRosterUpdated { .. })).await;
    if let ServerMessage::RoomRosterUpdated { room } = roster {
        let ann = room.players.iter().find(|p| p.player_id == P1).unwrap();
        assert!(!ann.connected);
        assert!(!ann.is_active);
    }
}

#[tokio::test(start_paused = true)]
async fn test_list_rooms_through_handle() {
    let engine = engine(Arc::new(InMemoryGateway::new()));
    let _inbox = connect(&engine, P1).await;
    let room_id = engine.create_room(P1, settings(), "ann").await.unwrap();

    let rooms = engine.list_rooms().await.unwrap();

    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, room_id);
    assert_eq!(engine.room_of(P1).await.unwrap(), Some(room_id));
}

// =========================================================================
// Persistence
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_mirrors_snapshots_and_records_finished_game() {
    let gateway = Arc::new(InMemoryGateway::new());
    let table = started_table(gateway.clone()).await;
    table.engine.flush().await.unwrap();

    let saved = gateway.snapshot(table.room_id).await.unwrap();
    assert_eq!(saved.status, RoomStatus::Playing);

    table.engine.leave_room(P2, table.room_id).await.unwrap();
    table.engine.leave_room(P1, table.room_id).await.unwrap();
    table.engine.flush().await.unwrap();

    let history = gateway.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].room_id, table.room_id);
    assert_eq!(history[0].result.reason, "abandoned");
    assert!(gateway.load_all_active().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_engine_keeps_running_through_storage_outage() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.fail_next(1_000);
    let engine = engine(gateway.clone());
    let _inbox = connect(&engine, P1).await;

    let room_id = engine.create_room(P1, settings(), "ann").await.unwrap();

    assert!(engine.room_view(room_id).await.unwrap().is_some());
    engine.flush().await.unwrap();
    assert!(gateway.snapshot(room_id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restored_room_resumes_turn_timer() {
    let gateway = Arc::new(InMemoryGateway::new());
    let table = started_table(gateway.clone()).await;
    table.engine.flush().await.unwrap();
    table.engine.shutdown().await.unwrap();

    let restored = RestorePoint::load(gateway.as_ref()).await.unwrap();
    let engine = spawn_engine::<OpenTable, _>(
        EngineConfig::default(),
        Clock::starting_at(T0 + 5_000),
        gateway.clone(),
        restored,
    );
    let mut p1 = connect(&engine, P1).await;
    let mut p2 = connect(&engine, P2).await;
    drain(&mut p1);

    let msg = expect(&mut p2, |m| matches!(m, ServerMessage::TurnAdvanced { .. })).await;

    assert!(matches!(
        msg,
        ServerMessage::TurnAdvanced { active_player: P2, turn: 2, deadline, .. } if deadline == T0 + 5_000 + 60_000
    ));
    let new_room = engine.create_room(PlayerId(3), settings(), "cy").await.unwrap();
    assert!(new_room > table.room_id);
}

#[tokio::test(start_paused = true)]
async fn test_restart_numbers_new_rooms_above_finished_game() {
    let gateway = Arc::new(InMemoryGateway::new());
    let table = started_table(gateway.clone()).await;
    table.engine.leave_room(P2, table.room_id).await.unwrap();
    table.engine.leave_room(P1, table.room_id).await.unwrap();
    table.engine.flush().await.unwrap();
    table.engine.shutdown().await.unwrap();

    let restored = RestorePoint::load(gateway.as_ref()).await.unwrap();
    assert!(restored.rooms.is_empty());
    let engine = spawn_engine::<OpenTable, _>(
        EngineConfig::default(),
        Clock::starting_at(T0 + 5_000),
        gateway.clone(),
        restored,
    );
    let _inbox = connect(&engine, P1).await;

    let new_room = engine.create_room(P1, settings(), "ann").await.unwrap();

    assert!(new_room > table.room_id);
    engine.flush().await.unwrap();
    assert_eq!(gateway.history().await[0].room_id, table.room_id);
    assert_eq!(gateway.room_ids().await, vec![new_room]);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_idle_room_and_forgets_snapshot() {
    let gateway = Arc::new(InMemoryGateway::new());
    let engine = engine(gateway.clone());
    let _inbox = connect(&engine, P1).await;
    let room_id = engine.create_room(P1, settings(), "ann").await.unwrap();
    engine.leave_room(P1, room_id).await.unwrap();

    time::sleep(Duration::from_secs(3_601)).await;
    engine.sweep().await.unwrap();
    engine.flush().await.unwrap();

    assert_eq!(engine.room_view(room_id).await.unwrap(), None);
    assert!(gateway.snapshot(room_id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_makes_handle_unavailable() {
    let engine = engine(Arc::new(InMemoryGateway::new()));

    engine.shutdown().await.unwrap();
    time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.list_rooms().await, Err(RoomError::Unavailable));
}
