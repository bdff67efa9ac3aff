//! Unit tests for the client `StateMachine` and event channel routing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pluggable_discovery::client::state::STOP_EVENT_GRACE;
use pluggable_discovery::client::{ClientState, StateMachine};
use pluggable_discovery::models::{Event, EventKind, Port};
use pluggable_discovery::AppError;

const ID: &str = "test:discovery";

fn add(address: &str) -> Event {
    Event::add(Port::new(address, "dummy"), ID)
}

// ── State word ───────────────────────────────────────────────────────────────

#[test]
fn new_machine_is_dead() {
    let machine = StateMachine::new(ID);
    assert_eq!(machine.state(), ClientState::Dead);
    assert!(!machine.state().is_live());
    assert!(machine.terminal_error().is_none());
}

#[test]
fn happy_path_transitions() {
    let machine = StateMachine::new(ID);
    machine.spawned();
    assert_eq!(machine.state(), ClientState::Alive);
    machine.handshake_complete();
    assert_eq!(machine.state(), ClientState::Idling);
    machine.started();
    assert_eq!(machine.state(), ClientState::Running);
    machine.stopped();
    assert_eq!(machine.state(), ClientState::Idling);
    machine.syncing();
    assert_eq!(machine.state(), ClientState::Syncing);
    machine.killed();
    assert_eq!(machine.state(), ClientState::Dead);
}

#[test]
fn dead_is_only_left_by_spawning() {
    let machine = StateMachine::new(ID);
    machine.spawned();
    machine.stream_ended(AppError::Transport("eof".into()));
    machine.syncing();
    assert_eq!(machine.state(), ClientState::Dead);
}

#[test]
fn first_terminal_error_wins() {
    let machine = StateMachine::new(ID);
    machine.spawned();
    machine.stream_ended(AppError::Protocol("bad add".into()));
    machine.stream_ended(AppError::Transport("eof".into()));
    assert_eq!(
        machine.terminal_error(),
        Some(AppError::Protocol("bad add".into()))
    );
}

#[test]
fn spawning_clears_the_terminal_error() {
    let machine = StateMachine::new(ID);
    machine.stream_ended(AppError::Transport("eof".into()));
    machine.spawned();
    assert!(machine.terminal_error().is_none());
    assert_eq!(machine.state(), ClientState::Alive);
}

#[test]
fn state_serializes_snake_case() {
    let json = serde_json::to_string(&ClientState::Syncing).expect("serialize");
    assert_eq!(json, "\"syncing\"");
    assert_eq!(ClientState::Idling.to_string(), "idling");
}

// ── Event routing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_without_a_channel_are_dropped() {
    let machine = StateMachine::new(ID);
    machine.deliver(add("1")).await;

    let (tx, mut rx) = mpsc::channel(4);
    machine.stage_events(tx).await;
    assert!(machine.activate_staged_events().await);
    machine.deliver(add("2")).await;

    let event = rx.recv().await.expect("event");
    assert_eq!(event.port.expect("port").address, "2");
}

#[tokio::test]
async fn staged_channel_receives_nothing_until_activated() {
    let machine = StateMachine::new(ID);
    let (tx, mut rx) = mpsc::channel(4);
    machine.stage_events(tx).await;

    machine.deliver(add("1")).await;
    assert!(rx.try_recv().is_err(), "staged channel must stay silent");

    machine.activate_staged_events().await;
    machine.deliver(add("2")).await;
    assert_eq!(rx.recv().await.expect("event").port.expect("port").address, "2");
}

#[tokio::test]
async fn activation_retires_previous_channel_with_stop() {
    let machine = StateMachine::new(ID);
    let (first_tx, mut first) = mpsc::channel(4);
    let (second_tx, mut second) = mpsc::channel(4);

    machine.stage_events(first_tx).await;
    machine.activate_staged_events().await;
    machine.deliver(add("1")).await;

    machine.stage_events(second_tx).await;
    machine.activate_staged_events().await;
    machine.deliver(add("2")).await;

    assert_eq!(first.recv().await.expect("add").kind, EventKind::Add);
    let stop = first.recv().await.expect("stop");
    assert_eq!(stop, Event::stop(ID));
    assert!(first.recv().await.is_none(), "retired channel must close");

    assert_eq!(second.recv().await.expect("add").kind, EventKind::Add);
}

#[tokio::test]
async fn activation_without_staged_channel_keeps_current() {
    let machine = StateMachine::new(ID);
    let (tx, mut rx) = mpsc::channel(4);
    machine.stage_events(tx).await;
    machine.activate_staged_events().await;

    assert!(!machine.activate_staged_events().await);
    machine.deliver(add("1")).await;
    assert_eq!(rx.recv().await.expect("event").kind, EventKind::Add);
}

#[tokio::test]
async fn unstaged_channel_closes_without_events() {
    let machine = StateMachine::new(ID);
    let (tx, mut rx) = mpsc::channel(4);
    machine.stage_events(tx).await;
    machine.unstage_events().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn close_events_sends_exactly_one_stop() {
    let machine = StateMachine::new(ID);
    let (tx, mut rx) = mpsc::channel(4);
    machine.stage_events(tx).await;
    machine.activate_staged_events().await;

    machine.close_events().await;
    machine.close_events().await;

    assert_eq!(rx.recv().await.expect("stop").kind, EventKind::Stop);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn delivery_to_dropped_receiver_is_ignored() {
    let machine = StateMachine::new(ID);
    let (tx, rx) = mpsc::channel(4);
    machine.stage_events(tx).await;
    machine.activate_staged_events().await;
    drop(rx);

    machine.deliver(add("1")).await;
    machine.close_events().await;
}

// ── Back-pressure ────────────────────────────────────────────────────────────

async fn machine_with_full_channel() -> (Arc<StateMachine>, mpsc::Receiver<Event>) {
    let machine = Arc::new(StateMachine::new(ID));
    let (tx, rx) = mpsc::channel(1);
    machine.stage_events(tx).await;
    machine.activate_staged_events().await;
    machine.deliver(add("1")).await;
    (machine, rx)
}

#[tokio::test]
async fn close_events_is_not_blocked_by_a_stalled_consumer() {
    let (machine, mut rx) = machine_with_full_channel().await;

    let pending = tokio::spawn({
        let machine = Arc::clone(&machine);
        async move { machine.deliver(add("2")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(STOP_EVENT_GRACE * 4, machine.close_events())
        .await
        .expect("close_events must not wait on a full channel");
    tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending delivery must be cut off")
        .expect("delivery task");

    assert_eq!(rx.recv().await.expect("add").port.expect("port").address, "1");
    assert!(rx.recv().await.is_none(), "retired channel must close");
}

#[tokio::test]
async fn draining_consumer_gets_stop_after_pending_delivery_is_cut_off() {
    let (machine, mut rx) = machine_with_full_channel().await;

    let pending = tokio::spawn({
        let machine = Arc::clone(&machine);
        async move { machine.deliver(add("2")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let closing = tokio::spawn({
        let machine = Arc::clone(&machine);
        async move { machine.close_events().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(rx.recv().await.expect("add").port.expect("port").address, "1");
    assert_eq!(rx.recv().await.expect("stop"), Event::stop(ID));
    assert!(rx.recv().await.is_none());

    closing.await.expect("close task");
    pending.await.expect("delivery task");
}
