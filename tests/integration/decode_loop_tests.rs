//! Integration tests for the client decode loop over an in-memory pipe.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pluggable_discovery::client::reader::run_decode_loop;
use pluggable_discovery::client::{ClientState, StateMachine};
use pluggable_discovery::models::message::event_type;
use pluggable_discovery::models::{EventKind, Message};
use pluggable_discovery::AppError;

const ID: &str = "test:pipe";

struct Loop {
    machine: Arc<StateMachine>,
    stdout: DuplexStream,
    replies: mpsc::Receiver<Message>,
    task: JoinHandle<()>,
}

fn spawn_loop() -> Loop {
    let (stdout, loop_side) = tokio::io::duplex(4096);
    let machine = Arc::new(StateMachine::new(ID));
    machine.spawned();
    let (reply_tx, replies) = mpsc::channel(1);
    let task = tokio::spawn(run_decode_loop(
        ID.to_owned(),
        loop_side,
        Arc::clone(&machine),
        reply_tx,
    ));
    Loop {
        machine,
        stdout,
        replies,
        task,
    }
}

async fn write(stdout: &mut DuplexStream, raw: &str) {
    stdout.write_all(raw.as_bytes()).await.expect("write envelope");
}

async fn reply(replies: &mut mpsc::Receiver<Message>) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .expect("reply within deadline")
}

#[tokio::test]
async fn replies_go_to_the_reply_channel() {
    let mut l = spawn_loop();
    write(&mut l.stdout, r#"{"eventType":"start","message":"OK"}"#).await;
    assert_eq!(reply(&mut l.replies).await, Some(Message::ok(event_type::START)));
}

#[tokio::test]
async fn events_bypass_the_reply_channel() {
    let mut l = spawn_loop();
    let (tx, mut events) = mpsc::channel(8);
    l.machine.stage_events(tx).await;

    write(
        &mut l.stdout,
        concat!(
            r#"{"eventType":"start_sync","message":"OK"}"#,
            r#"{"eventType":"add","port":{"address":"1","protocol":"dummy"}}"#,
            r#"{"eventType":"list","ports":[]}"#,
        ),
    )
    .await;

    assert_eq!(
        reply(&mut l.replies).await,
        Some(Message::ok(event_type::START_SYNC))
    );
    assert_eq!(
        reply(&mut l.replies).await,
        Some(Message::List { ports: Vec::new() }),
        "the add event must not reach the reply channel"
    );

    let event = events.recv().await.expect("add event");
    assert_eq!(event.kind, EventKind::Add);
    assert_eq!(event.discovery_id, ID);
}

#[tokio::test]
async fn staged_channel_activates_at_start_sync_reply() {
    let mut l = spawn_loop();
    let (tx, mut events) = mpsc::channel(8);
    l.machine.stage_events(tx).await;

    // An add racing ahead of the reply belongs to no channel.
    write(
        &mut l.stdout,
        concat!(
            r#"{"eventType":"add","port":{"address":"0","protocol":"dummy"}}"#,
            r#"{"eventType":"start_sync","message":"OK"}"#,
            r#"{"eventType":"add","port":{"address":"1","protocol":"dummy"}}"#,
        ),
    )
    .await;
    reply(&mut l.replies).await;

    let event = events.recv().await.expect("event after activation");
    assert_eq!(event.port.expect("port").address, "1");
}

#[tokio::test]
async fn port_without_protocol_keeps_the_stream_alive() {
    let mut l = spawn_loop();
    let (tx, mut events) = mpsc::channel(8);
    l.machine.stage_events(tx).await;

    write(
        &mut l.stdout,
        concat!(
            r#"{"eventType":"start_sync","message":"OK"}"#,
            r#"{"eventType":"add","port":{"address":"7"}}"#,
            r#"{"eventType":"list","ports":[]}"#,
        ),
    )
    .await;
    reply(&mut l.replies).await;

    let port = events.recv().await.expect("add event").port.expect("port");
    assert_eq!(port.address, "7");
    assert_eq!(port.protocol, "");
    assert_eq!(
        reply(&mut l.replies).await,
        Some(Message::List { ports: Vec::new() })
    );
    assert_eq!(l.machine.state(), ClientState::Alive);
}

#[tokio::test]
async fn failed_start_sync_does_not_activate_staged_channel() {
    let mut l = spawn_loop();
    let (tx, mut events) = mpsc::channel(8);
    l.machine.stage_events(tx).await;

    write(
        &mut l.stdout,
        r#"{"eventType":"start_sync","error":true,"message":"busy"}"#,
    )
    .await;
    assert_eq!(
        reply(&mut l.replies).await,
        Some(Message::error(event_type::START_SYNC, "busy"))
    );

    l.machine.unstage_events().await;
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn eof_closes_replies_and_records_transport_error() {
    let mut l = spawn_loop();
    drop(l.stdout);
    assert_eq!(reply(&mut l.replies).await, None);
    l.task.await.expect("decode loop exits");

    assert_eq!(l.machine.state(), ClientState::Dead);
    assert!(matches!(
        l.machine.terminal_error(),
        Some(AppError::Transport(ref msg)) if msg.contains("closed its output stream")
    ));
}

#[tokio::test]
async fn add_without_port_is_fatal() {
    let mut l = spawn_loop();
    let (tx, mut events) = mpsc::channel(8);
    l.machine.stage_events(tx).await;
    write(&mut l.stdout, r#"{"eventType":"start_sync","message":"OK"}"#).await;
    reply(&mut l.replies).await;

    write(&mut l.stdout, r#"{"eventType":"add"}"#).await;
    assert_eq!(reply(&mut l.replies).await, None);

    assert_eq!(l.machine.state(), ClientState::Dead);
    assert_eq!(
        l.machine.terminal_error(),
        Some(AppError::Protocol("invalid 'add' message: missing port".into()))
    );
    assert_eq!(events.recv().await.expect("stop").kind, EventKind::Stop);
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn garbage_is_fatal() {
    let mut l = spawn_loop();
    write(&mut l.stdout, "this is not json\n").await;
    assert_eq!(reply(&mut l.replies).await, None);
    assert!(matches!(
        l.machine.terminal_error(),
        Some(AppError::Protocol(_))
    ));
}
