//! Integration tests for local interrupt handling.
//!
//! Covers:
//! - an interrupt sends exactly `Size: -1`, closes the connection, exits 1
//! - the sentinel follows any stdin frames already written
//! - a session that ends first is returned untouched
//! - session errors propagate through the interrupt race
//! - an interrupt completes even while a stdin frame is stuck on the wire

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use interp_client::cancel::{run_until_interrupted, CancelHandler, CANCELLED_STATUS};
use interp_client::session::SessionEnd;
use interp_client::AppError;

use super::test_helpers::{harness, harness_with_capacity, read_all, read_until_suffix};

#[tokio::test]
async fn interrupt_sends_sentinel_and_closes() {
    let h = harness(512);
    let handler = CancelHandler::new(Arc::clone(&h.writer));
    let task = tokio::spawn(h.session.run());

    let (tx, rx) = oneshot::channel::<()>();
    tx.send(()).expect("trigger interrupt");
    let interrupt = async {
        let _ = rx.await;
    };

    let end = run_until_interrupted(task, interrupt, &handler)
        .await
        .expect("cancelled session");

    assert_eq!(end, SessionEnd::Cancelled);
    assert_eq!(end.exit_code(), CANCELLED_STATUS);
    assert_eq!(end.exit_code(), 1);
    assert!(!h.writer.close().await, "interrupt must close the connection");
    assert_eq!(read_all(h.server).await, b"Size: -1\n\n");
}

#[tokio::test]
async fn sentinel_follows_frames_already_sent() {
    let mut h = harness(512);
    let handler = CancelHandler::new(Arc::clone(&h.writer));
    h.stdin.write_all(b"abc").await.expect("stdin write");
    drop(h.stdin);
    let task = tokio::spawn(h.session.run());

    let mut server = h.server;
    let (tx, rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        let mut received = read_until_suffix(&mut server, b"Size: 0\n\n").await;
        tx.send(()).expect("trigger interrupt");
        received.extend(read_all(server).await);
        received
    });
    let interrupt = async {
        let _ = rx.await;
    };

    let end = run_until_interrupted(task, interrupt, &handler)
        .await
        .expect("cancelled session");

    assert_eq!(end, SessionEnd::Cancelled);
    assert_eq!(
        server_task.await.expect("server task"),
        b"Size: 3\n\nabcSize: 0\n\nSize: -1\n\n"
    );
}

#[tokio::test]
async fn finished_session_wins_without_sentinel() {
    let mut h = harness(512);
    let handler = CancelHandler::new(Arc::clone(&h.writer));
    h.server
        .write_all(b"Status: 4\n\n")
        .await
        .expect("server write");
    let task = tokio::spawn(h.session.run());

    let end = run_until_interrupted(task, pending::<()>(), &handler)
        .await
        .expect("session");

    assert_eq!(end, SessionEnd::Status(4));
    assert!(h.writer.close().await, "connection must still be open");
}

#[tokio::test]
async fn session_error_propagates() {
    let mut h = harness(512);
    let handler = CancelHandler::new(Arc::clone(&h.writer));
    h.server
        .write_all(b"Channel: tty\nSize: 1\n\nx")
        .await
        .expect("server write");
    let task = tokio::spawn(h.session.run());

    let result = run_until_interrupted(task, pending::<()>(), &handler).await;

    assert!(
        matches!(result, Err(AppError::Protocol(ref msg)) if msg.contains("tty")),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn cancel_after_close_is_harmless() {
    let h = harness(512);
    let handler = CancelHandler::new(Arc::clone(&h.writer));

    handler.cancel().await;
    handler.cancel().await;

    assert!(!h.writer.close().await, "cancel must close the connection");
    assert_eq!(read_all(h.server).await, b"Size: -1\n\n");
}

#[tokio::test]
async fn interrupt_is_prompt_when_server_stops_reading() {
    let mut h = harness_with_capacity(512, 64);
    let handler = CancelHandler::new(Arc::clone(&h.writer));
    h.stdin
        .write_all(&[b'x'; 4 * 1024])
        .await
        .expect("stdin write");
    drop(h.stdin);
    // Held open but never read, so the first stdin frame cannot complete.
    let _server = h.server;
    let task = tokio::spawn(h.session.run());

    let end = timeout(
        Duration::from_secs(3),
        run_until_interrupted(task, sleep(Duration::from_millis(200)), &handler),
    )
    .await
    .expect("interrupt must not wait on the blocked writer")
    .expect("cancelled session");

    assert_eq!(end, SessionEnd::Cancelled);
    assert!(!h.writer.close().await, "interrupt must close the connection");
}
