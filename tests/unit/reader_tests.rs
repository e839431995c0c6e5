//! Unit tests for stdout dispatch: response correlation, approval answers,
//! and the bounded notification stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use agent_bridge::agent::reader::{run_reader, run_stderr, Dispatcher, PendingRequests};
use agent_bridge::config::ApprovalPolicy;

struct Harness {
    dispatcher: Dispatcher,
    pending: PendingRequests,
    notifications: mpsc::Receiver<agent_bridge::agent::Notification>,
    outbound: mpsc::Receiver<serde_json::Value>,
}

fn harness(capacity: usize, approval: ApprovalPolicy) -> Harness {
    let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
    let (notify_tx, notify_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(8);
    Harness {
        dispatcher: Dispatcher {
            pending: Arc::clone(&pending),
            notifications: notify_tx,
            outbound: out_tx,
            approval,
        },
        pending,
        notifications: notify_rx,
        outbound: out_rx,
    }
}

#[tokio::test]
async fn response_completes_matching_waiter() {
    let h = harness(4, ApprovalPolicy::AutoAccept);
    let (tx, rx) = oneshot::channel();
    h.pending.lock().await.insert(7, tx);

    h.dispatcher
        .dispatch_line(r#"{"id":7,"result":{"ok":true}}"#)
        .await;

    let outcome = rx.await.expect("waiter completed");
    assert_eq!(outcome.expect("ok"), json!({"ok": true}));
    assert!(h.pending.lock().await.is_empty());
}

#[tokio::test]
async fn unmatched_response_is_dropped() {
    let h = harness(4, ApprovalPolicy::AutoAccept);
    let (tx, _rx) = oneshot::channel();
    h.pending.lock().await.insert(1, tx);

    h.dispatcher.dispatch_line(r#"{"id":99,"result":{}}"#).await;

    assert_eq!(h.pending.lock().await.len(), 1, "waiter 1 untouched");
}

#[tokio::test]
async fn server_request_is_answered_with_policy_decision() {
    let mut h = harness(4, ApprovalPolicy::AutoAccept);
    h.dispatcher
        .dispatch_line(r#"{"id":"req-1","method":"item/fileChange/requestApproval","params":{}}"#)
        .await;

    let answer = h.outbound.recv().await.expect("answer written");
    assert_eq!(answer, json!({"id": "req-1", "result": {"decision": "accept"}}));

    let mut declining = harness(4, ApprovalPolicy::Decline);
    declining
        .dispatcher
        .dispatch_line(r#"{"id":5,"method":"item/commandExecution/requestApproval","params":{}}"#)
        .await;
    let answer = declining.outbound.recv().await.expect("answer written");
    assert_eq!(answer, json!({"id": 5, "result": {"decision": "decline"}}));
}

#[tokio::test]
async fn full_notification_stream_drops_without_blocking() {
    let mut h = harness(1, ApprovalPolicy::AutoAccept);

    h.dispatcher
        .dispatch_line(r#"{"method":"turn/started","params":{"n":1}}"#)
        .await;
    h.dispatcher
        .dispatch_line(r#"{"method":"turn/started","params":{"n":2}}"#)
        .await;

    let first = h.notifications.recv().await.expect("first kept");
    assert_eq!(first.params["n"], 1);
    assert!(h.notifications.try_recv().is_err(), "second was dropped");
}

/// EOF ends the loop, releases pending waiters, and closes the stream.
#[tokio::test]
async fn reader_stops_at_eof_and_closes_stream() {
    let mut h = harness(4, ApprovalPolicy::AutoAccept);
    let (tx, rx) = oneshot::channel();
    h.pending.lock().await.insert(42, tx);

    let input: &[u8] =
        b"garbage line\n{\"method\":\"turn/started\",\"params\":{}}\n";
    run_reader(input, h.dispatcher, CancellationToken::new()).await;

    let n = h.notifications.recv().await.expect("notification delivered");
    assert_eq!(n.method, "turn/started");
    assert!(h.notifications.recv().await.is_none(), "stream closed");
    assert!(rx.await.is_err(), "pending waiter released");
}

/// A line that is not UTF-8 is skipped; later lines are still routed.
#[tokio::test]
async fn reader_survives_invalid_utf8_line() {
    let mut h = harness(4, ApprovalPolicy::AutoAccept);
    let (tx, rx) = oneshot::channel();
    h.pending.lock().await.insert(1, tx);

    let input: &[u8] =
        b"\xff\xfe not utf8\n{\"id\":1,\"result\":{}}\n{\"method\":\"turn/started\",\"params\":{}}\n";
    run_reader(input, h.dispatcher, CancellationToken::new()).await;

    assert_eq!(rx.await.expect("response routed").expect("ok"), json!({}));
    let n = h.notifications.recv().await.expect("notification delivered");
    assert_eq!(n.method, "turn/started");
}

/// Stderr keeps draining past undecodable bytes until the writer closes.
#[tokio::test]
async fn stderr_drain_survives_invalid_utf8() {
    let (mut child_side, our_side) = tokio::io::duplex(64);
    let task = tokio::spawn(run_stderr(our_side, CancellationToken::new()));

    child_side.write_all(b"\xff bad\n").await.expect("bad line");
    let chunk = vec![b'a'; 4096];
    tokio::time::timeout(Duration::from_secs(5), async {
        child_side.write_all(&chunk).await.expect("write");
        child_side.write_all(b"\n").await.expect("newline");
    })
    .await
    .expect("stderr must keep draining");
    assert!(!task.is_finished());

    drop(child_side);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("drain ends at EOF")
        .expect("no panic");
}
