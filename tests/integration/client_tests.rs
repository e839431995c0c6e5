//! Integration tests for `AgentClient` against a scripted agent process.
//!
//! The agent is a small `sh` loop (see `FAKE_AGENT_SCRIPT`) speaking the
//! JSON-line protocol, so these tests exercise real process spawning, stdio
//! framing, request correlation and shutdown.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_bridge::agent::protocol::{methods, DeltaParams, ThreadStartParams, TurnCompletedParams};
use agent_bridge::agent::{AgentClient, ClientState, Notification};
use agent_bridge::config::{AgentConfig, ApprovalPolicy};
use agent_bridge::AppError;

use super::test_helpers::fake_agent_config;

const WAIT: Duration = Duration::from_secs(5);

async fn started(config: AgentConfig) -> (AgentClient, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let client = AgentClient::new(config, dir.path().to_path_buf());
    client
        .start(&CancellationToken::new())
        .await
        .expect("fake agent starts");
    (client, dir)
}

async fn next_with_method(rx: &mut mpsc::Receiver<Notification>, method: &str) -> Notification {
    tokio::time::timeout(WAIT, async {
        loop {
            let notification = rx.recv().await.expect("stream open");
            if notification.method == method {
                return notification;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {method} notification"))
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_makes_client_ready() {
    let (client, dir) = started(fake_agent_config()).await;

    assert_eq!(client.state(), ClientState::Ready);
    assert!(client.is_running());
    assert_eq!(client.working_dir(), dir.path());

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn second_start_is_rejected() {
    let (client, _dir) = started(fake_agent_config()).await;

    let err = client
        .start(&CancellationToken::new())
        .await
        .expect_err("client starts once");
    assert!(matches!(err, AppError::Startup(_)), "got {err}");

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn missing_executable_fails_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AgentConfig {
        command: "/nonexistent/agent-binary".into(),
        ..fake_agent_config()
    };
    let client = AgentClient::new(config, dir.path().to_path_buf());

    let err = client
        .start(&CancellationToken::new())
        .await
        .expect_err("spawn must fail");

    assert!(matches!(err, AppError::Startup(_)), "got {err}");
    assert_eq!(client.state(), ClientState::Stopped);
}

#[tokio::test]
async fn agent_exiting_before_handshake_fails_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AgentConfig {
        args: vec!["-c".into(), "exit 0".into()],
        ..fake_agent_config()
    };
    let client = AgentClient::new(config, dir.path().to_path_buf());

    let err = tokio::time::timeout(WAIT, client.start(&CancellationToken::new()))
        .await
        .expect("startup fails promptly")
        .expect_err("handshake must fail");

    assert!(matches!(err, AppError::Startup(_)), "got {err}");
    assert!(!client.is_running());
}

#[tokio::test]
async fn stop_is_idempotent_and_closes_stream() {
    let (client, _dir) = started(fake_agent_config()).await;
    let mut rx = client.take_notifications().await.expect("stream");
    assert!(client.take_notifications().await.is_none(), "stream is taken once");

    client.stop().await.expect("first stop");
    client.stop().await.expect("second stop");

    assert_eq!(client.state(), ClientState::Stopped);
    let closed = tokio::time::timeout(WAIT, async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "notification stream must end after stop");

    let err = client
        .send_request("thread/start", json!({}))
        .await
        .expect_err("stopped client refuses requests");
    assert!(matches!(err, AppError::Agent(_)), "got {err}");
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn turn_streams_deltas_then_completion() {
    let (client, _dir) = started(fake_agent_config()).await;
    let mut rx = client.take_notifications().await.expect("stream");

    let thread_id = client
        .thread_start(ThreadStartParams::default())
        .await
        .expect("thread/start");
    assert_eq!(thread_id, "thr-1");

    let turn_id = client
        .turn_start(&thread_id, "hello", &[])
        .await
        .expect("turn/start");
    assert_eq!(turn_id, "turn-1");

    let mut reply = String::new();
    let completed = tokio::time::timeout(WAIT, async {
        loop {
            let n = rx.recv().await.expect("stream open");
            match n.method.as_str() {
                methods::AGENT_MESSAGE_DELTA => {
                    reply.push_str(&n.decode::<DeltaParams>().expect("delta").delta);
                }
                methods::TURN_COMPLETED => {
                    return n.decode::<TurnCompletedParams>().expect("completion");
                }
                _ => {}
            }
        }
    })
    .await
    .expect("turn completes");

    assert_eq!(reply, "Hi there");
    assert_eq!(completed.thread_id, "thr-1");
    assert_eq!(completed.status, "completed");

    client.turn_interrupt(&thread_id).await.expect("interrupt");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn thread_resume_returns_thread_details() {
    let (client, _dir) = started(fake_agent_config()).await;

    let thread = client.thread_resume("thr-1").await.expect("thread/resume");

    assert_eq!(thread.id, "thr-1");
    assert_eq!(thread.preview, "hello");
    assert_eq!(thread.cwd.as_deref(), Some("/work"));
    assert_eq!(thread.created_at, 1_700_000_000);

    let err = client
        .thread_resume("thr-gone")
        .await
        .expect_err("unknown thread");
    assert!(err.is_thread_not_found(), "got {err}");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_thread_is_reported_as_thread_not_found() {
    let (client, _dir) = started(fake_agent_config()).await;

    let err = client
        .turn_start("thr-gone", "hello", &[])
        .await
        .expect_err("unknown thread");

    assert!(err.is_thread_not_found(), "got {err}");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let config = AgentConfig {
        request_timeout_seconds: 1,
        ..fake_agent_config()
    };
    let (client, _dir) = started(config).await;

    let err = client
        .send_request("test/ignored", json!({}))
        .await
        .expect_err("no answer is coming");

    assert!(matches!(err, AppError::Timeout(_)), "got {err}");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn cancellation_aborts_in_flight_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = CancellationToken::new();
    let client = AgentClient::new(
        AgentConfig {
            request_timeout_seconds: 30,
            ..fake_agent_config()
        },
        dir.path().to_path_buf(),
    );
    client.start(&root).await.expect("start");

    let canceller = root.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(WAIT, client.send_request("test/ignored", json!({})))
        .await
        .expect("request ends promptly")
        .expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)), "got {err}");

    client.stop().await.expect("stop");
}

// ── Server requests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn approval_requests_are_accepted_by_default() {
    let (client, _dir) = started(fake_agent_config()).await;
    let mut rx = client.take_notifications().await.expect("stream");

    client
        .send_request("test/approve", json!({}))
        .await
        .expect("trigger approval");

    let echoed = next_with_method(&mut rx, "test/decision").await;
    assert_eq!(echoed.params["decision"], "accept");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn decline_policy_declines_approval_requests() {
    let config = AgentConfig {
        approval_policy: ApprovalPolicy::Decline,
        ..fake_agent_config()
    };
    let (client, _dir) = started(config).await;
    let mut rx = client.take_notifications().await.expect("stream");

    client
        .send_request("test/approve", json!({}))
        .await
        .expect("trigger approval");

    let echoed = next_with_method(&mut rx, "test/decision").await;
    assert_eq!(echoed.params["decision"], "decline");
    client.stop().await.expect("stop");
}

#[tokio::test]
async fn explicit_approval_answer_has_response_shape() {
    let (client, _dir) = started(fake_agent_config()).await;
    let mut rx = client.take_notifications().await.expect("stream");

    client
        .respond_to_approval(json!("manual-1"), "decline")
        .await
        .expect("answer written");

    let echoed = next_with_method(&mut rx, "test/echo").await;
    assert_eq!(
        echoed.params,
        json!({"id": "manual-1", "result": {"decision": "decline"}})
    );
    client.stop().await.expect("stop");
}
