//! Integration tests for bridge shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_bridge::bridge::{Bridge, BridgeOptions};
use agent_bridge::chat::ChatPlatform;
use agent_bridge::driver::{AgentLauncher, ProcessLauncher};
use agent_bridge::models::session::FreshnessPolicy;
use agent_bridge::persistence::db;
use agent_bridge::persistence::session_repo::SessionStore;

use super::test_helpers::{fake_agent_config, message, MockPlatform, TestBridge};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn shutdown_stops_agent_and_drops_later_messages() {
    let h = TestBridge::start(Some("unused")).await;
    let agent = h.agent();

    tokio::time::timeout(WAIT, h.bridge.shutdown())
        .await
        .expect("shutdown completes");

    assert!(agent.stopped());
    assert!(h.cancel.is_cancelled());

    h.send("D1", "m1", "too late").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(agent.turn_prompts().is_empty());
    assert!(h.platform.texts().is_empty());
}

#[tokio::test]
async fn shutdown_releases_worker_waiting_on_turn() {
    let h = TestBridge::start(None).await;
    let agent = h.agent();

    h.send("D1", "m1", "never finishes").await;
    agent.wait_for_turns(1).await;
    h.send("D1", "m2", "still queued").await;

    tokio::time::timeout(WAIT, h.bridge.shutdown())
        .await
        .expect("shutdown must not wait for the turn");

    assert_eq!(agent.turn_prompts(), vec!["never finishes".to_owned()]);
}

#[tokio::test]
async fn cancelling_root_token_stops_workers() {
    let h = TestBridge::start(None).await;
    let agent = h.agent();

    h.send("D1", "m1", "in flight").await;
    agent.wait_for_turns(1).await;

    h.cancel.cancel();
    tokio::time::timeout(WAIT, h.bridge.shutdown())
        .await
        .expect("shutdown after cancellation completes");
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_with_real_process_answers_and_exits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let store = SessionStore::new(
        pool,
        FreshnessPolicy {
            idle_timeout_minutes: 60,
            daily_reset_hour: -1,
        },
    );
    let platform = Arc::new(MockPlatform::default());
    let launcher: Arc<dyn AgentLauncher> = Arc::new(ProcessLauncher::new(fake_agent_config()));

    let bridge = Bridge::start(
        Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        launcher,
        store.clone(),
        dir.path(),
        BridgeOptions {
            queue_capacity: 10,
            cleanup_interval: Duration::from_secs(3600),
        },
        CancellationToken::new(),
    )
    .await
    .expect("bridge over fake agent");

    bridge.handle_inbound(message("D1", "m1", "hello")).await;

    assert_eq!(platform.wait_for_texts(1).await, vec!["Hi there".to_owned()]);
    let session = store
        .get_by_chat_id("D1")
        .await
        .expect("lookup")
        .expect("session");
    assert_eq!(session.thread_id, "thr-1");

    tokio::time::timeout(WAIT, bridge.shutdown())
        .await
        .expect("shutdown completes");
}
