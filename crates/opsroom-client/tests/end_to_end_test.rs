//! Logger -> ingestion -> gateway -> viewer, against a real server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use opsroom_api::{build_router, AppState, GatewayConfig, RouterConfig, StaticIdentityProvider};
use opsroom_client::{
    main_status, subagent_status, AgentStatus, LoggerConfig, OperationsLogger, RoomState, Viewer,
    ViewerConfig, ViewerStatus,
};
use opsroom_core::{AgentType, ChannelHub, TaskStatus};
use opsroom_crypto::EnvelopeSigner;
use opsroom_db::MemoryStore;

const SECRET: &str = "e2e-secret";
const TOKEN: &str = "viewer-token";

async fn spawn_server() -> String {
    let store = MemoryStore::new();
    let state = AppState::with_memory_store(
        &store,
        Arc::new(ChannelHub::new(64)),
        Arc::new(StaticIdentityProvider::new().with_token(TOKEN, "viewer-1")),
        EnvelopeSigner::new(SECRET).unwrap(),
        GatewayConfig::default(),
    );
    let router = build_router(state, &RouterConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("127.0.0.1:{}", addr.port())
}

async fn wait_for(
    rx: &mut watch::Receiver<RoomState>,
    what: &str,
    predicate: impl Fn(&RoomState) -> bool,
) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("viewer stopped while waiting for {}", what);
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timeout waiting for {}", what);
}

async fn wait_open(handle: &opsroom_client::ViewerHandle) {
    let mut status = handle.status();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *status.borrow_and_update() != ViewerStatus::Open {
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("viewer never connected");
}

#[tokio::test]
async fn test_logged_events_reach_the_viewer() {
    let addr = spawn_server().await;

    let handle = Viewer::spawn(
        ViewerConfig::new(format!("ws://{}/ws", addr), TOKEN),
        Viewer::default_channels(),
    )
    .unwrap();
    wait_open(&handle).await;
    // let the subscribe frames land before events flow
    tokio::time::sleep(Duration::from_millis(200)).await;

    let logger = OperationsLogger::with_config(LoggerConfig::new(
        "main-1",
        "sess-1",
        format!("http://{}/operations/log", addr),
        SECRET,
    ))
    .unwrap();

    logger
        .session_started("Planner", AgentType::Main, Some("Release"))
        .await
        .unwrap();
    logger
        .subagent_spawned("sub-1", "Researcher", None)
        .await
        .unwrap();
    logger
        .status_updated(subagent_status("sub-1", "working", Some(60.0)))
        .await
        .unwrap();
    logger
        .task_state_changed("t-1", Some("Changelog"), None, TaskStatus::Review)
        .await
        .unwrap();
    logger
        .status_updated(main_status("working", Some(30.0)))
        .await
        .unwrap();

    let mut state = handle.state();
    wait_for(&mut state, "projection", |s| {
        s.main_agent.as_ref().is_some_and(|m| m.progress == 30)
            && s.subagents
                .get("sub-1")
                .is_some_and(|sub| sub.status == AgentStatus::Working && sub.progress == 60)
            && s.tasks.locate("t-1") == Some(TaskStatus::Review)
            && s.roster.contains_key("sess-1")
    })
    .await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.feed.len(), 5);
    assert_eq!(
        snapshot.main_agent.as_ref().unwrap().agent_name.as_deref(),
        Some("Planner")
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_wrong_secret_is_rejected_end_to_end() {
    let addr = spawn_server().await;
    let logger = OperationsLogger::with_config(LoggerConfig::new(
        "main-1",
        "sess-1",
        format!("http://{}/operations/log", addr),
        "not-the-secret",
    ))
    .unwrap();

    let result = logger.session_terminated(None).await;
    match result {
        Err(opsroom_client::LogError::Rejected { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401 rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_viewer_with_bad_token_keeps_retrying() {
    let addr = spawn_server().await;
    let mut config = ViewerConfig::new(format!("ws://{}/ws", addr), "bogus");
    config.reconnect_floor = Duration::from_millis(20);
    config.reconnect_ceiling = Duration::from_millis(40);

    let handle = Viewer::spawn(config, Viewer::default_channels()).unwrap();
    let mut status = handle.status();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(*status.borrow_and_update(), ViewerStatus::Reconnecting { .. }) {
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("viewer never scheduled a reconnect");

    handle.shutdown().await;
    assert_eq!(*status.borrow(), ViewerStatus::Closed);
}
