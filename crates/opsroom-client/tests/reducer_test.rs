//! Reducer behaviour: routing, idempotence, bounds.

use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

use opsroom_client::{reduce, AgentStatus, LiveFeed, RoomState};
use opsroom_core::{
    AgentSession, AgentType, JsonMap, OperationEvent, ServerMessage, SessionStatus, StoreChange,
    TaskStatus,
};

fn event(event_type: &str, agent_id: &str, payload: Value) -> OperationEvent {
    event_in("sess-main", event_type, agent_id, payload)
}

fn event_in(session_id: &str, event_type: &str, agent_id: &str, payload: Value) -> OperationEvent {
    let payload: JsonMap = payload.as_object().cloned().unwrap_or_default();
    OperationEvent::new(event_type, agent_id, session_id, payload)
}

fn at(event: OperationEvent, seconds: i64) -> OperationEvent {
    OperationEvent {
        timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds),
        ..event
    }
}

fn lifecycle() -> Vec<OperationEvent> {
    vec![
        at(
            event(
                "agent.session.started",
                "main-1",
                json!({"agent_name": "Planner", "agent_type": "main"}),
            ),
            0,
        ),
        at(
            event(
                "subagent.spawned",
                "main-1",
                json!({"subagent_id": "sub-1", "agent_name": "Researcher"}),
            ),
            1,
        ),
        at(
            event(
                "task.state_changed",
                "main-1",
                json!({"task_id": "t-1", "title": "Survey", "to_status": "todo"}),
            ),
            2,
        ),
        at(
            event(
                "task.state_changed",
                "main-1",
                json!({"task_id": "t-1", "from_status": "todo", "to_status": "in_progress"}),
            ),
            3,
        ),
        at(
            event(
                "agent.status_updated",
                "sub-1",
                json!({"agent_type": "subagent", "subagent_id": "sub-1", "status": "working", "progress_percent": 50}),
            ),
            4,
        ),
        at(
            event(
                "agent.status_updated",
                "main-1",
                json!({"agent_type": "main", "status": "working", "progress_percent": 25}),
            ),
            5,
        ),
    ]
}

fn fold(events: &[OperationEvent]) -> RoomState {
    events.iter().fold(RoomState::new(), |state, e| reduce(&state, e))
}

#[test]
fn test_lifecycle_projection() {
    let state = fold(&lifecycle());

    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.agent_name.as_deref(), Some("Planner"));
    assert_eq!(main.status, AgentStatus::Working);
    assert_eq!(main.progress, 25);

    let sub = &state.subagents["sub-1"];
    assert_eq!(sub.name.as_deref(), Some("Researcher"));
    assert_eq!(sub.status, AgentStatus::Working);
    assert_eq!(sub.progress, 50);
    assert_eq!(sub.parent_session_id.as_deref(), Some("sess-main"));

    assert!(state.tasks.bucket(TaskStatus::Todo).is_empty());
    assert_eq!(state.tasks.bucket(TaskStatus::InProgress)[0].id, "t-1");
    assert_eq!(
        state.tasks.bucket(TaskStatus::InProgress)[0].title.as_deref(),
        Some("Survey")
    );
    assert_eq!(state.feed.len(), 6);
    assert_eq!(state.feed.latest().unwrap().event_type, "agent.status_updated");
}

#[test]
fn test_replaying_events_is_idempotent() {
    let events = lifecycle();
    let once = fold(&events);

    let mut twice = once.clone();
    for event in &events {
        twice.apply(event);
    }

    assert_eq!(twice.subagents, once.subagents);
    assert_eq!(twice.tasks, once.tasks);
    assert_eq!(twice.tasks.len(), 1);
    assert_eq!(twice.main_agent, once.main_agent);
    // the feed is the only append-only collection
    assert_eq!(twice.feed.len(), 12);
}

#[test]
fn test_task_already_in_destination_keeps_place() {
    let mut state = RoomState::new();
    for id in ["t-1", "t-2", "t-3"] {
        state.apply(&event(
            "task.state_changed",
            "main-1",
            json!({"task_id": id, "to_status": "review"}),
        ));
    }
    state.apply(&event(
        "task.state_changed",
        "main-1",
        json!({"task_id": "t-1", "to_status": "review"}),
    ));

    let ids: Vec<&str> = state
        .tasks
        .bucket(TaskStatus::Review)
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(ids, vec!["t-1", "t-2", "t-3"]);

    state.apply(&event(
        "task.state_changed",
        "main-1",
        json!({"task_id": "t-2", "to_status": "done"}),
    ));
    let ids: Vec<&str> = state
        .tasks
        .bucket(TaskStatus::Review)
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(ids, vec!["t-1", "t-3"]);
    assert_eq!(state.tasks.locate("t-2"), Some(TaskStatus::Done));
}

#[test]
fn test_spawn_never_regresses_subagent() {
    let mut state = RoomState::new();
    state.apply(&event(
        "agent.status_updated",
        "sub-1",
        json!({"agent_type": "subagent", "subagent_id": "sub-1", "status": "working"}),
    ));
    state.apply(&event(
        "subagent.spawned",
        "main-1",
        json!({"subagent_id": "sub-1", "agent_name": "Late"}),
    ));

    let sub = &state.subagents["sub-1"];
    assert_eq!(sub.status, AgentStatus::Working);
    assert_eq!(sub.name.as_deref(), Some("Late"));
}

#[test]
fn test_terminal_subagent_is_not_revived() {
    let mut state = RoomState::new();
    state.apply(&event(
        "subagent.spawned",
        "main-1",
        json!({"subagent_id": "sub-1"}),
    ));
    state.apply(&event(
        "subagent.completed",
        "sub-1",
        json!({"subagent_id": "sub-1", "success": false, "summary": "gave up"}),
    ));
    state.apply(&event(
        "agent.status_updated",
        "sub-1",
        json!({"agent_type": "subagent", "subagent_id": "sub-1", "status": "working", "progress_percent": 90}),
    ));

    let sub = &state.subagents["sub-1"];
    assert_eq!(sub.status, AgentStatus::Failed);
    assert_eq!(sub.summary.as_deref(), Some("gave up"));
    assert_eq!(sub.progress, 0);
}

#[test]
fn test_main_session_termination() {
    let mut state = fold(&lifecycle());
    state.apply(&event("agent.session.terminated", "main-1", json!({})));

    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.status, AgentStatus::Terminated);
    assert_eq!(main.progress, 100);

    state.apply(&event(
        "agent.status_updated",
        "main-1",
        json!({"status": "working", "progress_percent": 10}),
    ));
    assert_eq!(
        state.main_agent.as_ref().unwrap().status,
        AgentStatus::Terminated
    );
}

#[test]
fn test_new_session_started_resets_main_agent() {
    let mut state = fold(&lifecycle());
    state.apply(&event_in(
        "sess-next",
        "agent.session.started",
        "main-2",
        json!({"agent_name": "Planner v2", "agent_type": "main"}),
    ));
    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.session_id, "sess-next");
    assert_eq!(main.status, AgentStatus::Active);
    assert_eq!(main.progress, 0);
    assert_eq!(main.agent_id, "main-2");
}

#[test]
fn test_repeated_session_start_keeps_progress() {
    let started = event(
        "agent.session.started",
        "main-1",
        json!({"agent_name": "Planner", "agent_type": "main"}),
    );
    let mut state = RoomState::new();
    state.apply(&started);
    state.apply(&event(
        "agent.status_updated",
        "main-1",
        json!({"agent_type": "main", "status": "working", "progress_percent": 70}),
    ));
    state.apply(&started);

    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.status, AgentStatus::Working);
    assert_eq!(main.progress, 70);
    assert_eq!(main.agent_name.as_deref(), Some("Planner"));
}

#[test]
fn test_late_session_start_does_not_revive_terminated_main() {
    let started = event(
        "agent.session.started",
        "main-1",
        json!({"agent_name": "Planner", "agent_type": "main"}),
    );
    let mut state = RoomState::new();
    state.apply(&started);
    state.apply(&event("agent.session.terminated", "main-1", json!({"summary": "done"})));
    state.apply(&started);

    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.status, AgentStatus::Terminated);
    assert_eq!(main.progress, 100);
}

#[test]
fn test_progress_only_update_keeps_status() {
    let mut state = RoomState::new();
    state.apply(&event(
        "agent.session.started",
        "main-1",
        json!({"agent_name": "Planner", "agent_type": "main"}),
    ));
    state.apply(&event(
        "agent.status_updated",
        "main-1",
        json!({"progress_percent": 50}),
    ));

    let main = state.main_agent.as_ref().unwrap();
    assert_eq!(main.progress, 50);
    assert_eq!(main.status, AgentStatus::Active);

    state.apply(&event(
        "agent.status_updated",
        "sub-1",
        json!({"agent_type": "subagent", "subagent_id": "sub-1", "status": "working"}),
    ));
    state.apply(&event(
        "agent.status_updated",
        "sub-1",
        json!({"agent_type": "subagent", "subagent_id": "sub-1", "progress_percent": 80}),
    ));
    let sub = &state.subagents["sub-1"];
    assert_eq!(sub.status, AgentStatus::Working);
    assert_eq!(sub.progress, 80);
}

#[test]
fn test_live_feed_keeps_most_recent_fifty() {
    let mut state = RoomState::new();
    let events: Vec<OperationEvent> = (0..200)
        .map(|i| at(event("agent.thought", "main-1", json!({"n": i})), i))
        .collect();
    for event in &events {
        state.apply(event);
    }

    assert_eq!(state.feed.len(), 50);
    let kept: Vec<&str> = state.feed.iter().map(|e| e.id.as_str()).collect();
    let expected: Vec<&str> = events[150..].iter().rev().map(|e| e.id.as_str()).collect();
    assert_eq!(kept, expected);
}

#[test]
fn test_live_feed_capacity_floor() {
    let mut feed = LiveFeed::new(0);
    feed.push(event("agent.thought", "a", json!({})));
    feed.push(event("agent.thought", "a", json!({})));
    assert_eq!(feed.capacity(), 1);
    assert_eq!(feed.len(), 1);
}

#[test]
fn test_unknown_events_only_reach_the_feed() {
    let state = reduce(
        &RoomState::new(),
        &event("agent.dreamed", "main-1", json!({"of": "sheep"})),
    );
    assert!(state.main_agent.is_none());
    assert!(state.subagents.is_empty());
    assert!(state.tasks.is_empty());
    assert_eq!(state.feed.len(), 1);
}

#[test]
fn test_apply_message_routes_by_channel() {
    let mut state = RoomState::new();
    let started = event(
        "agent.session.started",
        "main-1",
        json!({"agent_type": "main"}),
    );
    let message = ServerMessage::from_change(StoreChange {
        channel: "agent_events".to_string(),
        message_id: started.id.clone(),
        data: serde_json::to_value(&started).unwrap(),
    });
    assert!(state.apply_message(&message));
    assert!(state.main_agent.is_some());

    let session = AgentSession {
        session_id: "sess-main".to_string(),
        agent_id: "main-1".to_string(),
        agent_name: "Planner".to_string(),
        agent_type: AgentType::Main,
        status: SessionStatus::Active,
        channel: None,
        assigned_task: None,
        parent_session_id: None,
        progress_percent: 0,
        estimated_completion: None,
        summary: None,
        started_at: Utc::now(),
        terminated_at: None,
        last_activity_at: Utc::now(),
    };
    let message = ServerMessage::from_change(StoreChange {
        channel: "agent_sessions".to_string(),
        message_id: "sess-main:1".to_string(),
        data: serde_json::to_value(&session).unwrap(),
    });
    assert!(state.apply_message(&message));
    assert_eq!(state.roster["sess-main"], session);

    let noise = ServerMessage::from_change(StoreChange {
        channel: "other".to_string(),
        message_id: "x".to_string(),
        data: json!({}),
    });
    assert!(!state.apply_message(&noise));
}
