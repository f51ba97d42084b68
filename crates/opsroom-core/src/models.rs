//! Domain models: operation events, typed payloads, and derived session rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::ids;

/// JSON object as it travels on the wire (key order preserved).
pub type JsonMap = Map<String, JsonValue>;

// =============================================================================
// EVENT KINDS
// =============================================================================

/// Event types with a known payload shape.
///
/// The wire `type` field is an open string; anything not listed here is
/// carried through untouched as an opaque payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    SessionTerminated,
    StatusUpdated,
    SubagentSpawned,
    SubagentCompleted,
    TaskStateChanged,
    AgentError,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::SessionStarted,
        EventKind::SessionTerminated,
        EventKind::StatusUpdated,
        EventKind::SubagentSpawned,
        EventKind::SubagentCompleted,
        EventKind::TaskStateChanged,
        EventKind::AgentError,
    ];

    /// Dot-namespaced wire name (e.g. `"agent.session.started"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "agent.session.started",
            EventKind::SessionTerminated => "agent.session.terminated",
            EventKind::StatusUpdated => "agent.status_updated",
            EventKind::SubagentSpawned => "subagent.spawned",
            EventKind::SubagentCompleted => "subagent.completed",
            EventKind::TaskStateChanged => "task.state_changed",
            EventKind::AgentError => "agent.error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OPERATION EVENT
// =============================================================================

/// Immutable activity fact emitted by an agent.
///
/// `payload` is kept as the raw JSON object so that the signed bytes can be
/// rebuilt exactly; use [`OperationEvent::typed_payload`] for the decoded view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Globally unique id, `evt-<type>-<uuid>`.
    pub id: String,
    /// Open event type (see [`EventKind`] for the known ones).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producer-assigned timestamp.
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub session_id: String,
    pub payload: JsonMap,
}

impl OperationEvent {
    /// Build a new event stamped with a fresh id and the current time.
    pub fn new(
        event_type: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: JsonMap,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            id: ids::new_event_id(&event_type),
            event_type,
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            payload,
        }
    }

    /// Known kind of this event, if any.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    /// Decode the payload into its typed shape.
    pub fn typed_payload(&self) -> EventPayload {
        EventPayload::decode(&self.event_type, &self.payload)
    }
}

// =============================================================================
// TYPED PAYLOADS
// =============================================================================

/// Role of an agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Main,
    Subagent,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Main => "main",
            AgentType::Subagent => "subagent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(AgentType::Main),
            "subagent" => Some(AgentType::Subagent),
            _ => None,
        }
    }
}

/// Kanban bucket a task lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Backlog,
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionTerminatedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdatedPayload {
    #[serde(default)]
    pub agent_type: AgentType,
    /// Target sub-agent when `agent_type` is `subagent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_id: Option<String>,
    /// Reported status (`working`, `idle`, ...). Progress-only updates omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
}

impl StatusUpdatedPayload {
    /// Progress clamped to `0..=100`.
    pub fn progress(&self) -> Option<i32> {
        self.progress_percent.map(clamp_progress)
    }

    /// Session status this update maps to; a missing status counts as idle.
    pub fn session_status(&self) -> SessionStatus {
        SessionStatus::from_reported(self.status.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentSpawnedPayload {
    pub subagent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_task: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentCompletedPayload {
    /// Defaults to the emitting agent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateChangedPayload {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
}

fn default_true() -> bool {
    true
}

/// Payload decoded by event type, with an opaque fallback.
///
/// Unknown types, and known types whose payload does not match the expected
/// shape, decode to [`EventPayload::Opaque`] rather than failing.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SessionStarted(SessionStartedPayload),
    SessionTerminated(SessionTerminatedPayload),
    StatusUpdated(StatusUpdatedPayload),
    SubagentSpawned(SubagentSpawnedPayload),
    SubagentCompleted(SubagentCompletedPayload),
    TaskStateChanged(TaskStateChangedPayload),
    AgentError(AgentErrorPayload),
    Opaque(JsonMap),
}

impl EventPayload {
    pub fn decode(event_type: &str, payload: &JsonMap) -> Self {
        let Some(kind) = EventKind::parse(event_type) else {
            return EventPayload::Opaque(payload.clone());
        };
        let value = JsonValue::Object(payload.clone());
        let decoded = match kind {
            EventKind::SessionStarted => serde_json::from_value(value).map(Self::SessionStarted),
            EventKind::SessionTerminated => {
                serde_json::from_value(value).map(Self::SessionTerminated)
            }
            EventKind::StatusUpdated => serde_json::from_value(value).map(Self::StatusUpdated),
            EventKind::SubagentSpawned => serde_json::from_value(value).map(Self::SubagentSpawned),
            EventKind::SubagentCompleted => {
                serde_json::from_value(value).map(Self::SubagentCompleted)
            }
            EventKind::TaskStateChanged => {
                serde_json::from_value(value).map(Self::TaskStateChanged)
            }
            EventKind::AgentError => serde_json::from_value(value).map(Self::AgentError),
        };
        decoded.unwrap_or_else(|_| EventPayload::Opaque(payload.clone()))
    }

    /// Kind of the decoded shape; `None` for opaque payloads.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            EventPayload::SessionStarted(_) => Some(EventKind::SessionStarted),
            EventPayload::SessionTerminated(_) => Some(EventKind::SessionTerminated),
            EventPayload::StatusUpdated(_) => Some(EventKind::StatusUpdated),
            EventPayload::SubagentSpawned(_) => Some(EventKind::SubagentSpawned),
            EventPayload::SubagentCompleted(_) => Some(EventKind::SubagentCompleted),
            EventPayload::TaskStateChanged(_) => Some(EventKind::TaskStateChanged),
            EventPayload::AgentError(_) => Some(EventKind::AgentError),
            EventPayload::Opaque(_) => None,
        }
    }

    /// Encode back into a wire payload object.
    pub fn to_map(&self) -> JsonMap {
        let value = match self {
            EventPayload::SessionStarted(p) => serde_json::to_value(p),
            EventPayload::SessionTerminated(p) => serde_json::to_value(p),
            EventPayload::StatusUpdated(p) => serde_json::to_value(p),
            EventPayload::SubagentSpawned(p) => serde_json::to_value(p),
            EventPayload::SubagentCompleted(p) => serde_json::to_value(p),
            EventPayload::TaskStateChanged(p) => serde_json::to_value(p),
            EventPayload::AgentError(p) => serde_json::to_value(p),
            EventPayload::Opaque(map) => return map.clone(),
        };
        match value {
            Ok(JsonValue::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }
}

/// Clamp a reported percentage into `0..=100`.
pub fn clamp_progress(value: f64) -> i32 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as i32
}

// =============================================================================
// SIGNED ENVELOPE
// =============================================================================

/// Transport wrapper for an [`OperationEvent`].
///
/// On the wire the signing time is the `timestamp` field (milliseconds since
/// the Unix epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub event: OperationEvent,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// =============================================================================
// AGENT SESSIONS
// =============================================================================

/// Lifecycle status of a derived session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "idle" => Some(SessionStatus::Idle),
            "terminated" => Some(SessionStatus::Terminated),
            _ => None,
        }
    }

    /// Map an agent-reported status onto the session status.
    ///
    /// `working` (and `active`) mean the agent is busy; anything else is idle.
    pub fn from_reported(status: &str) -> Self {
        match status {
            "working" | "active" => SessionStatus::Active,
            _ => SessionStatus::Idle,
        }
    }
}

/// Derived, mutable session row keyed by `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: AgentType,
    pub status: SessionStatus,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub assigned_task: Option<String>,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    pub progress_percent: i32,
    #[serde(default)]
    pub estimated_completion: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub terminated_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }
}

/// Row inserted on `agent.session.started`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAgentSession {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: AgentType,
    pub channel: Option<String>,
    pub assigned_task: Option<String>,
    pub parent_session_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl NewAgentSession {
    pub fn from_event(event: &OperationEvent, payload: &SessionStartedPayload) -> Self {
        Self {
            session_id: event.session_id.clone(),
            agent_id: event.agent_id.clone(),
            agent_name: payload
                .agent_name
                .clone()
                .unwrap_or_else(|| event.agent_id.clone()),
            agent_type: payload.agent_type,
            channel: payload.channel.clone(),
            assigned_task: payload.assigned_task.clone(),
            parent_session_id: payload.parent_session_id.clone(),
            started_at: event.timestamp,
        }
    }

    /// The row as first stored (`status=active`, progress 0).
    pub fn into_session(self) -> AgentSession {
        AgentSession {
            session_id: self.session_id,
            agent_id: self.agent_id,
            agent_name: self.agent_name,
            agent_type: self.agent_type,
            status: SessionStatus::Active,
            channel: self.channel,
            assigned_task: self.assigned_task,
            parent_session_id: self.parent_session_id,
            progress_percent: 0,
            estimated_completion: None,
            summary: None,
            started_at: self.started_at,
            terminated_at: None,
            last_activity_at: self.started_at,
        }
    }
}

/// Mutation applied on `agent.session.terminated` / `subagent.completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTermination {
    pub terminated_at: DateTime<Utc>,
    pub summary: Option<String>,
}

/// Mutation applied on `agent.status_updated`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub progress_percent: Option<i32>,
    pub estimated_completion: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Viewer identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(alias = "id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> JsonMap {
        match value {
            JsonValue::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_event_kind_round_trip_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("custom.thing"), None);
    }

    #[test]
    fn test_operation_event_wire_shape() {
        let event = OperationEvent::new(
            "agent.session.started",
            "main",
            "S1",
            map(json!({"agent_name": "Planner"})),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "agent.session.started");
        assert!(value["id"]
            .as_str()
            .unwrap()
            .starts_with("evt-agent.session.started-"));
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["id", "type", "timestamp", "agent_id", "session_id", "payload"]
        );
    }

    #[test]
    fn test_missing_payload_is_rejected() {
        let raw = json!({
            "id": "evt-x-1",
            "type": "x",
            "timestamp": "2026-10-17T10:00:00Z",
            "agent_id": "a",
            "session_id": "s"
        });
        assert!(serde_json::from_value::<OperationEvent>(raw).is_err());
    }

    #[test]
    fn test_null_payload_is_rejected() {
        let raw = json!({
            "id": "evt-x-1",
            "type": "x",
            "timestamp": "2026-10-17T10:00:00Z",
            "agent_id": "a",
            "session_id": "s",
            "payload": null
        });
        assert!(serde_json::from_value::<OperationEvent>(raw).is_err());
    }

    #[test]
    fn test_decode_known_payloads() {
        let started = EventPayload::decode(
            "agent.session.started",
            &map(json!({"agent_name": "Planner", "agent_type": "subagent"})),
        );
        match started {
            EventPayload::SessionStarted(p) => {
                assert_eq!(p.agent_name.as_deref(), Some("Planner"));
                assert_eq!(p.agent_type, AgentType::Subagent);
            }
            other => panic!("unexpected {:?}", other),
        }

        let moved = EventPayload::decode(
            "task.state_changed",
            &map(json!({"task_id": "T1", "to_status": "in_progress"})),
        );
        assert!(matches!(
            moved,
            EventPayload::TaskStateChanged(TaskStateChangedPayload {
                to_status: TaskStatus::InProgress,
                ..
            })
        ));

        let completed =
            EventPayload::decode("subagent.completed", &map(json!({"subagent_id": "sa-1"})));
        match completed {
            EventPayload::SubagentCompleted(p) => assert!(p.success),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_falls_back_to_opaque() {
        let unknown = EventPayload::decode("deploy.finished", &map(json!({"env": "prod"})));
        assert!(matches!(unknown, EventPayload::Opaque(_)));
        assert_eq!(unknown.kind(), None);

        // Known type, wrong shape
        let malformed = EventPayload::decode(
            "task.state_changed",
            &map(json!({"task_id": "T1", "to_status": "archived"})),
        );
        assert!(matches!(malformed, EventPayload::Opaque(_)));
    }

    #[test]
    fn test_status_payload_progress_is_clamped() {
        let payload = StatusUpdatedPayload {
            agent_type: AgentType::Main,
            subagent_id: None,
            status: Some("working".to_string()),
            progress_percent: Some(140.0),
            estimated_completion: None,
            current_action: None,
        };
        assert_eq!(payload.progress(), Some(100));
        assert_eq!(clamp_progress(-3.0), 0);
        assert_eq!(clamp_progress(49.6), 50);
        assert_eq!(clamp_progress(f64::NAN), 0);
    }

    #[test]
    fn test_session_status_from_reported() {
        assert_eq!(SessionStatus::from_reported("working"), SessionStatus::Active);
        assert_eq!(SessionStatus::from_reported("active"), SessionStatus::Active);
        assert_eq!(SessionStatus::from_reported("idle"), SessionStatus::Idle);
        assert_eq!(SessionStatus::from_reported("waiting"), SessionStatus::Idle);
    }

    #[test]
    fn test_progress_only_status_update_decodes() {
        let decoded = EventPayload::decode(
            "agent.status_updated",
            &map(json!({"progress_percent": 50})),
        );
        let EventPayload::StatusUpdated(payload) = decoded else {
            panic!("expected a typed status update, got {:?}", decoded);
        };
        assert_eq!(payload.status, None);
        assert_eq!(payload.progress(), Some(50));
        assert_eq!(payload.session_status(), SessionStatus::Idle);
    }

    #[test]
    fn test_to_map_round_trips_typed_payload() {
        let payload = EventPayload::SubagentSpawned(SubagentSpawnedPayload {
            subagent_id: "sa-1".to_string(),
            agent_name: Some("Researcher".to_string()),
            parent_session_id: None,
            assigned_task: None,
        });
        let encoded = payload.to_map();
        assert_eq!(encoded["subagent_id"], "sa-1");
        assert!(!encoded.contains_key("parent_session_id"));
        assert_eq!(EventPayload::decode("subagent.spawned", &encoded), payload);
    }

    #[test]
    fn test_envelope_uses_timestamp_on_the_wire() {
        let envelope = SignedEnvelope {
            event: OperationEvent::new("agent.error", "a", "s", JsonMap::new()),
            timestamp_ms: 1_700_000_000_000,
            signature: None,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert!(value.get("signature").is_none());
    }

    #[test]
    fn test_new_session_defaults_name_to_agent_id() {
        let event = OperationEvent::new("agent.session.started", "main", "S1", JsonMap::new());
        let row = NewAgentSession::from_event(&event, &SessionStartedPayload::default())
            .into_session();
        assert_eq!(row.agent_name, "main");
        assert_eq!(row.status, SessionStatus::Active);
        assert_eq!(row.progress_percent, 0);
        assert_eq!(row.last_activity_at, event.timestamp);
    }

    #[test]
    fn test_user_identity_accepts_id_alias() {
        let identity: UserIdentity =
            serde_json::from_value(json!({"id": "u-1", "email": "ops@example.com"})).unwrap();
        assert_eq!(identity.user_id, "u-1");
    }
}
