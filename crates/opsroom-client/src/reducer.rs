//! Viewer-side derived state.
//!
//! [`RoomState`] is a fold over the operation events a viewer receives. The
//! gateway delivers at least once and in no guaranteed order, so every
//! collection except the live feed is keyed by a stable id and updated with
//! upserts. Terminal states absorb later updates.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use opsroom_core::defaults::{EVENTS_CHANNEL, LIVE_FEED_CAPACITY, SESSIONS_CHANNEL};
use opsroom_core::logging;
use opsroom_core::{
    AgentSession, AgentType, EventPayload, OperationEvent, ServerMessage, TaskStatus,
};

/// Status of an agent as the viewer shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Spawned,
    Active,
    Working,
    Idle,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    /// Map a reported status string. Unknown values count as active.
    pub fn from_reported(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "working" => AgentStatus::Working,
            "idle" | "waiting" => AgentStatus::Idle,
            "spawned" => AgentStatus::Spawned,
            _ => AgentStatus::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Terminated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainAgent {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub status: AgentStatus,
    pub progress: i32,
    pub current_action: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgent {
    pub id: String,
    pub name: Option<String>,
    pub parent_session_id: Option<String>,
    pub assigned_task: Option<String>,
    pub status: AgentStatus,
    pub progress: i32,
    pub summary: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

impl SubAgent {
    fn new(id: &str, status: AgentStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            parent_session_id: None,
            assigned_task: None,
            status,
            progress: 0,
            summary: None,
            last_activity_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Tasks partitioned into ordered status buckets.
///
/// A task id lives in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFlow {
    pub backlog: Vec<Task>,
    pub todo: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub review: Vec<Task>,
    pub done: Vec<Task>,
}

impl TaskFlow {
    pub fn bucket(&self, status: TaskStatus) -> &[Task] {
        match status {
            TaskStatus::Backlog => &self.backlog,
            TaskStatus::Todo => &self.todo,
            TaskStatus::InProgress => &self.in_progress,
            TaskStatus::Review => &self.review,
            TaskStatus::Done => &self.done,
        }
    }

    fn bucket_mut(&mut self, status: TaskStatus) -> &mut Vec<Task> {
        match status {
            TaskStatus::Backlog => &mut self.backlog,
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Review => &mut self.review,
            TaskStatus::Done => &mut self.done,
        }
    }

    /// Bucket currently holding `task_id`.
    pub fn locate(&self, task_id: &str) -> Option<TaskStatus> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| self.bucket(*status).iter().any(|t| t.id == task_id))
    }

    pub fn len(&self) -> usize {
        TaskStatus::ALL
            .iter()
            .map(|status| self.bucket(*status).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move `task_id` to the end of `to`. A task already in `to` keeps its
    /// place; only a newly provided title is applied.
    pub fn move_task(
        &mut self,
        task_id: &str,
        title: Option<&str>,
        to: TaskStatus,
        at: DateTime<Utc>,
    ) {
        let existing = match self.locate(task_id) {
            Some(current) if current == to => {
                if let Some(task) = self.bucket_mut(to).iter_mut().find(|t| t.id == task_id) {
                    if title.is_some() {
                        task.title = title.map(str::to_string);
                    }
                }
                return;
            }
            Some(current) => {
                let bucket = self.bucket_mut(current);
                bucket
                    .iter()
                    .position(|t| t.id == task_id)
                    .map(|index| bucket.remove(index))
            }
            None => None,
        };

        let task = match existing {
            Some(mut task) => {
                if title.is_some() {
                    task.title = title.map(str::to_string);
                }
                task.updated_at = at;
                task
            }
            None => Task {
                id: task_id.to_string(),
                title: title.map(str::to_string),
                updated_at: at,
            },
        };
        self.bucket_mut(to).push(task);
    }
}

/// Most-recent-first window over received events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFeed {
    entries: VecDeque<OperationEvent>,
    capacity: usize,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend `event`, evicting the oldest entry when full.
    pub fn push(&mut self, event: OperationEvent) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationEvent> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&OperationEvent> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(LIVE_FEED_CAPACITY)
    }
}

/// Everything a viewer derives from the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub main_agent: Option<MainAgent>,
    /// Sub-agents by id.
    pub subagents: BTreeMap<String, SubAgent>,
    pub tasks: TaskFlow,
    pub feed: LiveFeed,
    /// Session rows from the `agent_sessions` channel, by session id.
    pub roster: BTreeMap<String, AgentSession>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &OperationEvent) {
        let payload = event.typed_payload();
        let at = event.timestamp;

        match payload {
            EventPayload::SessionStarted(p) => match p.agent_type {
                AgentType::Main => {
                    let running = self
                        .main_agent
                        .as_ref()
                        .is_some_and(|main| main.session_id == event.session_id);
                    if running {
                        // repeated or late start for the same session
                        if let Some(main) = self.main_agent.as_mut() {
                            main.agent_name = main.agent_name.take().or(p.agent_name);
                        }
                    } else {
                        self.main_agent = Some(MainAgent {
                            session_id: event.session_id.clone(),
                            agent_id: event.agent_id.clone(),
                            agent_name: p.agent_name,
                            status: AgentStatus::Active,
                            progress: 0,
                            current_action: None,
                            last_activity_at: at,
                        });
                    }
                }
                AgentType::Subagent => {
                    let sub = self.upsert_subagent(&event.agent_id, AgentStatus::Active, at);
                    if sub.status == AgentStatus::Spawned {
                        sub.status = AgentStatus::Active;
                    }
                    sub.name = sub.name.take().or(p.agent_name);
                    sub.parent_session_id = sub.parent_session_id.take().or(p.parent_session_id);
                    sub.assigned_task = sub.assigned_task.take().or(p.assigned_task);
                }
            },
            EventPayload::SubagentSpawned(p) => {
                let sub = self.upsert_subagent(&p.subagent_id, AgentStatus::Spawned, at);
                sub.name = sub.name.take().or(p.agent_name);
                sub.parent_session_id = sub
                    .parent_session_id
                    .take()
                    .or(p.parent_session_id)
                    .or_else(|| Some(event.session_id.clone()));
                sub.assigned_task = sub.assigned_task.take().or(p.assigned_task);
            }
            EventPayload::StatusUpdated(p) => {
                // progress-only updates keep the current status
                let status = p.status.as_deref().map(AgentStatus::from_reported);
                let progress = p.progress();
                match p.agent_type {
                    AgentType::Main => {
                        let main = self.main_agent.get_or_insert_with(|| MainAgent {
                            session_id: event.session_id.clone(),
                            agent_id: event.agent_id.clone(),
                            agent_name: None,
                            status: status.unwrap_or(AgentStatus::Active),
                            progress: 0,
                            current_action: None,
                            last_activity_at: at,
                        });
                        if !main.status.is_terminal() {
                            if let Some(status) = status {
                                main.status = status;
                            }
                            if let Some(progress) = progress {
                                main.progress = progress;
                            }
                            if p.current_action.is_some() {
                                main.current_action = p.current_action;
                            }
                            main.last_activity_at = main.last_activity_at.max(at);
                        }
                    }
                    AgentType::Subagent => {
                        let id = p.subagent_id.as_deref().unwrap_or(&event.agent_id);
                        let sub =
                            self.upsert_subagent(id, status.unwrap_or(AgentStatus::Active), at);
                        if !sub.status.is_terminal() {
                            if let Some(status) = status {
                                sub.status = status;
                            }
                            if let Some(progress) = progress {
                                sub.progress = progress;
                            }
                            sub.last_activity_at = sub.last_activity_at.max(at);
                        }
                    }
                }
            }
            EventPayload::SubagentCompleted(p) => {
                let id = p.subagent_id.as_deref().unwrap_or(&event.agent_id);
                let final_status = if p.success {
                    AgentStatus::Completed
                } else {
                    AgentStatus::Failed
                };
                let sub = self.upsert_subagent(id, final_status, at);
                if !sub.status.is_terminal() {
                    sub.status = final_status;
                    if p.success {
                        sub.progress = 100;
                    }
                    sub.summary = p.summary;
                    sub.last_activity_at = sub.last_activity_at.max(at);
                }
            }
            EventPayload::SessionTerminated(_) => {
                if let Some(main) = self
                    .main_agent
                    .as_mut()
                    .filter(|m| m.session_id == event.session_id)
                {
                    main.status = AgentStatus::Terminated;
                    main.progress = 100;
                    main.last_activity_at = main.last_activity_at.max(at);
                }
            }
            EventPayload::TaskStateChanged(p) => {
                self.tasks
                    .move_task(&p.task_id, p.title.as_deref(), p.to_status, at);
            }
            EventPayload::AgentError(_) | EventPayload::Opaque(_) => {
                trace!(
                    subsystem = logging::CLIENT,
                    component = logging::REDUCER,
                    event_type = %event.event_type,
                    "Feed-only event"
                );
            }
        }

        self.feed.push(event.clone());
    }

    /// Upsert a row from the `agent_sessions` channel.
    pub fn apply_session(&mut self, session: AgentSession) {
        self.roster.insert(session.session_id.clone(), session);
    }

    /// Route a gateway message by channel. Returns whether state changed.
    pub fn apply_message(&mut self, message: &ServerMessage) -> bool {
        match message.channel.as_str() {
            EVENTS_CHANNEL => match serde_json::from_value::<OperationEvent>(message.data.clone())
            {
                Ok(event) => {
                    self.apply(&event);
                    true
                }
                Err(e) => {
                    tracing::debug!(
                        subsystem = logging::CLIENT,
                        component = logging::REDUCER,
                        message_id = %message.message_id,
                        error = %e,
                        "Undecodable event message"
                    );
                    false
                }
            },
            SESSIONS_CHANNEL => match serde_json::from_value::<AgentSession>(message.data.clone())
            {
                Ok(session) => {
                    self.apply_session(session);
                    true
                }
                Err(e) => {
                    tracing::debug!(
                        subsystem = logging::CLIENT,
                        component = logging::REDUCER,
                        message_id = %message.message_id,
                        error = %e,
                        "Undecodable session message"
                    );
                    false
                }
            },
            _ => false,
        }
    }

    fn upsert_subagent(
        &mut self,
        id: &str,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> &mut SubAgent {
        self.subagents
            .entry(id.to_string())
            .or_insert_with(|| SubAgent::new(id, status, at))
    }
}

/// Pure form of [`RoomState::apply`].
pub fn reduce(state: &RoomState, event: &OperationEvent) -> RoomState {
    let mut next = state.clone();
    next.apply(event);
    next
}
