//! In-memory store.
//!
//! Implements the same repository traits as the Postgres store and reports
//! row changes straight to a [`ChangeSink`], standing in for the database's
//! `LISTEN/NOTIFY` stream. Used by tests and by the API when no
//! `DATABASE_URL` is configured.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;

use opsroom_core::logging;
use opsroom_core::{
    AgentSession, ChangeSink, EventRepository, InsertOutcome, NewAgentSession, OperationEvent,
    Result, SessionRepository, SessionStatus, SessionTermination, StatusUpdate, StoreChange,
};

use crate::changes::{event_change, session_change};

#[derive(Default)]
struct Tables {
    /// Insertion order, for stable ordering among equal timestamps.
    events: Vec<OperationEvent>,
    event_index: HashMap<String, usize>,
    sessions: HashMap<String, AgentSession>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    sink: RwLock<Option<Arc<dyn ChangeSink>>>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, change: Result<StoreChange>) {
        let change = match change {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(
                    subsystem = logging::DATABASE,
                    component = logging::MEMORY_STORE,
                    error = %e,
                    "Failed to build change notification"
                );
                return;
            }
        };
        let sink = self.sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(sink) = sink {
            sink.publish(change);
        }
    }
}

/// In-memory store, split into the same repositories as [`crate::Database`].
///
/// Clones share the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    pub events: MemoryEventRepository,
    pub sessions: MemorySessionRepository,
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        Self {
            events: MemoryEventRepository {
                shared: shared.clone(),
            },
            sessions: MemorySessionRepository {
                shared: shared.clone(),
            },
            shared,
        }
    }

    /// Store that reports every row change to `sink`.
    pub fn with_sink(sink: Arc<dyn ChangeSink>) -> Self {
        let store = Self::new();
        store.set_sink(sink);
        store
    }

    pub fn set_sink(&self, sink: Arc<dyn ChangeSink>) {
        *self.shared.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory raw event log.
#[derive(Clone)]
pub struct MemoryEventRepository {
    shared: Arc<Shared>,
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn insert(&self, event: &OperationEvent, _signed_at_ms: i64) -> Result<InsertOutcome> {
        {
            let mut tables = self.shared.tables();
            if tables.event_index.contains_key(&event.id) {
                return Ok(InsertOutcome::Duplicate);
            }
            let position = tables.events.len();
            tables.events.push(event.clone());
            tables.event_index.insert(event.id.clone(), position);
        }
        self.shared.notify(event_change(event));
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: &str) -> Result<Option<OperationEvent>> {
        let tables = self.shared.tables();
        Ok(tables
            .event_index
            .get(id)
            .and_then(|&i| tables.events.get(i))
            .cloned())
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationEvent>> {
        let mut events: Vec<OperationEvent> = self
            .shared
            .tables()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        // stable: ties keep arrival order
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.shared.tables().events.len() as i64)
    }
}

/// In-memory session rows.
#[derive(Clone)]
pub struct MemorySessionRepository {
    shared: Arc<Shared>,
}

impl MemorySessionRepository {
    /// Apply `mutate` to a row and announce the new state if it was found.
    fn modify<F>(&self, session_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut AgentSession) -> bool,
    {
        let updated = {
            let mut tables = self.shared.tables();
            match tables.sessions.get_mut(session_id) {
                Some(row) => mutate(row).then(|| row.clone()),
                None => None,
            }
        };
        match updated {
            Some(row) => {
                self.shared.notify(session_change(&row));
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert_started(&self, session: &NewAgentSession) -> Result<InsertOutcome> {
        let row = {
            let mut tables = self.shared.tables();
            if tables.sessions.contains_key(&session.session_id) {
                return Ok(InsertOutcome::Duplicate);
            }
            let row = session.clone().into_session();
            tables.sessions.insert(row.session_id.clone(), row.clone());
            row
        };
        self.shared.notify(session_change(&row));
        Ok(InsertOutcome::Inserted)
    }

    async fn mark_terminated(
        &self,
        session_id: &str,
        termination: &SessionTermination,
    ) -> Result<bool> {
        Ok(self.modify(session_id, |row| {
            row.status = SessionStatus::Terminated;
            row.terminated_at = Some(termination.terminated_at);
            row.progress_percent = 100;
            if termination.summary.is_some() {
                row.summary = termination.summary.clone();
            }
            row.last_activity_at = row.last_activity_at.max(termination.terminated_at);
            true
        }))
    }

    async fn update_status(&self, session_id: &str, update: &StatusUpdate) -> Result<bool> {
        Ok(self.modify(session_id, |row| {
            if row.is_terminated() {
                return false;
            }
            row.status = update.status;
            if let Some(progress) = update.progress_percent {
                row.progress_percent = progress;
            }
            if update.estimated_completion.is_some() {
                row.estimated_completion = update.estimated_completion.clone();
            }
            row.last_activity_at = update.last_activity_at;
            true
        }))
    }

    async fn get(&self, session_id: &str) -> Result<Option<AgentSession>> {
        Ok(self.shared.tables().sessions.get(session_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<AgentSession>> {
        let mut rows: Vec<AgentSession> = self
            .shared
            .tables()
            .sessions
            .values()
            .filter(|s| !s.is_terminated())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(rows)
    }
}
