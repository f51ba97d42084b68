//! Core traits for the Operations Room's external collaborators.
//!
//! The relational store and the identity service are external; these traits
//! are the seams the ingestion endpoint and the gateway depend on, so the
//! Postgres implementation and the in-memory test double are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;
use crate::protocol::StoreChange;

// =============================================================================
// STORE
// =============================================================================

/// Append-only raw event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert a raw event. A duplicate `id` is reported, not an error.
    async fn insert(&self, event: &OperationEvent, signed_at_ms: i64) -> Result<InsertOutcome>;

    /// Fetch one event by id.
    async fn get(&self, id: &str) -> Result<Option<OperationEvent>>;

    /// All events of a session, oldest first (by producer timestamp).
    async fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationEvent>>;

    /// Total stored events.
    async fn count(&self) -> Result<i64>;
}

/// Derived session rows.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a session row unless one already exists for its `session_id`.
    async fn insert_started(&self, session: &NewAgentSession) -> Result<InsertOutcome>;

    /// Mark a session terminated. Returns `false` when no row matched.
    async fn mark_terminated(
        &self,
        session_id: &str,
        termination: &SessionTermination,
    ) -> Result<bool>;

    /// Apply a status update to a non-terminated session.
    /// Returns `false` when no row matched.
    async fn update_status(&self, session_id: &str, update: &StatusUpdate) -> Result<bool>;

    /// Fetch one session row.
    async fn get(&self, session_id: &str) -> Result<Option<AgentSession>>;

    /// Sessions that are not terminated, most recently active first.
    async fn list_active(&self) -> Result<Vec<AgentSession>>;
}

/// Receives one callback per store row change.
///
/// The gateway's hub implements this; the store's change stream drives it.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: StoreChange);
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Exchanges a bearer token for a viewer identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with `Error::Unauthorized` for invalid/expired tokens and
    /// `Error::UpstreamUnavailable` when the service cannot be reached.
    async fn authenticate(&self, token: &str) -> Result<UserIdentity>;
}
