//! Structured logging schema for the Operations Room.
//!
//! Every `tracing` event carries a `subsystem` field and, below the top
//! level, a `component` field. Their values are the constants in this
//! module, so log aggregation can filter on the same strings in every crate:
//!
//! ```ignore
//! use opsroom_core::logging;
//!
//! tracing::debug!(subsystem = logging::GATEWAY, component = logging::HUB, "Hub publish");
//! ```
//!
//! Other common fields: `event_id`, `event_type`, `session_id`,
//! `connection_id`, `user_id`, `channel`, `message_id`, `error`,
//! `error_kind` (taxonomy name such as `InvalidSignature`).
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (rejected envelope, failed side effect) |
//! | INFO  | Lifecycle events (startup, connection open/close, ingestion) |
//! | DEBUG | Decision points (dedup drops, subscription changes) |
//! | TRACE | Per-message fan-out |

// ─── Subsystems ────────────────────────────────────────────────────────────

/// Signed event ingestion and its side effects.
pub const INGEST: &str = "ingest";

/// WebSocket fan-out gateway.
pub const GATEWAY: &str = "gateway";

/// Bearer token checks on viewer routes.
pub const AUTH: &str = "auth";

/// Relational store, pool and change stream.
pub const DATABASE: &str = "database";

/// Viewer side: reconnect loop and reducer.
pub const CLIENT: &str = "client";

/// Agent-side logging client.
pub const LOGGER: &str = "logger";

// ─── Components ────────────────────────────────────────────────────────────

/// Per-channel broadcast hub.
pub const HUB: &str = "hub";

/// Postgres `LISTEN` loop.
pub const LISTENER: &str = "listener";

/// In-memory store.
pub const MEMORY_STORE: &str = "memory_store";

/// Connection pool.
pub const POOL: &str = "pool";

/// Viewer reconnect loop.
pub const VIEWER: &str = "viewer";

/// Derived room state.
pub const REDUCER: &str = "reducer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_are_distinct_snake_case() {
        let values = [
            INGEST,
            GATEWAY,
            AUTH,
            DATABASE,
            CLIENT,
            LOGGER,
            HUB,
            LISTENER,
            MEMORY_STORE,
            POOL,
            VIEWER,
            REDUCER,
        ];
        let unique: std::collections::HashSet<_> = values.iter().collect();
        assert_eq!(unique.len(), values.len());
        assert!(values
            .iter()
            .all(|v| v.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')));
    }
}
