//! Centralized default constants for the Operations Room.
//!
//! **This module is the single source of truth** for shared default values.
//! Server configuration, the gateway, and the client layer reference these
//! constants instead of defining their own magic numbers.

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Interval between connection pool health log lines.
pub const POOL_METRICS_INTERVAL_SECS: u64 = 60;

/// Default bind host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Maximum accepted ingestion request body in bytes.
pub const INGEST_MAX_BODY_BYTES: usize = 256 * 1024;

/// Ingestion route.
pub const INGEST_PATH: &str = "/operations/log";

/// Header carrying the envelope signature (mirrors the in-body `signature`).
pub const SIGNATURE_HEADER: &str = "x-operations-signature";

// =============================================================================
// GATEWAY
// =============================================================================

/// Global cap on concurrent WebSocket connections.
pub const WS_MAX_CONNECTIONS: usize = 1000;

/// Interval between heartbeat pings.
pub const WS_HEARTBEAT_SECS: u64 = 30;

/// Connections silent for longer than this are closed.
pub const WS_IDLE_TIMEOUT_SECS: u64 = 300;

/// Per-connection dedup cache capacity.
pub const DEDUP_CAPACITY: usize = 1000;

/// Buffered messages per channel before slow connections start lagging.
pub const CHANNEL_BUFFER: usize = 256;

/// Buffered outbound messages per connection.
pub const CONNECTION_OUTBOX: usize = 256;

/// Close reason sent on idle timeout.
pub const IDLE_CLOSE_REASON: &str = "Idle timeout.";

// =============================================================================
// CHANNELS
// =============================================================================

/// Reserved control channel (ping/pong, connected, errors).
pub const SYSTEM_CHANNEL: &str = "_system";

/// Raw event change stream.
pub const EVENTS_CHANNEL: &str = "agent_events";

/// Derived session row change stream.
pub const SESSIONS_CHANNEL: &str = "agent_sessions";

// =============================================================================
// CLIENT
// =============================================================================

/// Reconnect backoff floor in milliseconds.
pub const RECONNECT_FLOOR_MS: u64 = 1_000;

/// Reconnect backoff ceiling in milliseconds.
pub const RECONNECT_CEILING_MS: u64 = 30_000;

/// Live feed capacity (most recent events kept).
pub const LIVE_FEED_CAPACITY: usize = 50;

/// Logging client request timeout in seconds.
pub const LOGGER_TIMEOUT_SECS: u64 = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds_ordered() {
        assert!(RECONNECT_FLOOR_MS < RECONNECT_CEILING_MS);
    }

    #[test]
    fn test_heartbeat_shorter_than_idle_timeout() {
        assert!(WS_HEARTBEAT_SECS < WS_IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn test_channels_distinct() {
        assert_ne!(EVENTS_CHANNEL, SESSIONS_CHANNEL);
        assert!(SYSTEM_CHANNEL.starts_with('_'));
    }
}
