//! Row-change notifications.
//!
//! Every insert/update on `agent_events` and `agent_sessions` becomes one
//! [`StoreChange`] on the channel named after the table. Event changes are
//! identified by the event id; session changes by a digest of the row
//! content, so re-announcing the same row state yields the same id and is
//! dropped by the gateway's per-connection dedup.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use opsroom_core::defaults::{EVENTS_CHANNEL, SESSIONS_CHANNEL};
use opsroom_core::{AgentSession, Error, OperationEvent, Result, StoreChange};

/// Change for a newly stored raw event.
pub fn event_change(event: &OperationEvent) -> Result<StoreChange> {
    Ok(StoreChange {
        channel: EVENTS_CHANNEL.to_string(),
        message_id: event.id.clone(),
        data: serde_json::to_value(event)?,
    })
}

/// Change for an inserted or updated session row.
pub fn session_change(session: &AgentSession) -> Result<StoreChange> {
    let data = serde_json::to_value(session)?;
    Ok(StoreChange {
        channel: SESSIONS_CHANNEL.to_string(),
        message_id: content_digest(&session.session_id, &data)?,
        data,
    })
}

/// `<key>:<sha256 of the JSON body>`, hex encoded.
pub fn content_digest(key: &str, data: &JsonValue) -> Result<String> {
    let bytes = serde_json::to_vec(data)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{}:{}", key, hex::encode(digest)))
}

/// A decoded `NOTIFY` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Event(OperationEvent),
    Session(AgentSession),
    /// Row too large for a notification; read it back by key.
    Truncated { channel: String, key: String },
}

#[derive(Deserialize)]
struct TruncatedMarker {
    key: String,
    #[serde(default)]
    truncated: bool,
}

/// Decode the payload of a notification received on `channel`.
pub fn decode_notification(channel: &str, payload: &str) -> Result<Notification> {
    let value: JsonValue = serde_json::from_str(payload)?;
    if let Ok(marker) = serde_json::from_value::<TruncatedMarker>(value.clone()) {
        if marker.truncated {
            return Ok(Notification::Truncated {
                channel: channel.to_string(),
                key: marker.key,
            });
        }
    }
    match channel {
        EVENTS_CHANNEL => Ok(Notification::Event(serde_json::from_value(value)?)),
        SESSIONS_CHANNEL => Ok(Notification::Session(serde_json::from_value(value)?)),
        other => Err(Error::InvalidInput(format!(
            "Unexpected notification channel: {}",
            other
        ))),
    }
}
