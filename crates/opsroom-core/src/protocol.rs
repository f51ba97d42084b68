//! WebSocket gateway wire protocol.
//!
//! Server → client frames are always [`ServerMessage`]:
//!
//! ```text
//! {"channel":"agent_events","message_id":"evt-...","timestamp":"...","data":{...}}
//! ```
//!
//! Client → server frames are [`ClientMessage`]. The `_system` channel is
//! reserved for ping/pong, connection notices and errors; it never carries
//! store changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults::SYSTEM_CHANNEL;
use crate::ids;

/// Maximum accepted channel name length.
pub const MAX_CHANNEL_LEN: usize = 64;

/// Frame pushed to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub channel: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: JsonValue,
}

impl ServerMessage {
    /// Wrap a store change for delivery.
    pub fn from_change(change: StoreChange) -> Self {
        Self {
            channel: change.channel,
            message_id: change.message_id,
            timestamp: Utc::now(),
            data: change.data,
        }
    }

    /// Build a `_system` control frame.
    pub fn system(notice: SystemNotice) -> Self {
        Self {
            channel: SYSTEM_CHANNEL.to_string(),
            message_id: ids::new_v7().to_string(),
            timestamp: Utc::now(),
            data: serde_json::to_value(&notice).unwrap_or(JsonValue::Null),
        }
    }

    pub fn is_system(&self) -> bool {
        self.channel == SYSTEM_CHANNEL
    }

    /// Decode the `data` of a `_system` frame.
    pub fn notice(&self) -> Option<SystemNotice> {
        if !self.is_system() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Control payloads carried on `_system`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemNotice {
    Connected {
        connection_id: String,
        user_id: String,
    },
    Pong,
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Error {
        message: String,
    },
}

/// What a client asks the gateway to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// Frame sent by a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ClientAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ClientMessage {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::action(channel, ClientAction::Subscribe)
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::action(channel, ClientAction::Unsubscribe)
    }

    pub fn ping() -> Self {
        Self::action(SYSTEM_CHANNEL, ClientAction::Ping)
    }

    fn action(channel: impl Into<String>, action: ClientAction) -> Self {
        Self {
            channel: channel.into(),
            action: Some(action),
            message_id: None,
            data: None,
        }
    }
}

/// A row change reported by the store, before it is stamped for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub channel: String,
    /// Stable id of this change; duplicates of the same change share it.
    pub message_id: String,
    pub data: JsonValue,
}

/// Whether a client may subscribe to `channel`.
///
/// Names are short lowercase identifiers; `_system` and other `_`-prefixed
/// names are reserved.
pub fn is_subscribable_channel(channel: &str) -> bool {
    !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_LEN
        && !channel.starts_with('_')
        && channel
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"_:.-".contains(&b))
}
