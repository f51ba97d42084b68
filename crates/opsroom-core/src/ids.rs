//! Identifier helpers.
//!
//! Operation events use `evt-<type>-<uuidv4>` ids chosen by the producer.
//! Server-side ids (connections, system messages) are UUIDv7 so they sort by
//! creation time in logs.

use uuid::Uuid;

const EVENT_ID_PREFIX: &str = "evt-";

/// Generate a fresh event id for the given event type.
///
/// ```
/// use opsroom_core::ids::{is_event_id, new_event_id};
///
/// let id = new_event_id("agent.session.started");
/// assert!(id.starts_with("evt-agent.session.started-"));
/// assert!(is_event_id(&id));
/// ```
pub fn new_event_id(event_type: &str) -> String {
    format!("{}{}-{}", EVENT_ID_PREFIX, event_type, Uuid::new_v4())
}

/// Whether `id` has the `evt-<type>-<uuid>` shape.
pub fn is_event_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(EVENT_ID_PREFIX) else {
        return false;
    };
    // The uuid is the trailing 36 characters, separated from a non-empty type.
    if rest.len() < 38 || !rest.is_char_boundary(rest.len() - 37) {
        return false;
    }
    let (event_type, tail) = rest.split_at(rest.len() - 37);
    !event_type.is_empty() && tail.starts_with('-') && Uuid::parse_str(&tail[1..]).is_ok()
}

/// Extract the event type embedded in an event id.
pub fn event_type_of(id: &str) -> Option<&str> {
    if !is_event_id(id) {
        return None;
    }
    let rest = &id[EVENT_ID_PREFIX.len()..];
    Some(&rest[..rest.len() - 37])
}

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
