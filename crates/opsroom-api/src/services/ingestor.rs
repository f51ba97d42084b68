//! Event ingestion pipeline.
//!
//! `verify -> validate -> persist raw event -> derive session state`.
//! Only the first three steps decide the response. Once the raw event is
//! stored, session side effects are best effort: failures are logged and
//! repaired later by [`Ingestor::replay_session`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use opsroom_core::logging;
use opsroom_core::{
    Error, EventKind, EventPayload, EventRepository, NewAgentSession, OperationEvent,
    SessionRepository, SessionStartedPayload, SessionTermination, StatusUpdate,
};
use opsroom_crypto::EnvelopeSigner;

/// Why an envelope was refused.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Empty body, bad JSON, or not an envelope object.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed correctly but the event is not a valid operation event.
    #[error("Invalid event structure: {0}")]
    InvalidEventStructure(String),

    /// The raw event could not be stored.
    #[error("Store unavailable: {0}")]
    Store(#[source] Error),
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    pub event_id: String,
    /// The event id was already stored; nothing changed.
    pub duplicate: bool,
}

/// Which derived-state mutation an event caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    SessionCreated,
    SessionAlreadyExists,
    SessionTerminated,
    StatusUpdated,
    /// The target session row does not exist, or is terminated.
    NoMatchingSession,
    None,
}

/// Outcome of replaying a session's events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub session_id: String,
    pub events: usize,
    pub applied: usize,
    pub failed: usize,
}

const REQUIRED_EVENT_FIELDS: [&str; 6] =
    ["id", "type", "timestamp", "agent_id", "session_id", "payload"];

/// Verifies, stores and applies operation events.
pub struct Ingestor {
    events: Arc<dyn EventRepository>,
    sessions: Arc<dyn SessionRepository>,
    signer: EnvelopeSigner,
}

impl Ingestor {
    pub fn new(
        events: Arc<dyn EventRepository>,
        sessions: Arc<dyn SessionRepository>,
        signer: EnvelopeSigner,
    ) -> Self {
        Self {
            events,
            sessions,
            signer,
        }
    }

    /// Run the full pipeline on a raw request body.
    ///
    /// `header_signature` is used when the body carries no `signature`.
    pub async fn ingest(
        &self,
        body: &[u8],
        header_signature: Option<&str>,
    ) -> Result<IngestReceipt, IngestError> {
        let start = Instant::now();
        let envelope = parse_envelope(body)?;

        let signature = envelope
            .get("signature")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| header_signature.filter(|s| !s.trim().is_empty()))
            .ok_or(IngestError::MissingSignature)?;

        let (Some(event_value), Some(timestamp_value)) =
            (envelope.get("event"), envelope.get("timestamp"))
        else {
            return Err(IngestError::MalformedRequest(
                "Envelope must contain event and timestamp".to_string(),
            ));
        };

        if !self
            .signer
            .verify_parts(event_value, timestamp_value, signature)
        {
            return Err(IngestError::InvalidSignature);
        }

        let event = decode_event(event_value)?;
        let signed_at_ms = decode_signed_at(timestamp_value)?;

        let outcome = self
            .events
            .insert(&event, signed_at_ms)
            .await
            .map_err(IngestError::Store)?;

        if !outcome.is_inserted() {
            debug!(
                subsystem = logging::INGEST,
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate event ignored"
            );
            return Ok(IngestReceipt {
                event_id: event.id,
                duplicate: true,
            });
        }

        match self.apply_side_effects(&event).await {
            Ok(effect) => debug!(
                subsystem = logging::INGEST,
                event_id = %event.id,
                session_id = %event.session_id,
                effect = ?effect,
                "Side effects applied"
            ),
            Err(e) => warn!(
                subsystem = logging::INGEST,
                error_kind = "PersistenceFailure",
                event_id = %event.id,
                session_id = %event.session_id,
                error = %e,
                "Derived state update failed; replay the session to repair"
            ),
        }

        info!(
            subsystem = logging::INGEST,
            event_id = %event.id,
            event_type = %event.event_type,
            session_id = %event.session_id,
            agent_id = %event.agent_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Event ingested"
        );

        Ok(IngestReceipt {
            event_id: event.id,
            duplicate: false,
        })
    }

    /// Update the session row an event refers to.
    pub async fn apply_side_effects(
        &self,
        event: &OperationEvent,
    ) -> opsroom_core::Result<SideEffect> {
        let Some(kind) = event.kind() else {
            return Ok(SideEffect::None);
        };
        let payload = event.typed_payload();

        match kind {
            EventKind::SessionStarted => {
                let started = match payload {
                    EventPayload::SessionStarted(p) => p,
                    _ => {
                        warn!(
                            subsystem = logging::INGEST,
                            event_id = %event.id,
                            "Session start payload did not match, using defaults"
                        );
                        SessionStartedPayload::default()
                    }
                };
                let row = NewAgentSession::from_event(event, &started);
                let outcome = self.sessions.insert_started(&row).await?;
                Ok(if outcome.is_inserted() {
                    SideEffect::SessionCreated
                } else {
                    SideEffect::SessionAlreadyExists
                })
            }
            EventKind::SessionTerminated | EventKind::SubagentCompleted => {
                let summary = match payload {
                    EventPayload::SessionTerminated(p) => p.summary,
                    EventPayload::SubagentCompleted(p) => p.summary,
                    EventPayload::Opaque(map) => map
                        .get("summary")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    _ => None,
                };
                let termination = SessionTermination {
                    terminated_at: event.timestamp,
                    summary,
                };
                let matched = self
                    .sessions
                    .mark_terminated(&event.session_id, &termination)
                    .await?;
                Ok(if matched {
                    SideEffect::SessionTerminated
                } else {
                    SideEffect::NoMatchingSession
                })
            }
            EventKind::StatusUpdated => {
                let EventPayload::StatusUpdated(p) = payload else {
                    warn!(
                        subsystem = logging::INGEST,
                        event_id = %event.id,
                        "Status update payload did not match, skipping"
                    );
                    return Ok(SideEffect::None);
                };
                let update = StatusUpdate {
                    status: p.session_status(),
                    progress_percent: p.progress(),
                    estimated_completion: p.estimated_completion.clone(),
                    last_activity_at: event.timestamp,
                };
                let matched = self
                    .sessions
                    .update_status(&event.session_id, &update)
                    .await?;
                Ok(if matched {
                    SideEffect::StatusUpdated
                } else {
                    SideEffect::NoMatchingSession
                })
            }
            _ => Ok(SideEffect::None),
        }
    }

    /// Re-apply side effects for every stored event of a session, oldest
    /// first. Safe to repeat: each mutation converges on the same row.
    pub async fn replay_session(&self, session_id: &str) -> opsroom_core::Result<ReplayReport> {
        let events = self.events.list_for_session(session_id).await?;
        let mut report = ReplayReport {
            session_id: session_id.to_string(),
            events: events.len(),
            ..Default::default()
        };

        for event in &events {
            match self.apply_side_effects(event).await {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        subsystem = logging::INGEST,
                        op = "replay",
                        event_id = %event.id,
                        session_id,
                        error = %e,
                        "Replay step failed"
                    );
                }
            }
        }

        info!(
            subsystem = logging::INGEST,
            op = "replay",
            session_id,
            events = report.events,
            applied = report.applied,
            failed = report.failed,
            "Session replayed"
        );
        Ok(report)
    }
}

fn parse_envelope(body: &[u8]) -> Result<serde_json::Map<String, JsonValue>, IngestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::MalformedRequest(
            "Empty request body".to_string(),
        ));
    }
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(IngestError::MalformedRequest(
            "Request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(IngestError::MalformedRequest(format!("Invalid JSON: {}", e))),
    }
}

fn decode_event(value: &JsonValue) -> Result<OperationEvent, IngestError> {
    let object = value.as_object().ok_or_else(|| {
        IngestError::InvalidEventStructure("event must be an object".to_string())
    })?;
    for field in REQUIRED_EVENT_FIELDS {
        if object.get(field).map_or(true, JsonValue::is_null) {
            return Err(IngestError::InvalidEventStructure(format!(
                "missing required field: {}",
                field
            )));
        }
    }
    if !object.get("payload").is_some_and(JsonValue::is_object) {
        return Err(IngestError::InvalidEventStructure(
            "payload must be an object".to_string(),
        ));
    }
    serde_json::from_value(value.clone())
        .map_err(|e| IngestError::InvalidEventStructure(e.to_string()))
}

fn decode_signed_at(value: &JsonValue) -> Result<i64, IngestError> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| {
            IngestError::InvalidEventStructure("timestamp must be a number".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope_rejects_non_objects() {
        assert!(matches!(
            parse_envelope(b""),
            Err(IngestError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_envelope(b"  \n"),
            Err(IngestError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_envelope(b"[1,2]"),
            Err(IngestError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_envelope(b"{nope"),
            Err(IngestError::MalformedRequest(_))
        ));
        assert!(parse_envelope(br#"{"event":{}}"#).is_ok());
    }

    #[test]
    fn test_decode_event_requires_every_field() {
        let full = json!({
            "id": "evt-agent.error-1",
            "type": "agent.error",
            "timestamp": "2026-01-01T00:00:00Z",
            "agent_id": "a",
            "session_id": "s",
            "payload": {}
        });
        assert!(decode_event(&full).is_ok());

        for field in REQUIRED_EVENT_FIELDS {
            let mut missing = full.clone();
            missing.as_object_mut().unwrap().remove(field);
            let err = decode_event(&missing).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for {} was {}",
                field,
                err
            );

            let mut null = full.clone();
            null[field] = JsonValue::Null;
            assert!(decode_event(&null).is_err());
        }
    }

    #[test]
    fn test_decode_event_rejects_bad_shapes() {
        let mut event = json!({
            "id": "evt-x-1",
            "type": "x",
            "timestamp": "yesterday",
            "agent_id": "a",
            "session_id": "s",
            "payload": {}
        });
        assert!(matches!(
            decode_event(&event),
            Err(IngestError::InvalidEventStructure(_))
        ));

        event["timestamp"] = json!("2026-01-01T00:00:00Z");
        event["payload"] = json!([1]);
        assert!(matches!(
            decode_event(&event),
            Err(IngestError::InvalidEventStructure(_))
        ));

        assert!(decode_event(&json!("evt")).is_err());
    }

    #[test]
    fn test_decode_signed_at() {
        assert_eq!(decode_signed_at(&json!(1767225600000_i64)).unwrap(), 1767225600000);
        assert_eq!(decode_signed_at(&json!(1.5e3)).unwrap(), 1500);
        assert!(decode_signed_at(&json!("1767225600000")).is_err());
    }
}
