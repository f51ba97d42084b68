//! Raw event log repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use opsroom_core::{Error, EventRepository, InsertOutcome, JsonMap, OperationEvent, Result};

const EVENT_COLUMNS: &str =
    "id, event_type, event_timestamp, agent_id, session_id, payload";

/// PostgreSQL raw event repository.
#[derive(Clone)]
pub struct PgEventRepository {
    pool: Pool<Postgres>,
}

impl PgEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> OperationEvent {
        let payload: JsonValue = row.get("payload");
        let timestamp: DateTime<Utc> = row.get("event_timestamp");
        OperationEvent {
            id: row.get("id"),
            event_type: row.get("event_type"),
            timestamp,
            agent_id: row.get("agent_id"),
            session_id: row.get("session_id"),
            payload: match payload {
                JsonValue::Object(map) => map,
                _ => JsonMap::new(),
            },
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert(&self, event: &OperationEvent, signed_at_ms: i64) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO agent_events
                (id, event_type, event_timestamp, agent_id, session_id, payload, signed_at_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.timestamp)
        .bind(&event.agent_id)
        .bind(&event.session_id)
        .bind(JsonValue::Object(event.payload.clone()))
        .bind(signed_at_ms)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn get(&self, id: &str) -> Result<Option<OperationEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM agent_events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<OperationEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agent_events
             WHERE session_id = $1
             ORDER BY event_timestamp ASC, received_at ASC",
            EVENT_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM agent_events")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}
