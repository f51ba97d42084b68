//! Derived session row repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use opsroom_core::{
    AgentSession, AgentType, Error, InsertOutcome, NewAgentSession, Result, SessionRepository,
    SessionStatus, SessionTermination, StatusUpdate,
};

const SESSION_COLUMNS: &str = "session_id, agent_id, agent_name, agent_type, status, channel,
    assigned_task, parent_session_id, progress_percent, estimated_completion, summary,
    started_at, terminated_at, last_activity_at";

/// PostgreSQL session repository.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> AgentSession {
        let agent_type: String = row.get("agent_type");
        let status: String = row.get("status");
        AgentSession {
            session_id: row.get("session_id"),
            agent_id: row.get("agent_id"),
            agent_name: row.get("agent_name"),
            agent_type: AgentType::parse(&agent_type).unwrap_or_default(),
            // CHECK constraint keeps this in range
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Idle),
            channel: row.get("channel"),
            assigned_task: row.get("assigned_task"),
            parent_session_id: row.get("parent_session_id"),
            progress_percent: row.get("progress_percent"),
            estimated_completion: row.get("estimated_completion"),
            summary: row.get("summary"),
            started_at: row.get("started_at"),
            terminated_at: row.get("terminated_at"),
            last_activity_at: row.get("last_activity_at"),
        }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert_started(&self, session: &NewAgentSession) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO agent_sessions
                (session_id, agent_id, agent_name, agent_type, status, channel,
                 assigned_task, parent_session_id, progress_percent,
                 started_at, last_activity_at)
             VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, 0, $8, $8)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&session.session_id)
        .bind(&session.agent_id)
        .bind(&session.agent_name)
        .bind(session.agent_type.as_str())
        .bind(&session.channel)
        .bind(&session.assigned_task)
        .bind(&session.parent_session_id)
        .bind(session.started_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn mark_terminated(
        &self,
        session_id: &str,
        termination: &SessionTermination,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent_sessions SET
                status = 'terminated',
                terminated_at = $2,
                progress_percent = 100,
                summary = COALESCE($3, summary),
                last_activity_at = GREATEST(last_activity_at, $2)
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(termination.terminated_at)
        .bind(&termination.summary)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_status(&self, session_id: &str, update: &StatusUpdate) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent_sessions SET
                status = $2,
                progress_percent = COALESCE($3, progress_percent),
                estimated_completion = COALESCE($4, estimated_completion),
                last_activity_at = $5
             WHERE session_id = $1 AND status <> 'terminated'",
        )
        .bind(session_id)
        .bind(update.status.as_str())
        .bind(update.progress_percent)
        .bind(&update.estimated_completion)
        .bind(update.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, session_id: &str) -> Result<Option<AgentSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM agent_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list_active(&self) -> Result<Vec<AgentSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agent_sessions
             WHERE status <> 'terminated'
             ORDER BY last_activity_at DESC",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}
