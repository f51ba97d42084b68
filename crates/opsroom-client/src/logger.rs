//! Agent-side logging client.
//!
//! Builds an [`OperationEvent`], signs it into an envelope and POSTs it to
//! the ingestion endpoint. The signature travels in the body and in the
//! `X-Operations-Signature` header. Failures are returned as [`LogError`];
//! an agent must never crash because logging failed.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use opsroom_core::defaults::{LOGGER_TIMEOUT_SECS, SIGNATURE_HEADER};
use opsroom_core::logging;
use opsroom_core::{
    AgentErrorPayload, AgentType, EventPayload, JsonMap, OperationEvent,
    SessionStartedPayload, SessionTerminatedPayload, StatusUpdatedPayload,
    SubagentCompletedPayload, SubagentSpawnedPayload, TaskStateChangedPayload, TaskStatus,
};
use opsroom_crypto::{header_value, EnvelopeSigner};

use crate::error::LogError;

/// Credentials and target of a logger.
#[derive(Clone)]
pub struct LoggerConfig {
    pub agent_id: String,
    pub session_id: String,
    /// Full ingestion URL, e.g. `http://localhost:3000/operations/log`.
    pub endpoint_url: String,
    pub shared_secret: String,
    pub timeout: Duration,
}

impl LoggerConfig {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        endpoint_url: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            endpoint_url: endpoint_url.into(),
            shared_secret: shared_secret.into(),
            timeout: Duration::from_secs(LOGGER_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `OPS_AGENT_ID`, `OPS_SESSION_ID`, `OPS_ENDPOINT_URL` and
    /// `OPERATIONS_WEBHOOK_SECRET`; `OPS_LOGGER_TIMEOUT_SECS` is optional.
    pub fn from_env() -> Result<Self, LogError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| LogError::Config(format!("{} must be set", key)))
        };

        let mut config = Self::new(
            required("OPS_AGENT_ID")?,
            required("OPS_SESSION_ID")?,
            required("OPS_ENDPOINT_URL")?,
            required("OPERATIONS_WEBHOOK_SECRET")?,
        );
        if let Some(secs) = std::env::var("OPS_LOGGER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl std::fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("endpoint_url", &self.endpoint_url)
            .field("shared_secret", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

struct Configured {
    config: LoggerConfig,
    signer: EnvelopeSigner,
    client: reqwest::Client,
}

/// Signs and sends operation events.
///
/// Starts unconfigured; every call fails with [`LogError::NotConfigured`]
/// until [`OperationsLogger::configure`] succeeds. Reconfiguring replaces
/// the credentials for subsequent calls.
#[derive(Default)]
pub struct OperationsLogger {
    inner: RwLock<Option<Arc<Configured>>>,
}

impl OperationsLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logger that is ready to send.
    pub fn with_config(config: LoggerConfig) -> Result<Self, LogError> {
        let logger = Self::new();
        logger.configure(config)?;
        Ok(logger)
    }

    /// Install credentials.
    pub fn configure(&self, config: LoggerConfig) -> Result<(), LogError> {
        if config.endpoint_url.trim().is_empty() {
            return Err(LogError::Config("endpoint_url must not be empty".to_string()));
        }
        let signer = EnvelopeSigner::new(config.shared_secret.as_bytes())?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LogError::Config(format!("failed to create HTTP client: {}", e)))?;

        debug!(
            subsystem = logging::LOGGER,
            agent_id = %config.agent_id,
            session_id = %config.session_id,
            endpoint = %config.endpoint_url,
            "Logger configured"
        );
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(Configured {
            config,
            signer,
            client,
        }));
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    /// Session id events are logged under, once configured.
    pub fn session_id(&self) -> Option<String> {
        self.current().map(|c| c.config.session_id.clone())
    }

    fn current(&self) -> Option<Arc<Configured>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sign and send one event. Returns the new event id.
    pub async fn log_event(&self, event_type: &str, payload: JsonMap) -> Result<String, LogError> {
        let Some(configured) = self.current() else {
            debug!(subsystem = logging::LOGGER, event_type, "Dropped event: logger not configured");
            return Err(LogError::NotConfigured);
        };
        let config = &configured.config;

        let event = OperationEvent::new(event_type, &config.agent_id, &config.session_id, payload);
        let event_id = event.id.clone();
        let envelope = configured
            .signer
            .sign_envelope(event, Utc::now().timestamp_millis())?;
        let signature = envelope.signature.as_deref().map(header_value).unwrap_or_default();

        let response = configured
            .client
            .post(&config.endpoint_url)
            .header(SIGNATURE_HEADER, signature)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    subsystem = logging::LOGGER,
                    event_id = %event_id,
                    event_type,
                    error = %e,
                    "Failed to send event"
                );
                LogError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                subsystem = logging::LOGGER,
                event_id = %event_id,
                event_type,
                status = status.as_u16(),
                "Endpoint rejected event"
            );
            return Err(LogError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(subsystem = logging::LOGGER, event_id = %event_id, event_type, "Event logged");
        Ok(event_id)
    }

    async fn log_payload(&self, payload: EventPayload) -> Result<String, LogError> {
        let Some(kind) = payload.kind() else {
            return Err(LogError::Serialization(
                "opaque payloads need an explicit event type".to_string(),
            ));
        };
        self.log_event(kind.as_str(), payload.to_map()).await
    }

    pub async fn session_started(
        &self,
        agent_name: &str,
        agent_type: AgentType,
        assigned_task: Option<&str>,
    ) -> Result<String, LogError> {
        self.log_payload(EventPayload::SessionStarted(SessionStartedPayload {
            agent_name: Some(agent_name.to_string()),
            agent_type,
            assigned_task: assigned_task.map(str::to_string),
            ..Default::default()
        }))
        .await
    }

    pub async fn session_terminated(&self, summary: Option<&str>) -> Result<String, LogError> {
        self.log_payload(EventPayload::SessionTerminated(SessionTerminatedPayload {
            summary: summary.map(str::to_string),
        }))
        .await
    }

    /// Announce a sub-agent spawned by this session.
    pub async fn subagent_spawned(
        &self,
        subagent_id: &str,
        agent_name: &str,
        assigned_task: Option<&str>,
    ) -> Result<String, LogError> {
        self.log_payload(EventPayload::SubagentSpawned(SubagentSpawnedPayload {
            subagent_id: subagent_id.to_string(),
            agent_name: Some(agent_name.to_string()),
            parent_session_id: self.session_id(),
            assigned_task: assigned_task.map(str::to_string),
        }))
        .await
    }

    pub async fn subagent_completed(
        &self,
        subagent_id: &str,
        summary: Option<&str>,
        success: bool,
    ) -> Result<String, LogError> {
        self.log_payload(EventPayload::SubagentCompleted(SubagentCompletedPayload {
            subagent_id: Some(subagent_id.to_string()),
            summary: summary.map(str::to_string),
            success,
        }))
        .await
    }

    pub async fn status_updated(&self, update: StatusUpdatedPayload) -> Result<String, LogError> {
        self.log_payload(EventPayload::StatusUpdated(update)).await
    }

    pub async fn task_state_changed(
        &self,
        task_id: &str,
        title: Option<&str>,
        from_status: Option<TaskStatus>,
        to_status: TaskStatus,
    ) -> Result<String, LogError> {
        self.log_payload(EventPayload::TaskStateChanged(TaskStateChangedPayload {
            task_id: task_id.to_string(),
            title: title.map(str::to_string),
            from_status,
            to_status,
        }))
        .await
    }

    pub async fn error(
        &self,
        message: &str,
        code: Option<&str>,
        recoverable: bool,
    ) -> Result<String, LogError> {
        self.log_payload(EventPayload::AgentError(AgentErrorPayload {
            message: message.to_string(),
            code: code.map(str::to_string),
            recoverable,
        }))
        .await
    }
}

/// Status update for the main agent.
pub fn main_status(status: &str, progress_percent: Option<f64>) -> StatusUpdatedPayload {
    StatusUpdatedPayload {
        agent_type: AgentType::Main,
        subagent_id: None,
        status: Some(status.to_string()),
        progress_percent,
        estimated_completion: None,
        current_action: None,
    }
}

/// Status update for a named sub-agent.
pub fn subagent_status(
    subagent_id: &str,
    status: &str,
    progress_percent: Option<f64>,
) -> StatusUpdatedPayload {
    StatusUpdatedPayload {
        agent_type: AgentType::Subagent,
        subagent_id: Some(subagent_id.to_string()),
        ..main_status(status, progress_percent)
    }
}
