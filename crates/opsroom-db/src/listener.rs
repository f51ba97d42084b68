//! Postgres `LISTEN/NOTIFY` bridge into a [`ChangeSink`].
//!
//! The migration installs triggers that `pg_notify` on `agent_events` and
//! `agent_sessions` for every insert/update. The listener turns each
//! notification into a [`StoreChange`](opsroom_core::StoreChange) and hands
//! it to the sink (the gateway's channel hub).

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgListener, PgPool};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use opsroom_core::defaults::{EVENTS_CHANNEL, SESSIONS_CHANNEL};
use opsroom_core::logging;
use opsroom_core::{ChangeSink, Error, EventRepository, Result, SessionRepository, StoreChange};

use crate::changes::{decode_notification, event_change, session_change, Notification};
use crate::{PgEventRepository, PgSessionRepository};

/// Delay before re-establishing a dropped listener connection.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Forwards store notifications to a sink.
pub struct PgChangeListener {
    pool: PgPool,
    events: PgEventRepository,
    sessions: PgSessionRepository,
    sink: Arc<dyn ChangeSink>,
}

impl PgChangeListener {
    pub fn new(pool: PgPool, sink: Arc<dyn ChangeSink>) -> Self {
        Self {
            events: PgEventRepository::new(pool.clone()),
            sessions: PgSessionRepository::new(pool.clone()),
            pool,
            sink,
        }
    }

    /// Listen until the connection fails for good.
    ///
    /// `PgListener` reconnects on its own after transient drops; an error
    /// here means reconnecting failed too.
    pub async fn run(&self) -> Result<()> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(Error::Database)?;
        listener
            .listen_all([EVENTS_CHANNEL, SESSIONS_CHANNEL])
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = logging::DATABASE,
            component = logging::LISTENER,
            channels = ?[EVENTS_CHANNEL, SESSIONS_CHANNEL],
            "Listening for store changes"
        );

        loop {
            let notification = listener.recv().await.map_err(Error::Database)?;
            let channel = notification.channel();
            match self.resolve(channel, notification.payload()).await {
                Ok(Some(change)) => {
                    debug!(
                        subsystem = logging::DATABASE,
                        component = logging::LISTENER,
                        channel,
                        message_id = %change.message_id,
                        "Store change"
                    );
                    self.sink.publish(change);
                }
                Ok(None) => {
                    debug!(
                        subsystem = logging::DATABASE,
                        component = logging::LISTENER,
                        channel,
                        "Announced row no longer present"
                    );
                }
                Err(e) => {
                    warn!(
                        subsystem = logging::DATABASE,
                        component = logging::LISTENER,
                        channel,
                        error = %e,
                        "Dropping undecodable notification"
                    );
                }
            }
        }
    }

    /// Run forever in the background, restarting after failures.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run().await {
                    warn!(
                        subsystem = logging::DATABASE,
                        component = logging::LISTENER,
                        error = %e,
                        delay_ms = RESTART_DELAY.as_millis() as u64,
                        "Change listener stopped, restarting"
                    );
                }
                tokio::time::sleep(RESTART_DELAY).await;
            }
        })
    }

    async fn resolve(&self, channel: &str, payload: &str) -> Result<Option<StoreChange>> {
        match decode_notification(channel, payload)? {
            Notification::Event(event) => event_change(&event).map(Some),
            Notification::Session(session) => session_change(&session).map(Some),
            Notification::Truncated { channel, key } => {
                if channel == EVENTS_CHANNEL {
                    match self.events.get(&key).await? {
                        Some(event) => event_change(&event).map(Some),
                        None => Ok(None),
                    }
                } else {
                    match self.sessions.get(&key).await? {
                        Some(session) => session_change(&session).map(Some),
                        None => Ok(None),
                    }
                }
            }
        }
    }
}
