//! # opsroom-db
//!
//! PostgreSQL store for the Operations Room.
//!
//! This crate provides:
//! - Connection pool management
//! - The raw event log (`agent_events`) and derived session rows
//!   (`agent_sessions`)
//! - A `LISTEN/NOTIFY` bridge that feeds row changes to the gateway
//! - An in-memory store with the same traits, for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use opsroom_db::{Database, EventRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/opsroom").await?;
//!     println!("{} events stored", db.events.count().await?);
//!     Ok(())
//! }
//! ```

pub mod changes;
pub mod events;
pub mod listener;
pub mod memory;
pub mod pool;
pub mod sessions;

pub use changes::{content_digest, event_change, session_change, Notification};
pub use events::PgEventRepository;
pub use listener::PgChangeListener;
pub use memory::{MemoryEventRepository, MemorySessionRepository, MemoryStore};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sessions::PgSessionRepository;

// Re-export core traits so callers need only this crate for store access
pub use opsroom_core::{ChangeSink, EventRepository, SessionRepository};

use opsroom_core::Result;

/// Database handle holding the pool and all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Raw event log.
    pub events: PgEventRepository,
    /// Derived session rows.
    pub sessions: PgSessionRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            events: PgEventRepository::new(pool.clone()),
            sessions: PgSessionRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the database with the default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with an explicit pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| opsroom_core::Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Listener that forwards this database's row changes to `sink`.
    pub fn change_listener(&self, sink: std::sync::Arc<dyn ChangeSink>) -> PgChangeListener {
        PgChangeListener::new(self.pool.clone(), sink)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Log pool health every `every` until the runtime shuts down.
    pub fn spawn_pool_monitor(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                log_pool_metrics(&pool);
            }
        })
    }
}
