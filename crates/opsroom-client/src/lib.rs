//! # opsroom-client
//!
//! Both ends of the Operations Room that live outside the server:
//!
//! - [`OperationsLogger`]: the agent-side client that signs operation events
//!   and posts them to the ingestion endpoint
//! - [`Viewer`]: a reconnecting gateway subscriber that folds the stream
//!   into a [`RoomState`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use opsroom_client::{LoggerConfig, OperationsLogger};
//! use opsroom_core::AgentType;
//!
//! let logger = OperationsLogger::with_config(LoggerConfig::from_env()?)?;
//! if let Err(e) = logger.session_started("Planner", AgentType::Main, None).await {
//!     eprintln!("logging failed: {}", e);
//! }
//! ```

pub mod backoff;
pub mod error;
pub mod logger;
pub mod reducer;
pub mod viewer;

pub use backoff::Backoff;
pub use error::{LogError, ViewerError};
pub use logger::{main_status, subagent_status, LoggerConfig, OperationsLogger};
pub use reducer::{
    reduce, AgentStatus, LiveFeed, MainAgent, RoomState, SubAgent, Task, TaskFlow,
};
pub use viewer::{Viewer, ViewerConfig, ViewerHandle, ViewerStatus};
