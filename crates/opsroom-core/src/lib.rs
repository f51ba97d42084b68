//! # opsroom-core
//!
//! Core types, traits, and abstractions for the Operations Room.
//!
//! This crate provides the operation event model, the typed payload union,
//! the derived session rows, the gateway wire protocol, and the channel hub
//! that fans store changes out to viewers. Every other crate depends on it.

pub mod defaults;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::ChannelHub;
pub use ids::{new_event_id, new_v7};
pub use models::*;
pub use protocol::{
    is_subscribable_channel, ClientAction, ClientMessage, ServerMessage, StoreChange, SystemNotice,
};
pub use traits::*;
