//! Shared application state.

use std::sync::Arc;

use opsroom_core::{ChannelHub, EventRepository, IdentityProvider, SessionRepository};
use opsroom_crypto::EnvelopeSigner;
use opsroom_db::{Database, MemoryStore};

use crate::config::GatewayConfig;
use crate::gateway::registry::ConnectionRegistry;
use crate::services::Ingestor;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub events: Arc<dyn EventRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    /// Fan-out hub fed by the store's change stream.
    pub hub: Arc<ChannelHub>,
    pub registry: Arc<ConnectionRegistry>,
    pub identity: Arc<dyn IdentityProvider>,
    pub gateway: GatewayConfig,
}

impl AppState {
    pub fn new(
        events: Arc<dyn EventRepository>,
        sessions: Arc<dyn SessionRepository>,
        hub: Arc<ChannelHub>,
        identity: Arc<dyn IdentityProvider>,
        signer: EnvelopeSigner,
        gateway: GatewayConfig,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(events.clone(), sessions.clone(), signer));
        let registry = Arc::new(ConnectionRegistry::new(gateway.max_connections));
        Self {
            ingestor,
            events,
            sessions,
            hub,
            registry,
            identity,
            gateway,
        }
    }

    /// State backed by Postgres. The caller starts the change listener.
    pub fn with_database(
        db: &Database,
        hub: Arc<ChannelHub>,
        identity: Arc<dyn IdentityProvider>,
        signer: EnvelopeSigner,
        gateway: GatewayConfig,
    ) -> Self {
        Self::new(
            Arc::new(db.events.clone()),
            Arc::new(db.sessions.clone()),
            hub,
            identity,
            signer,
            gateway,
        )
    }

    /// State backed by an in-memory store that publishes into `hub`.
    pub fn with_memory_store(
        store: &MemoryStore,
        hub: Arc<ChannelHub>,
        identity: Arc<dyn IdentityProvider>,
        signer: EnvelopeSigner,
        gateway: GatewayConfig,
    ) -> Self {
        store.set_sink(hub.clone());
        Self::new(
            Arc::new(store.events.clone()),
            Arc::new(store.sessions.clone()),
            hub,
            identity,
            signer,
            gateway,
        )
    }
}
