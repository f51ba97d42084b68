//! Channel hub for real-time fan-out of store changes.
//!
//! The store's change stream (Postgres `LISTEN/NOTIFY`, or the in-memory
//! store) pushes every row change into [`ChannelHub::publish`]. Each channel
//! gets its own `tokio::sync::broadcast` sender, created lazily on first
//! subscription; gateway connections subscribe per channel and receive
//! [`ServerMessage`]s stamped at publish time.
//!
//! Slow receivers that fall behind a channel's buffer get a `Lagged` error
//! and miss messages. The live feed is a convenience window, so freshness
//! wins over completeness here.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::logging;
use crate::protocol::{ServerMessage, StoreChange};
use crate::traits::ChangeSink;

/// Per-channel broadcast hub.
pub struct ChannelHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ServerMessage>>>,
    capacity: usize,
}

impl ChannelHub {
    /// Create a hub whose channels buffer `capacity` messages each.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ServerMessage> {
        if let Some(tx) = self.read().get(channel) {
            return tx.subscribe();
        }
        let mut channels = self.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop a channel's sender once nobody listens to it anymore.
    ///
    /// Call after dropping a receiver; a no-op while receivers remain.
    pub fn release(&self, channel: &str) {
        let mut channels = self.write();
        if channels
            .get(channel)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(channel);
            tracing::debug!(
                subsystem = logging::GATEWAY,
                component = logging::HUB,
                channel,
                "Released idle channel"
            );
        }
    }

    /// Publish a change to its channel. Returns how many receivers got it.
    pub fn publish(&self, change: StoreChange) -> usize {
        let channels = self.read();
        let Some(tx) = channels.get(&change.channel) else {
            tracing::trace!(
                subsystem = logging::GATEWAY,
                component = logging::HUB,
                channel = %change.channel,
                message_id = %change.message_id,
                "No subscribers for channel, dropping change"
            );
            return 0;
        };
        let message = ServerMessage::from_change(change);
        tracing::trace!(
            subsystem = logging::GATEWAY,
            component = logging::HUB,
            channel = %message.channel,
            message_id = %message.message_id,
            subscriber_count = tx.receiver_count(),
            "Hub publish"
        );
        tx.send(message).unwrap_or(0)
    }

    /// Number of receivers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read()
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels with a live sender.
    pub fn channel_count(&self) -> usize {
        self.read().len()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, broadcast::Sender<ServerMessage>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, broadcast::Sender<ServerMessage>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(crate::defaults::CHANNEL_BUFFER)
    }
}

impl ChangeSink for ChannelHub {
    fn publish(&self, change: StoreChange) {
        ChannelHub::publish(self, change);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(channel: &str, id: &str) -> StoreChange {
        StoreChange {
            channel: channel.to_string(),
            message_id: id.to_string(),
            data: json!({"id": id}),
        }
    }

    #[tokio::test]
    async fn test_hub_publish_subscribe() {
        let hub = ChannelHub::new(32);
        let mut rx = hub.subscribe("agent_events");

        assert_eq!(hub.publish(change("agent_events", "evt-a-1")), 1);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "agent_events");
        assert_eq!(msg.message_id, "evt-a-1");
        assert_eq!(msg.data["id"], "evt-a-1");
    }

    #[tokio::test]
    async fn test_hub_routes_by_channel() {
        let hub = ChannelHub::new(32);
        let mut events = hub.subscribe("agent_events");
        let mut sessions = hub.subscribe("agent_sessions");

        hub.publish(change("agent_sessions", "s-1"));
        hub.publish(change("agent_events", "e-1"));

        assert_eq!(events.recv().await.unwrap().message_id, "e-1");
        assert_eq!(sessions.recv().await.unwrap().message_id, "s-1");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = ChannelHub::new(32);
        assert_eq!(hub.publish(change("agent_events", "e-1")), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_subscriber_count_and_release() {
        let hub = ChannelHub::new(32);
        let rx1 = hub.subscribe("agent_events");
        let rx2 = hub.subscribe("agent_events");
        assert_eq!(hub.subscriber_count("agent_events"), 2);

        drop(rx1);
        hub.release("agent_events");
        assert_eq!(hub.channel_count(), 1);

        drop(rx2);
        hub.release("agent_events");
        assert_eq!(hub.channel_count(), 0);
        assert_eq!(hub.subscriber_count("agent_events"), 0);
    }

    #[tokio::test]
    async fn test_hub_as_change_sink() {
        let hub = ChannelHub::new(32);
        let mut rx = hub.subscribe("agent_sessions");
        let sink: &dyn ChangeSink = &hub;
        sink.publish(change("agent_sessions", "s-9"));
        assert_eq!(rx.recv().await.unwrap().message_id, "s-9");
    }

    #[tokio::test]
    async fn test_hub_lagged_receiver() {
        let hub = ChannelHub::new(2);
        let mut rx = hub.subscribe("agent_events");
        for i in 0..5 {
            hub.publish(change("agent_events", &format!("e-{}", i)));
        }
        let result = rx.recv().await;
        assert!(matches!(
            result,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
