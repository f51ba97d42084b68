//! One viewer connection.
//!
//! Each connection is an actor: a single task owns the socket, the
//! subscription set, the dedup cache and the heartbeat timer. Subscribed
//! channels are fed by small forwarder tasks that copy messages from the
//! hub's broadcast channel into the actor's inbox.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use opsroom_core::defaults::{CONNECTION_OUTBOX, IDLE_CLOSE_REASON};
use opsroom_core::logging;
use opsroom_core::{
    is_subscribable_channel, ChannelHub, ClientAction, ClientMessage, ServerMessage, SystemNotice,
    UserIdentity,
};

use super::dedup::DedupCache;
use super::registry::SlotGuard;
use crate::config::GatewayConfig;

/// Normal closure status code.
const CLOSE_NORMAL: u16 = 1000;

/// Why the connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    IdleTimeout,
    SocketError,
}

/// State owned by a connection's task.
pub struct Connection {
    id: String,
    user_id: String,
    hub: Arc<ChannelHub>,
    config: GatewayConfig,
    subscriptions: HashMap<String, JoinHandle<()>>,
    dedup: DedupCache,
    last_heartbeat: Instant,
    inbox: mpsc::Sender<ServerMessage>,
}

impl Connection {
    pub fn new(
        id: String,
        identity: &UserIdentity,
        hub: Arc<ChannelHub>,
        config: GatewayConfig,
        inbox: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            user_id: identity.user_id.clone(),
            hub,
            dedup: DedupCache::new(config.dedup_capacity),
            config,
            subscriptions: HashMap::new(),
            last_heartbeat: Instant::now(),
            inbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains_key(channel)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle one text frame from the client; returns the replies.
    pub fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(
                    subsystem = logging::GATEWAY,
                    connection_id = %self.id,
                    error = %e,
                    "Unparseable client message"
                );
                return vec![error_notice("Invalid message format")];
            }
        };

        match message.action {
            Some(ClientAction::Ping) => vec![ServerMessage::system(SystemNotice::Pong)],
            Some(ClientAction::Subscribe) => vec![self.subscribe(&message.channel)],
            Some(ClientAction::Unsubscribe) => vec![self.unsubscribe(&message.channel)],
            None => vec![error_notice("Missing action")],
        }
    }

    /// Start receiving `channel`. Subscribing twice keeps one forwarder.
    pub fn subscribe(&mut self, channel: &str) -> ServerMessage {
        if !is_subscribable_channel(channel) {
            return error_notice(&format!("Cannot subscribe to channel: {}", channel));
        }
        if !self.subscriptions.contains_key(channel) {
            let rx = self.hub.subscribe(channel);
            let forwarder = spawn_forwarder(rx, self.inbox.clone(), self.id.clone(), channel);
            self.subscriptions.insert(channel.to_string(), forwarder);
            debug!(
                subsystem = logging::GATEWAY,
                connection_id = %self.id,
                user_id = %self.user_id,
                channel,
                subscriptions = self.subscriptions.len(),
                "Subscribed"
            );
        }
        ServerMessage::system(SystemNotice::Subscribed {
            channel: channel.to_string(),
        })
    }

    /// Stop receiving `channel`. Unknown channels are a no-op.
    pub fn unsubscribe(&mut self, channel: &str) -> ServerMessage {
        if let Some(forwarder) = self.subscriptions.remove(channel) {
            forwarder.abort();
            let hub = self.hub.clone();
            let released = channel.to_string();
            tokio::spawn(async move {
                let _ = forwarder.await;
                hub.release(&released);
            });
            debug!(
                subsystem = logging::GATEWAY,
                connection_id = %self.id,
                user_id = %self.user_id,
                channel,
                "Unsubscribed"
            );
        }
        ServerMessage::system(SystemNotice::Unsubscribed {
            channel: channel.to_string(),
        })
    }

    /// Whether a fanned-out message should go to the client.
    pub fn accept(&mut self, message: &ServerMessage) -> bool {
        self.is_subscribed(&message.channel) && self.dedup.insert_new(&message.message_id)
    }

    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_idle(&self) -> bool {
        self.last_heartbeat.elapsed() > self.config.idle_timeout
    }

    /// Drop every subscription. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        let channels: Vec<(String, JoinHandle<()>)> = self.subscriptions.drain().collect();
        for (channel, forwarder) in channels {
            forwarder.abort();
            // wait until the receiver is dropped so the hub can prune it
            let _ = forwarder.await;
            self.hub.release(&channel);
        }
    }
}

fn error_notice(message: &str) -> ServerMessage {
    ServerMessage::system(SystemNotice::Error {
        message: message.to_string(),
    })
}

fn spawn_forwarder(
    mut rx: broadcast::Receiver<ServerMessage>,
    inbox: mpsc::Sender<ServerMessage>,
    connection_id: String,
    channel: &str,
) -> JoinHandle<()> {
    let channel = channel.to_string();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if inbox.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(
                        subsystem = logging::GATEWAY,
                        connection_id = %connection_id,
                        channel = %channel,
                        missed,
                        "Connection lagged behind channel"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

type SocketSink = SplitSink<WebSocket, Message>;

async fn send_json(sink: &mut SocketSink, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(subsystem = logging::GATEWAY, error = %e, "Failed to encode message");
            true
        }
    }
}

/// Drive a connection until it closes. The slot is released on return.
pub async fn run(
    socket: WebSocket,
    identity: UserIdentity,
    hub: Arc<ChannelHub>,
    config: GatewayConfig,
    mut slot: SlotGuard,
) {
    let connection_id = opsroom_core::new_v7().to_string();
    slot.register(&connection_id, &identity.user_id);

    let (inbox_tx, mut inbox_rx) = mpsc::channel::<ServerMessage>(CONNECTION_OUTBOX);
    let heartbeat_every = config.heartbeat_interval;
    let mut connection = Connection::new(connection_id, &identity, hub, config, inbox_tx);
    let (mut sink, mut stream) = socket.split();

    info!(
        subsystem = logging::GATEWAY,
        connection_id = %connection.id(),
        user_id = %identity.user_id,
        "WebSocket connection opened"
    );

    let connected = ServerMessage::system(SystemNotice::Connected {
        connection_id: connection.id().to_string(),
        user_id: identity.user_id.clone(),
    });

    let exit = if !send_json(&mut sink, &connected).await {
        Exit::SocketError
    } else {
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let Some(Ok(frame)) = frame else {
                        break Exit::SocketError;
                    };
                    connection.touch();
                    match frame {
                        Message::Text(text) => {
                            let replies = connection.handle_text(&text);
                            let mut ok = true;
                            for reply in &replies {
                                ok = ok && send_json(&mut sink, reply).await;
                            }
                            if !ok {
                                break Exit::SocketError;
                            }
                        }
                        Message::Binary(_) => {
                            if !send_json(&mut sink, &error_notice("Binary frames are not supported")).await {
                                break Exit::SocketError;
                            }
                        }
                        Message::Close(_) => break Exit::ClientClosed,
                        // axum answers pings itself
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
                Some(message) = inbox_rx.recv() => {
                    if connection.accept(&message) {
                        if !send_json(&mut sink, &message).await {
                            break Exit::SocketError;
                        }
                    } else {
                        trace!(
                            subsystem = logging::GATEWAY,
                            connection_id = %connection.id(),
                            message_id = %message.message_id,
                            "Dropped duplicate or stale message"
                        );
                    }
                }
                _ = heartbeat.tick() => {
                    if connection.is_idle() {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_NORMAL,
                                reason: Cow::Borrowed(IDLE_CLOSE_REASON),
                            })))
                            .await;
                        break Exit::IdleTimeout;
                    }
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break Exit::SocketError;
                    }
                }
            }
        }
    };

    connection.cleanup().await;
    drop(slot);

    info!(
        subsystem = logging::GATEWAY,
        connection_id = %connection.id(),
        user_id = %connection.user_id(),
        reason = ?exit,
        "WebSocket connection closed"
    );
}
