//! Reconnecting gateway viewer.
//!
//! A [`Viewer`] keeps one WebSocket to the gateway open, subscribes to its
//! channels on every (re)connect and folds incoming messages into a
//! [`RoomState`] published on a `watch` channel. Closed or failed
//! connections are retried with [`Backoff`]; the delay resets only after a
//! successful open.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use opsroom_core::defaults::{
    EVENTS_CHANNEL, RECONNECT_CEILING_MS, RECONNECT_FLOOR_MS, SESSIONS_CHANNEL,
};
use opsroom_core::logging;
use opsroom_core::{ClientMessage, ServerMessage, SystemNotice};

use crate::backoff::Backoff;
use crate::error::ViewerError;
use crate::reducer::RoomState;

/// Where and how a viewer connects.
#[derive(Clone)]
pub struct ViewerConfig {
    /// Gateway endpoint, e.g. `ws://localhost:3000/ws`.
    pub gateway_url: String,
    /// Bearer token passed as the `token` query parameter.
    pub token: String,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
}

impl ViewerConfig {
    pub fn new(gateway_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            reconnect_floor: Duration::from_millis(RECONNECT_FLOOR_MS),
            reconnect_ceiling: Duration::from_millis(RECONNECT_CEILING_MS),
        }
    }

    /// Read `OPS_GATEWAY_URL`, `OPS_TOKEN`, and optionally
    /// `OPS_RECONNECT_FLOOR_MS` / `OPS_RECONNECT_CEILING_MS`.
    pub fn from_env() -> Result<Self, ViewerError> {
        let gateway_url = env_string("OPS_GATEWAY_URL")
            .ok_or_else(|| ViewerError::Config("OPS_GATEWAY_URL must be set".to_string()))?;
        let token = env_string("OPS_TOKEN")
            .ok_or_else(|| ViewerError::Config("OPS_TOKEN must be set".to_string()))?;

        let mut config = Self::new(gateway_url, token);
        if let Some(ms) = env_string("OPS_RECONNECT_FLOOR_MS").and_then(|v| v.parse().ok()) {
            config.reconnect_floor = Duration::from_millis(ms);
        }
        if let Some(ms) = env_string("OPS_RECONNECT_CEILING_MS").and_then(|v| v.parse().ok()) {
            config.reconnect_ceiling = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Gateway URL with the token appended.
    pub fn connect_url(&self) -> Result<String, ViewerError> {
        let base = self.gateway_url.trim();
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(ViewerError::Config(format!(
                "gateway URL must use ws:// or wss://: {}",
                base
            )));
        }
        if self.token.trim().is_empty() {
            return Err(ViewerError::Config("token must not be empty".to_string()));
        }
        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}token={}",
            base,
            separator,
            urlencoding::encode(self.token.trim())
        ))
    }
}

impl std::fmt::Debug for ViewerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerConfig")
            .field("gateway_url", &self.gateway_url)
            .field("token", &"[REDACTED]")
            .field("reconnect_floor", &self.reconnect_floor)
            .field("reconnect_ceiling", &self.reconnect_ceiling)
            .finish()
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Connection state of a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStatus {
    Connecting,
    Open,
    /// Waiting `delay` before the next attempt.
    Reconnecting { delay: Duration },
    /// Shut down; no further reconnects.
    Closed,
}

/// Entry point for spawning viewers.
pub struct Viewer;

impl Viewer {
    /// Start a viewer subscribed to `channels`.
    ///
    /// Dropping the returned handle without calling
    /// [`ViewerHandle::shutdown`] also stops the viewer.
    pub fn spawn(
        config: ViewerConfig,
        channels: Vec<String>,
    ) -> Result<ViewerHandle, ViewerError> {
        let url = config.connect_url()?;
        let (state_tx, state_rx) = watch::channel(RoomState::new());
        let (status_tx, status_rx) = watch::channel(ViewerStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let backoff = Backoff::new(config.reconnect_floor, config.reconnect_ceiling);
        let task = tokio::spawn(run(url, channels, backoff, state_tx, status_tx, shutdown_rx));

        Ok(ViewerHandle {
            state: state_rx,
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Channels a room viewer normally follows.
    pub fn default_channels() -> Vec<String> {
        vec![EVENTS_CHANNEL.to_string(), SESSIONS_CHANNEL.to_string()]
    }
}

/// Handle to a running viewer.
pub struct ViewerHandle {
    state: watch::Receiver<RoomState>,
    status: watch::Receiver<ViewerStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    /// Receiver for derived-state updates.
    pub fn state(&self) -> watch::Receiver<RoomState> {
        self.state.clone()
    }

    /// Current derived state.
    pub fn snapshot(&self) -> RoomState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    /// Cancel any pending reconnect, close the socket and wait for the
    /// viewer task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(
                subsystem = logging::CLIENT,
                component = logging::VIEWER,
                error = %e,
                "Viewer task failed"
            );
        }
    }
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

async fn run(
    url: String,
    channels: Vec<String>,
    mut backoff: Backoff,
    state_tx: watch::Sender<RoomState>,
    status_tx: watch::Sender<ViewerStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        status_tx.send_replace(ViewerStatus::Connecting);

        let connect = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown_rx.changed() => break,
        };

        match connect {
            Ok((ws, _)) => {
                backoff.reset();
                status_tx.send_replace(ViewerStatus::Open);
                info!(subsystem = logging::CLIENT, component = logging::VIEWER, "Connected to gateway");
                if let SessionEnd::Shutdown =
                    session(ws, &channels, &state_tx, &mut shutdown_rx).await
                {
                    break;
                }
                info!(subsystem = logging::CLIENT, component = logging::VIEWER, "Gateway connection lost");
            }
            Err(e) => {
                warn!(
                    subsystem = logging::CLIENT,
                    component = logging::VIEWER,
                    error = %e,
                    "Gateway connection failed"
                );
            }
        }

        let delay = backoff.next_delay();
        status_tx.send_replace(ViewerStatus::Reconnecting { delay });
        debug!(
            subsystem = logging::CLIENT,
            component = logging::VIEWER,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    status_tx.send_replace(ViewerStatus::Closed);
    debug!(subsystem = logging::CLIENT, component = logging::VIEWER, "Viewer stopped");
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn session(
    mut ws: WsStream,
    channels: &[String],
    state_tx: &watch::Sender<RoomState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    for channel in channels {
        let Ok(frame) = serde_json::to_string(&ClientMessage::subscribe(channel.as_str())) else {
            continue;
        };
        if ws.send(Message::Text(frame)).await.is_err() {
            return SessionEnd::Disconnected;
        }
    }

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(&text, state_tx),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return SessionEnd::Disconnected;
                }
                // tungstenite answers pings on the next read
                Some(Ok(_)) => {}
            },
            _ = shutdown_rx.changed() => {
                let _ = ws.close(None).await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

fn handle_text(text: &str, state_tx: &watch::Sender<RoomState>) {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(subsystem = logging::CLIENT, component = logging::VIEWER, error = %e, "Unparseable frame");
            return;
        }
    };

    if message.is_system() {
        match message.notice() {
            Some(SystemNotice::Error { message: error }) => warn!(
                subsystem = logging::CLIENT,
                component = logging::VIEWER,
                error = %error,
                "Gateway error notice"
            ),
            notice => debug!(
                subsystem = logging::CLIENT,
                component = logging::VIEWER,
                notice = ?notice,
                "System notice"
            ),
        }
        return;
    }

    state_tx.send_if_modified(|state| state.apply_message(&message));
}
