use crate::channel::{Channel, TableChannelBuilder};
use crate::error::RealtimeError;
use crate::message::{ChannelEvent, WireMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client options
#[derive(Debug, Clone)]
pub struct ChangeClientOptions {
    pub heartbeat_interval: u64,
    pub connect_timeout: u64,
}

impl Default for ChangeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30000, // 30 seconds
            connect_timeout: 10000,    // 10 seconds
        }
    }
}

/// Change-feed client. One websocket connection multiplexes any number of
/// per-table channels.
pub struct ChangeClient {
    pub url: String,
    pub key: String,
    pub options: ChangeClientOptions,
    pub(crate) next_ref: AtomicU32,
    // topic -> channel
    pub(crate) channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    // sender feeding the websocket writer task
    pub(crate) socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    state: Arc<RwLock<ConnectionState>>,
    is_manually_closed: Arc<AtomicBool>,
    state_change: broadcast::Sender<ConnectionState>,
    pub(crate) access_token: Arc<RwLock<Option<String>>>,
}

impl ChangeClient {
    /// Create a new client with default options.
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, ChangeClientOptions::default())
    }

    /// Create a new client with custom options.
    pub fn new_with_options(url: &str, key: &str, options: ChangeClientOptions) -> Self {
        let (state_change_tx, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            options,
            next_ref: AtomicU32::new(1),
            channels: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            is_manually_closed: Arc::new(AtomicBool::new(false)),
            state_change: state_change_tx,
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the bearer token used when (re)connecting.
    pub async fn set_auth(&self, token: Option<String>) {
        debug!("setting realtime auth token (is_some: {})", token.is_some());
        let mut current_token = self.access_token.write().await;
        *current_token = token;
    }

    /// Receiver for connection state changes.
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    /// Current connection state.
    pub async fn get_connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Builder for a change subscription on one table.
    pub fn table_changes(&self, table: &str) -> TableChannelBuilder {
        TableChannelBuilder::new(self, table)
    }

    /// Number of joined channels. One per watched (screen, table) pair;
    /// exposed so callers can assert the single-channel invariant.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub(crate) fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Open the websocket and spawn the reader/writer tasks. Returns once
    /// the connection is established; the tasks run in the background and
    /// the caller observes their fate via `on_state_change`.
    pub fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<(), RealtimeError>> + Send + 'static {
        let url = self.url.clone();
        let key = self.key.clone();
        let socket_arc = self.socket.clone();
        let state_arc = self.state.clone();
        let state_change_tx = self.state_change.clone();
        let channels_arc = self.channels.clone();
        let options = self.options.clone();
        let is_manually_closed_arc = self.is_manually_closed.clone();
        let token_arc = self.access_token.clone();

        async move {
            is_manually_closed_arc.store(false, Ordering::SeqCst);

            let token_guard = token_arc.read().await;
            let token_param = token_guard
                .as_ref()
                .map(|t| format!("&token={}", t))
                .unwrap_or_default();
            drop(token_guard);

            let mut base_url = Url::parse(&url)?;
            let ws_scheme = match base_url.scheme() {
                "http" | "ws" => "ws",
                "https" | "wss" => "wss",
                s => {
                    return Err(RealtimeError::ConnectionError(format!(
                        "Unsupported URL scheme: {}",
                        s
                    )))
                }
            };
            base_url
                .set_scheme(ws_scheme)
                .map_err(|_| RealtimeError::ConnectionError("Invalid URL".to_string()))?;

            let ws_url = format!(
                "{}&apikey={}{}",
                base_url
                    .join("/realtime/v1/websocket?vsn=2.0.0")
                    .map_err(RealtimeError::UrlParseError)?,
                key,
                token_param
            );

            info!("connecting change feed: {}", base_url);

            Self::set_state(state_arc.clone(), state_change_tx.clone(), ConnectionState::Connecting)
                .await;

            let ws_stream = match connect_async(&ws_url).await {
                Ok((stream, response)) => {
                    debug!("websocket connected, response: {:?}", response.status());
                    stream
                }
                Err(e) => {
                    error!("websocket connection failed: {}", e);
                    Self::set_state(
                        state_arc.clone(),
                        state_change_tx.clone(),
                        ConnectionState::Disconnected,
                    )
                    .await;
                    return Err(RealtimeError::ConnectionError(format!(
                        "WebSocket connection failed: {}",
                        e
                    )));
                }
            };

            Self::set_state(state_arc.clone(), state_change_tx.clone(), ConnectionState::Connected)
                .await;

            let (mut write, mut read) = ws_stream.split();
            let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
            *socket_arc.write().await = Some(socket_tx.clone());

            // Writer task: drains the mpsc queue into the websocket sink.
            let writer_socket_arc = socket_arc.clone();
            let writer_state_arc = state_arc.clone();
            let writer_state_change_tx = state_change_tx.clone();
            tokio::spawn(async move {
                while let Some(message) = socket_rx.recv().await {
                    trace!("sending ws message: {:?}", message);
                    if let Err(e) = write.send(message).await {
                        error!("websocket send error: {}, closing connection", e);
                        *writer_socket_arc.write().await = None;
                        Self::set_state(
                            writer_state_arc,
                            writer_state_change_tx,
                            ConnectionState::Disconnected,
                        )
                        .await;
                        socket_rx.close();
                        break;
                    }
                }
                debug!("writer task finished");
            });

            // Reader task: routes incoming messages to channels and keeps
            // the heartbeat going.
            let reader_socket_arc = socket_arc.clone();
            let reader_state_arc = state_arc.clone();
            let reader_state_change_tx = state_change_tx.clone();
            let heartbeat_interval = Duration::from_millis(options.heartbeat_interval);

            tokio::spawn(async move {
                loop {
                    let socket_tx_ref = reader_socket_arc.read().await;
                    let current_socket_tx = match socket_tx_ref.as_ref() {
                        Some(tx) => tx.clone(),
                        None => {
                            debug!("socket sender gone, reader exiting");
                            break;
                        }
                    };
                    drop(socket_tx_ref);

                    tokio::select! {
                        biased;

                        msg_result = read.next() => {
                            match msg_result {
                                Some(Ok(msg)) => {
                                    if let Message::Text(text) = &msg {
                                        match serde_json::from_str::<WireMessage>(text) {
                                            Ok(wire_msg) => {
                                                trace!(
                                                    "received: topic='{}', event='{:?}'",
                                                    wire_msg.topic, wire_msg.event
                                                );
                                                let channels_guard = channels_arc.read().await;
                                                if let Some(channel) = channels_guard.get(&wire_msg.topic) {
                                                    let target_channel = channel.clone();
                                                    drop(channels_guard);
                                                    tokio::spawn(async move {
                                                        target_channel.handle_message(wire_msg).await;
                                                    });
                                                } else if wire_msg.topic == "phoenix" {
                                                    trace!("phoenix control message: {:?}", wire_msg.event);
                                                } else {
                                                    warn!(
                                                        "message for unsubscribed topic: {}",
                                                        wire_msg.topic
                                                    );
                                                }
                                            }
                                            Err(e) => {
                                                error!("failed to parse incoming message: {}. Raw: {}", e, text);
                                            }
                                        }
                                    } else if msg.is_close() {
                                        debug!("received close frame");
                                        break;
                                    }
                                }
                                Some(Err(e)) => {
                                    error!("websocket read error: {}", e);
                                    break;
                                }
                                None => {
                                    debug!("websocket stream closed by remote");
                                    break;
                                }
                            }
                        }

                        _ = sleep(heartbeat_interval) => {
                            let heartbeat_msg = json!({
                                "topic": "phoenix",
                                "event": ChannelEvent::Heartbeat,
                                "payload": {},
                                "ref": null
                            });
                            if let Err(e) = current_socket_tx
                                .send(Message::Text(heartbeat_msg.to_string()))
                                .await
                            {
                                error!("failed to send heartbeat: {}, assuming connection lost", e);
                                break;
                            }
                        }
                    }
                }
                Self::set_state(
                    reader_state_arc.clone(),
                    reader_state_change_tx.clone(),
                    ConnectionState::Disconnected,
                )
                .await;
                *reader_socket_arc.write().await = None;
                debug!("reader task finished");
            });

            Ok(())
        }
    }

    async fn set_state(
        state_arc: Arc<RwLock<ConnectionState>>,
        state_change_tx: broadcast::Sender<ConnectionState>,
        state: ConnectionState,
    ) {
        let mut current_state = state_arc.write().await;
        if *current_state != state {
            info!("connection state {:?} -> {:?}", *current_state, state);
            *current_state = state;
            let _ = state_change_tx.send(state);
        }
    }

    /// Tear the connection down. Channels are forgotten; callers re-join
    /// after a reconnect.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        self.is_manually_closed.store(true, Ordering::SeqCst);
        Self::set_state(
            self.state.clone(),
            self.state_change.clone(),
            ConnectionState::Disconnected,
        )
        .await;

        self.channels.write().await.clear();

        let mut socket_guard = self.socket.write().await;
        if let Some(socket_tx) = socket_guard.take() {
            // Dropping the sender stops the writer task; the reader follows
            // when the stream closes.
            drop(socket_tx);
            info!("change feed disconnected");
        } else {
            debug!("disconnect: no active socket, already disconnected");
        }

        Ok(())
    }

    pub(crate) async fn send_message(&self, message: serde_json::Value) -> Result<(), RealtimeError> {
        let socket_guard = self.socket.read().await;
        if let Some(socket_tx) = socket_guard.as_ref() {
            socket_tx
                .send(Message::Text(message.to_string()))
                .await
                .map_err(|e| {
                    RealtimeError::ConnectionError(format!(
                        "Failed to send message to socket task: {}",
                        e
                    ))
                })
        } else {
            warn!("cannot send message, socket unavailable");
            Err(RealtimeError::ConnectionError(
                "Client socket unavailable".to_string(),
            ))
        }
    }
}
