use crate::client::{ChangeClient, ConnectionState};
use crate::error::RealtimeError;
use crate::message::{ChangeEvent, ChannelEvent, WireMessage};
use log::{debug, error, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

type ChangeCallback = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// Joined channel for one table topic.
pub(crate) struct Channel {
    topic: String,
    callbacks: Arc<RwLock<HashMap<String, ChangeCallback>>>,
}

impl Channel {
    pub(crate) async fn handle_message(&self, message: WireMessage) {
        match message.event {
            ChannelEvent::PostgresChanges => {
                match ChangeEvent::from_payload(&message.payload) {
                    Some(event) => {
                        let callbacks = self.callbacks.read().await;
                        trace!(
                            "dispatching {:?} on '{}' to {} callbacks",
                            event.op,
                            self.topic,
                            callbacks.len()
                        );
                        for callback in callbacks.values() {
                            (callback)(event.clone());
                        }
                    }
                    None => {
                        warn!(
                            "undecodable change payload on '{}': {}",
                            self.topic, message.payload
                        );
                    }
                }
            }
            ChannelEvent::PhoenixReply => {
                trace!("join/leave reply on '{}': {}", self.topic, message.payload);
            }
            ChannelEvent::PhoenixClose => {
                debug!("channel '{}' closed by server", self.topic);
            }
            ChannelEvent::PhoenixError => {
                error!("channel '{}' error: {}", self.topic, message.payload);
            }
            other => {
                trace!("ignoring event {:?} on '{}'", other, self.topic);
            }
        }
    }

    pub(crate) async fn remove_callbacks(&self, ids: &[String]) {
        let mut callbacks = self.callbacks.write().await;
        for id in ids {
            callbacks.remove(id);
        }
    }
}

/// Builder for a change subscription on one table.
pub struct TableChannelBuilder<'a> {
    client: &'a ChangeClient,
    table: String,
    topic: String,
    callbacks: HashMap<String, ChangeCallback>,
}

impl<'a> TableChannelBuilder<'a> {
    pub(crate) fn new(client: &'a ChangeClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
            topic: format!("public:{}", table),
            callbacks: HashMap::new(),
        }
    }

    /// Register a callback for every insert/update/delete on the table.
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.callbacks.insert(id, Box::new(callback));
        self
    }

    /// Join the channel, connecting the client first if needed. Returns a
    /// handle that must be closed (or dropped) to release the channel.
    pub async fn subscribe(self) -> Result<ChannelHandle, RealtimeError> {
        let mut rx = self.client.on_state_change();

        let initial_state = self.client.get_connection_state().await;
        if initial_state != ConnectionState::Connected {
            debug!(
                "client not connected (state: {:?}), connecting before join",
                initial_state
            );
            let connect_future = self.client.connect();
            tokio::spawn(async move {
                if let Err(e) = connect_future.await {
                    error!("background connect failed: {}", e);
                }
            });

            let connect_timeout = Duration::from_millis(self.client.options.connect_timeout);
            let wait_result = timeout(connect_timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(ConnectionState::Connected) => break Ok(()),
                        Ok(ConnectionState::Connecting) => continue,
                        Ok(other_state) => {
                            break Err(RealtimeError::ConnectionError(format!(
                                "Connection attempt resulted in unexpected state: {:?}",
                                other_state
                            )))
                        }
                        Err(_) => {
                            break Err(RealtimeError::ConnectionError(
                                "State change receiver error while waiting for connection"
                                    .to_string(),
                            ))
                        }
                    }
                }
            })
            .await;

            match wait_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let current_state = self.client.get_connection_state().await;
                    return Err(RealtimeError::ConnectionError(format!(
                        "Timeout waiting for connection. Current state: {:?}",
                        current_state
                    )));
                }
            }
        }

        // One Channel per topic; rejoining the same table from another
        // screen instance shares the socket but keeps its own callbacks.
        let channel = {
            let mut channels = self.client.channels.write().await;
            channels
                .entry(self.topic.clone())
                .or_insert_with(|| {
                    Arc::new(Channel {
                        topic: self.topic.clone(),
                        callbacks: Arc::new(RwLock::new(HashMap::new())),
                    })
                })
                .clone()
        };

        let mut callback_ids = Vec::with_capacity(self.callbacks.len());
        {
            let mut callbacks = channel.callbacks.write().await;
            for (id, callback) in self.callbacks {
                callback_ids.push(id.clone());
                callbacks.insert(id, callback);
            }
        }

        let join_ref = self.client.next_ref();
        let join_msg = json!({
            "topic": self.topic,
            "event": ChannelEvent::PhoenixJoin,
            "payload": {
                "config": {
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": self.table
                    }]
                }
            },
            "ref": join_ref,
        });
        self.client.send_message(join_msg).await?;

        Ok(ChannelHandle {
            topic: self.topic,
            callback_ids,
            channels: self.client.channels.clone(),
            socket: self.client.socket.clone(),
            closed: false,
        })
    }
}

/// Owns one joined channel. Closing sends the leave frame and removes the
/// channel's callbacks; dropping without closing does the same from a
/// spawned task so the subscription can never outlive its owner.
pub struct ChannelHandle {
    topic: String,
    callback_ids: Vec<String>,
    channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    closed: bool,
}

impl ChannelHandle {
    /// Topic this handle is joined to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Leave the channel and release its callbacks.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        close_channel(
            self.topic.clone(),
            std::mem::take(&mut self.callback_ids),
            self.channels.clone(),
            self.socket.clone(),
        )
        .await;
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let topic = self.topic.clone();
        let ids = std::mem::take(&mut self.callback_ids);
        let channels = self.channels.clone();
        let socket = self.socket.clone();
        tokio::spawn(async move {
            close_channel(topic, ids, channels, socket).await;
        });
    }
}

async fn close_channel(
    topic: String,
    callback_ids: Vec<String>,
    channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
) {
    let remaining = {
        let channels_guard = channels.read().await;
        match channels_guard.get(&topic) {
            Some(channel) => {
                let channel = channel.clone();
                drop(channels_guard);
                channel.remove_callbacks(&callback_ids).await;
                let len = channel.callbacks.read().await.len();
                len
            }
            None => return, // already gone (e.g. disconnect cleared the map)
        }
    };

    // Last handle out sends the leave frame and forgets the topic.
    if remaining == 0 {
        channels.write().await.remove(&topic);

        let leave_msg = json!({
            "topic": topic,
            "event": ChannelEvent::PhoenixLeave,
            "payload": {},
            "ref": null,
        });
        let socket_guard = socket.read().await;
        if let Some(socket_tx) = socket_guard.as_ref() {
            if let Err(e) = socket_tx.send(Message::Text(leave_msg.to_string())).await {
                warn!("failed to send leave for '{}': {}", topic, e);
            }
        }
        debug!("channel '{}' released", topic);
    }
}
