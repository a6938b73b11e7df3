use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::ClientOptions;
use crate::error::Error;
use crate::realtime::channel::{Channel, ChannelBuilder};
use crate::realtime::message::{RealtimeMessage, PHOENIX_TOPIC};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client for Supabase Realtime.
///
/// One websocket per client. Channels are keyed by topic; messages are routed to
/// them in arrival order by the reader task.
#[derive(Clone)]
pub struct RealtimeClient {
    url: String,
    key: String,
    next_ref: Arc<AtomicU32>,
    pub(crate) channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    options: ClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    connect_lock: Arc<Mutex<()>>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RealtimeClient {
    pub fn new(url: &str, key: &str, options: ClientOptions) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            next_ref: Arc::new(AtomicU32::new(1)),
            channels: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            options,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connect_lock: Arc::new(Mutex::new(())),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the user token sent with channel joins
    pub async fn set_auth(&self, token: Option<String>) {
        debug!("Setting realtime auth token (is_some: {})", token.is_some());
        *self.access_token.write().await = token;
    }

    pub(crate) async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub async fn get_connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Start building a channel for the given name
    pub fn channel(&self, name: &str) -> ChannelBuilder<'_> {
        ChannelBuilder::new(self, name)
    }

    /// How long a join may wait for the server's reply
    pub(crate) fn join_timeout(&self) -> Duration {
        self.options.realtime_connect_timeout
    }

    pub(crate) fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// WebSocket endpoint for the project URL
    pub fn endpoint(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            s => return Err(Error::realtime(format!("Unsupported URL scheme: {}", s))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::realtime("cannot switch URL to a websocket scheme"))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    async fn set_state(state: &RwLock<ConnectionState>, new_state: ConnectionState) {
        let mut current = state.write().await;
        if *current != new_state {
            debug!("Realtime state {:?} -> {:?}", *current, new_state);
            *current = new_state;
        }
    }

    /// Open the websocket if it is not open yet.
    ///
    /// Returns once the socket is up; reading, writing and heartbeats continue on
    /// background tasks until the socket closes or `disconnect` is called.
    pub async fn connect(&self) -> Result<(), Error> {
        let guard = self.connect_lock.lock().await;
        if self.socket.read().await.is_some() {
            return Ok(());
        }

        let endpoint = self.endpoint()?;
        info!("Connecting to realtime at {}", endpoint.host_str().unwrap_or_default());
        Self::set_state(&self.state, ConnectionState::Connecting).await;

        let connect = timeout(self.options.realtime_connect_timeout, connect_async(endpoint.as_str())).await;
        let ws_stream = match connect {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                error!("WebSocket connection failed: {}", e);
                Self::set_state(&self.state, ConnectionState::Disconnected).await;
                return Err(e.into());
            }
            Err(_) => {
                Self::set_state(&self.state, ConnectionState::Disconnected).await;
                return Err(Error::realtime("timed out connecting to realtime"));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        *self.socket.write().await = Some(socket_tx.clone());
        Self::set_state(&self.state, ConnectionState::Connected).await;

        // Writer
        tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                trace!("Realtime send: {:?}", message);
                if let Err(e) = write.send(message).await {
                    error!("WebSocket send error: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Realtime writer finished");
        });

        // Reader and heartbeat. Only a weak handle to the writer is kept here so that
        // `disconnect` dropping the stored sender ends the writer.
        let client = self.clone();
        let writer = socket_tx.downgrade();
        drop(socket_tx);
        drop(guard);
        tokio::spawn(async move {
            let mut heartbeat = interval(client.options.heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => client.dispatch(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Realtime socket closed: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket read error: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        let Some(tx) = writer.upgrade() else {
                            debug!("Socket writer gone, stopping reader");
                            break;
                        };
                        let beat = RealtimeMessage::heartbeat(client.next_ref());
                        match serde_json::to_string(&beat) {
                            Ok(text) => {
                                if tx.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to encode heartbeat: {}", e),
                        }
                    }
                }
            }

            let gone = {
                let mut socket = client.socket.write().await;
                let ours = match (socket.as_ref(), writer.upgrade()) {
                    (Some(current), Some(mine)) => current.same_channel(&mine),
                    _ => false,
                };
                if ours {
                    *socket = None;
                }
                socket.is_none()
            };
            if !gone {
                return;
            }
            Self::set_state(&client.state, ConnectionState::Disconnected).await;
            info!("Realtime connection closed");

            // Nothing is delivered on these channels any more; closing them ends
            // every subscriber's stream.
            let closed: Vec<Arc<Channel>> = client.channels.write().await.drain().map(|(_, c)| c).collect();
            for channel in closed {
                channel.close().await;
            }
        });

        Ok(())
    }

    async fn dispatch(&self, text: &str) {
        let message = match serde_json::from_str::<RealtimeMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to parse realtime message: {}. Raw: {}", e, text);
                return;
            }
        };

        let channel = self.channels.read().await.get(&message.topic).cloned();
        match channel {
            Some(channel) => channel.handle_message(message).await,
            None if message.topic == PHOENIX_TOPIC => trace!("Phoenix reply: {:?}", message.payload),
            None => warn!("Message for unknown topic {}", message.topic),
        }
    }

    /// Close the websocket
    pub async fn disconnect(&self) {
        if self.socket.write().await.take().is_some() {
            info!("Realtime disconnect requested");
        }
    }

    /// Send one message over the websocket
    pub(crate) async fn send_message(&self, message: &RealtimeMessage) -> Result<(), Error> {
        let text = serde_json::to_string(message)?;
        let socket = self.socket.read().await.clone();
        match socket {
            Some(tx) => tx
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::realtime(format!("socket writer gone: {}", e))),
            None => Err(Error::realtime("not connected")),
        }
    }

    /// Drop a channel once its last subscription is gone
    pub(crate) async fn remove_channel(&self, channel: &Arc<Channel>) {
        let mut channels = self.channels.write().await;
        if channels.get(channel.topic()).map_or(false, |c| Arc::ptr_eq(c, channel)) {
            channels.remove(channel.topic());
        }
    }
}
