use log::{debug, error, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::timeout;

use crate::error::Error;
use crate::realtime::client::RealtimeClient;
use crate::realtime::message::{events, PostgresChange, RealtimeMessage};

/// Database change subscription settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseChanges {
    schema: String,
    table: String,
}

impl DatabaseChanges {
    pub fn new(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Entry of the `postgres_changes` list in the join payload
    pub(crate) fn to_join_config(&self) -> Value {
        json!({
            "event": "*",
            "schema": self.schema,
            "table": self.table,
        })
    }

    fn matches(&self, change: &PostgresChange) -> bool {
        change.schema == self.schema && change.table == self.table
    }
}

type ChangeCallback = Box<dyn Fn(PostgresChange) + Send + Sync>;

/// Outcome of a join: `Err` carries the server's reason
type JoinReply = oneshot::Sender<Result<(), String>>;

/// Channel state shared by the reader task and the subscriptions
pub(crate) struct Channel {
    topic: String,
    callbacks: RwLock<HashMap<String, (DatabaseChanges, ChangeCallback)>>,
    // Ref of the join still waiting for its reply
    joining: Mutex<Option<(String, JoinReply)>>,
}

impl Channel {
    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    /// Drop every callback so the subscribers' streams end
    pub(crate) async fn close(&self) {
        self.joining.lock().await.take();
        let mut callbacks = self.callbacks.write().await;
        if !callbacks.is_empty() {
            warn!("Closing channel {} with {} listeners", self.topic, callbacks.len());
            callbacks.clear();
        }
    }

    pub(crate) async fn handle_message(&self, message: RealtimeMessage) {
        match message.event.as_str() {
            events::POSTGRES_CHANGES => {
                let change = match PostgresChange::from_payload(&message.payload) {
                    Ok(change) => change,
                    Err(e) => {
                        error!("Bad postgres_changes payload on {}: {}", self.topic, e);
                        return;
                    }
                };
                let callbacks = self.callbacks.read().await;
                for (changes, callback) in callbacks.values() {
                    if changes.matches(&change) {
                        callback(change.clone());
                    }
                }
            }
            events::REPLY => {
                let ok = message.reply_status() == Some("ok");
                if ok {
                    debug!("Channel {} reply ok (ref {:?})", self.topic, message.message_ref);
                } else {
                    error!("Channel {} reply {:?}: {}", self.topic, message.reply_status(), message.payload);
                }

                let pending = {
                    let mut joining = self.joining.lock().await;
                    match (joining.as_ref(), message.message_ref.as_deref()) {
                        (Some((join_ref, _)), Some(reply_ref)) if join_ref == reply_ref => joining.take(),
                        _ => None,
                    }
                };
                match pending {
                    Some((_, reply)) => {
                        let outcome = if ok { Ok(()) } else { Err(reply_reason(&message.payload)) };
                        let _ = reply.send(outcome);
                    }
                    None if !ok => self.close().await,
                    None => {}
                }
            }
            events::SYSTEM => debug!("Channel {} system message: {}", self.topic, message.payload),
            events::ERROR | events::CLOSE => {
                warn!("Channel {} got {}", self.topic, message.event);
                self.close().await;
            }
            other => debug!("Unhandled event {} on {}", other, self.topic),
        }
    }
}

/// Reason given in an error reply, falling back to the whole payload
fn reply_reason(payload: &Value) -> String {
    match payload.pointer("/response/reason").and_then(Value::as_str) {
        Some(reason) => reason.to_string(),
        None => payload.to_string(),
    }
}

/// An active channel subscription.
///
/// Dropping it removes its callbacks; the channel is left once nothing listens to it.
pub struct Subscription {
    ids: Vec<String>,
    channel: Arc<Channel>,
    client: RealtimeClient,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.channel.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let ids = std::mem::take(&mut self.ids);
        let client = self.client.clone();
        let channel = self.channel.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = release(client, channel, ids).await {
                        warn!("Error leaving realtime channel: {}", e);
                    }
                });
            }
            Err(_) => warn!("Subscription to {} dropped outside a runtime", self.channel.topic),
        }
    }
}

async fn release(client: RealtimeClient, channel: Arc<Channel>, ids: Vec<String>) -> Result<(), Error> {
    let (removed, now_empty) = {
        let mut callbacks = channel.callbacks.write().await;
        let removed = ids.iter().filter(|id| callbacks.remove(*id).is_some()).count();
        (removed, callbacks.is_empty())
    };
    if !now_empty {
        return Ok(());
    }

    client.remove_channel(&channel).await;
    if removed == 0 {
        // Already closed from the server side or by a lost socket
        return Ok(());
    }
    debug!("Leaving channel {}", channel.topic);
    let leave = RealtimeMessage::new(&channel.topic, events::LEAVE, json!({}), Some(client.next_ref()));
    client.send_message(&leave).await
}

/// Builder for a channel and its database callbacks
pub struct ChannelBuilder<'a> {
    client: &'a RealtimeClient,
    topic: String,
    db_callbacks: Vec<(DatabaseChanges, ChangeCallback)>,
}

impl<'a> ChannelBuilder<'a> {
    pub(crate) fn new(client: &'a RealtimeClient, name: &str) -> Self {
        Self {
            client,
            topic: format!("realtime:{}", name),
            db_callbacks: Vec::new(),
        }
    }

    /// Register a callback for database changes
    pub fn on<F>(mut self, changes: DatabaseChanges, callback: F) -> Self
    where
        F: Fn(PostgresChange) + Send + Sync + 'static,
    {
        self.db_callbacks.push((changes, Box::new(callback)));
        self
    }

    /// Connect if needed, register the callbacks and join the channel.
    ///
    /// Returns once the server accepted the join; a rejected or unanswered join is
    /// an error.
    pub async fn subscribe(self) -> Result<Subscription, Error> {
        if self.db_callbacks.is_empty() {
            return Err(Error::realtime("channel has no callbacks"));
        }
        self.client.connect().await?;

        let channel = {
            let mut channels = self.client.channels.write().await;
            channels
                .entry(self.topic.clone())
                .or_insert_with(|| {
                    Arc::new(Channel {
                        topic: self.topic.clone(),
                        callbacks: RwLock::new(HashMap::new()),
                        joining: Mutex::new(None),
                    })
                })
                .clone()
        };

        let mut ids = Vec::new();
        let mut configs = Vec::new();
        {
            let mut callbacks = channel.callbacks.write().await;
            for (changes, callback) in self.db_callbacks {
                let id = uuid::Uuid::new_v4().to_string();
                configs.push(changes.to_join_config());
                callbacks.insert(id.clone(), (changes, callback));
                ids.push(id);
            }
        }

        let subscription = Subscription {
            ids,
            channel,
            client: self.client.clone(),
        };

        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": configs,
            }
        });
        if let Some(token) = self.client.access_token().await {
            payload["access_token"] = json!(token);
        }

        let join_ref = self.client.next_ref();
        let (reply_tx, reply_rx) = oneshot::channel();
        *subscription.channel.joining.lock().await = Some((join_ref.clone(), reply_tx));

        let join = RealtimeMessage::new(&self.topic, events::JOIN, payload, Some(join_ref));
        // On failure the subscription is dropped here, which unregisters the callbacks
        self.client.send_message(&join).await?;
        match timeout(self.client.join_timeout(), reply_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => {
                return Err(Error::realtime(format!("join of {} rejected: {}", self.topic, reason)))
            }
            Ok(Err(_)) => {
                return Err(Error::realtime(format!(
                    "{} closed before the join was confirmed",
                    self.topic
                )))
            }
            Err(_) => return Err(Error::realtime(format!("timed out joining {}", self.topic))),
        }
        debug!(
            "Joined {} with {} database listeners (connection {:?})",
            self.topic,
            subscription.ids.len(),
            self.client.get_connection_state().await
        );
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::message::ChangeType;

    fn channel() -> Channel {
        Channel {
            topic: "realtime:bookmarks".into(),
            callbacks: RwLock::new(HashMap::new()),
            joining: Mutex::new(None),
        }
    }

    #[test]
    fn join_config_listens_to_every_event() {
        let config = DatabaseChanges::new("bookmarks").schema("app").to_join_config();
        assert_eq!(config, json!({ "event": "*", "schema": "app", "table": "bookmarks" }));
    }

    #[test]
    fn changes_match_schema_and_table() {
        let change = PostgresChange {
            schema: "public".into(),
            table: "bookmarks".into(),
            commit_timestamp: None,
            change_type: ChangeType::Delete,
            record: Value::Null,
            old_record: json!({ "id": "b1" }),
        };
        assert!(DatabaseChanges::new("bookmarks").matches(&change));
        assert!(!DatabaseChanges::new("bookmarks").schema("app").matches(&change));
        assert!(!DatabaseChanges::new("notes").matches(&change));
    }

    #[tokio::test]
    async fn error_reply_to_join_reports_reason() {
        let channel = channel();
        let (tx, rx) = oneshot::channel();
        *channel.joining.lock().await = Some(("7".into(), tx));

        let reply = RealtimeMessage::new(
            &channel.topic,
            events::REPLY,
            json!({ "status": "error", "response": { "reason": "Unauthorized" } }),
            Some("7".into()),
        );
        channel.handle_message(reply).await;

        assert_eq!(rx.await.unwrap(), Err("Unauthorized".to_string()));
    }

    #[tokio::test]
    async fn channel_error_drops_listeners() {
        let channel = channel();
        channel.callbacks.write().await.insert(
            "cb".into(),
            (DatabaseChanges::new("bookmarks"), Box::new(|_: PostgresChange| {}) as ChangeCallback),
        );

        let error = RealtimeMessage::new(&channel.topic, events::ERROR, json!({}), None);
        channel.handle_message(error).await;

        assert!(channel.callbacks.read().await.is_empty());
    }
}
