//! Capabilities the screens need from the managed backend.
//!
//! The screens only ever see [`Identity`] and [`BookmarkStore`]; the Supabase
//! clients implement them here, tests implement them in memory.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::{Auth, AuthSubscription, Session, User};
use crate::bookmarks::{Bookmark, BookmarkChange, NewBookmark};
use crate::error::Error;
use crate::postgrest::PostgrestClient;
use crate::realtime::DatabaseChanges;
use crate::Supabase;

/// Session and user lookup
#[async_trait]
pub trait Identity: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, Error>;

    async fn get_user(&self) -> Result<Option<User>, Error>;

    async fn sign_out(&self) -> Result<(), Error>;

    /// Register for auth state changes; dropping the subscription deregisters
    fn on_auth_state_change(&self) -> AuthSubscription;
}

/// Persistence and change notifications for bookmarks
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Bookmarks owned by `user_id`, newest first
    async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, Error>;

    /// Insert and return the stored row
    async fn insert(&self, bookmark: NewBookmark) -> Result<Bookmark, Error>;

    async fn delete(&self, id: &str) -> Result<(), Error>;

    /// Open a live feed of inserts and deletes on the table
    async fn subscribe(&self) -> Result<ChangeFeed, Error>;
}

/// Live bookmark changes.
///
/// Holds whatever keeps the underlying subscription open; dropping the feed
/// unsubscribes.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<BookmarkChange>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<BookmarkChange>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive for as long as the feed is
    pub fn with_guard<G: Any + Send>(mut self, guard: G) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// Next change, or `None` once the source closed
    pub async fn recv(&mut self) -> Option<BookmarkChange> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Identity for Auth {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        Auth::get_session(self).await
    }

    async fn get_user(&self) -> Result<Option<User>, Error> {
        Auth::get_user(self).await
    }

    async fn sign_out(&self) -> Result<(), Error> {
        Auth::sign_out(self).await
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        Auth::on_auth_state_change(self)
    }
}

/// Bookmarks table on a Supabase project
pub struct SupabaseBookmarks {
    supabase: Arc<Supabase>,
    table: String,
}

impl SupabaseBookmarks {
    pub fn new(supabase: Arc<Supabase>, table: &str) -> Self {
        Self {
            supabase,
            table: table.to_string(),
        }
    }

    /// Table client carrying the signed in user's token, so row level security applies
    async fn table(&self) -> Result<PostgrestClient, Error> {
        let client = self.supabase.from(&self.table);
        Ok(match self.supabase.auth().access_token().await? {
            Some(token) => client.with_auth(&token),
            None => client,
        })
    }
}

#[async_trait]
impl BookmarkStore for SupabaseBookmarks {
    async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, Error> {
        self.table()
            .await?
            .select("*")
            .eq("user_id", user_id)
            .order("created_at", false)
            .execute::<Bookmark>()
            .await
    }

    async fn insert(&self, bookmark: NewBookmark) -> Result<Bookmark, Error> {
        let mut rows = self.table().await?.insert(&bookmark).execute::<Bookmark>().await?;
        if rows.is_empty() {
            return Err(Error::database("insert returned no row"));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.table().await?.delete().eq("id", id).execute().await
    }

    async fn subscribe(&self) -> Result<ChangeFeed, Error> {
        let realtime = self.supabase.realtime();
        realtime.set_auth(self.supabase.auth().access_token().await?).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let changes = DatabaseChanges::new(&self.table).schema(&self.supabase.options.db_schema);

        // One topic per feed, so a feed being torn down never shares a channel
        // with the one replacing it.
        let name = format!("{}-realtime-{}", self.table, uuid::Uuid::new_v4().simple());
        let subscription = realtime
            .channel(&name)
            .on(changes, move |change| {
                if let Some(change) = BookmarkChange::from_postgres(&change) {
                    let _ = tx.send(change);
                }
            })
            .subscribe()
            .await?;

        log::info!("Listening for changes on {} via {}", self.table, subscription.topic());
        Ok(ChangeFeed::new(rx).with_guard(subscription))
    }
}
