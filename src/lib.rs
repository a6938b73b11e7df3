//! Personal bookmarks on Supabase
//!
//! A small client for the parts of Supabase the application talks to (auth,
//! PostgREST and realtime), and the two screens built on top of it: the login
//! callback and the bookmark dashboard.

pub mod auth;
pub mod backend;
pub mod bookmarks;
pub mod config;
pub mod error;
pub mod fetch;
pub mod navigation;
pub mod postgrest;
pub mod realtime;
pub mod screens;

use reqwest::Client;
use std::sync::Arc;

use crate::auth::Auth;
use crate::config::{AppConfig, ClientOptions};
use crate::postgrest::PostgrestClient;
use crate::realtime::RealtimeClient;

/// Handle to one Supabase project
pub struct Supabase {
    /// The base URL for the Supabase project
    pub url: String,
    /// The anonymous API key for the Supabase project
    pub key: String,
    /// HTTP client shared by auth and database requests
    pub http_client: Client,
    auth: Arc<Auth>,
    realtime: RealtimeClient,
    /// Client options
    pub options: ClientOptions,
}

impl Supabase {
    /// Create a new Supabase client
    ///
    /// ```
    /// use supabookmarks::Supabase;
    ///
    /// let supabase = Supabase::new("https://your-project-url.supabase.co", "your-anon-key");
    /// let bookmarks = supabase.from("bookmarks");
    /// ```
    pub fn new(supabase_url: &str, supabase_key: &str) -> Self {
        Self::new_with_options(supabase_url, supabase_key, ClientOptions::default())
    }

    pub fn new_with_options(supabase_url: &str, supabase_key: &str, options: ClientOptions) -> Self {
        let url = supabase_url.trim_end_matches('/');
        let http_client = Client::new();
        let auth = Auth::new(url, supabase_key, http_client.clone(), options.clone());
        let realtime = RealtimeClient::new(url, supabase_key, options.clone());

        Self {
            url: url.to_string(),
            key: supabase_key.to_string(),
            http_client,
            auth: Arc::new(auth),
            realtime,
            options,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new_with_options(&config.supabase_url, &config.supabase_key, config.options.clone())
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Shared handle to the auth client, for use as an [`backend::Identity`]
    pub fn auth_handle(&self) -> Arc<Auth> {
        self.auth.clone()
    }

    /// Database operations on a table, using the configured schema and timeout
    pub fn from(&self, table: &str) -> PostgrestClient {
        let client = PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone())
            .with_timeout(self.options.request_timeout);
        if self.options.db_schema == "public" {
            client
        } else {
            client.with_schema(&self.options.db_schema)
        }
    }

    /// The project's realtime client; clones share one connection
    pub fn realtime(&self) -> RealtimeClient {
        self.realtime.clone()
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::backend::{BookmarkStore, ChangeFeed, Identity, SupabaseBookmarks};
    pub use crate::bookmarks::{Bookmark, NewBookmark};
    pub use crate::config::{AppConfig, ClientOptions};
    pub use crate::error::Error;
    pub use crate::navigation::{Navigator, Route};
    pub use crate::screens::{AuthCallback, Dashboard, DashboardHandle, DashboardView};
    pub use crate::Supabase;
}
