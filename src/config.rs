//! Configuration for the Supabase services and the bookmark screens

use std::env;
use std::time::Duration;

use crate::error::Error;

/// Default table holding bookmark rows
pub const DEFAULT_TABLE: &str = "bookmarks";

/// Default delay before the auth callback sends a failed login back home
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(3000);

/// Configuration options for the Supabase client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether to refresh an expired access token before using it
    pub auto_refresh_token: bool,

    /// Whether sessions returned by sign-in calls are kept by the client
    pub persist_session: bool,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// The database schema
    pub db_schema: String,

    /// Interval between realtime heartbeats
    pub heartbeat_interval: Duration,

    /// How long connecting the realtime socket or joining a channel may take
    pub realtime_connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            realtime_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }
}

/// Application level settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The base URL of the Supabase project
    pub supabase_url: String,

    /// The anonymous API key of the project
    pub supabase_key: String,

    /// Table holding the bookmark rows
    pub table: String,

    /// Delay before a failed auth callback returns home
    pub redirect_delay: Duration,

    /// Client options
    pub options: ClientOptions,
}

impl AppConfig {
    pub fn new(supabase_url: &str, supabase_key: &str) -> Self {
        Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_key: supabase_key.to_string(),
            table: DEFAULT_TABLE.to_string(),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            options: ClientOptions::default(),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// `SUPABASE_URL` and `SUPABASE_KEY` are required; `BOOKMARKS_TABLE` and
    /// `AUTH_REDIRECT_DELAY_MS` override the defaults.
    pub fn from_env() -> Result<Self, Error> {
        let url = env::var("SUPABASE_URL").map_err(|_| Error::general("SUPABASE_URL must be set"))?;
        let key = env::var("SUPABASE_KEY").map_err(|_| Error::general("SUPABASE_KEY must be set"))?;

        let mut config = Self::new(&url, &key);
        if let Ok(table) = env::var("BOOKMARKS_TABLE") {
            config.table = table;
        }
        if let Ok(delay) = env::var("AUTH_REDIRECT_DELAY_MS") {
            let millis = delay
                .parse::<u64>()
                .map_err(|e| Error::general(format!("invalid AUTH_REDIRECT_DELAY_MS: {}", e)))?;
            config.redirect_delay = Duration::from_millis(millis);
        }
        Ok(config)
    }
}
