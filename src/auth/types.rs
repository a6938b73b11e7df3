//! Types for authentication and user management

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// User data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user ID
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user's role
    #[serde(default)]
    pub role: Option<String>,

    /// The creation time
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    pub fn new(id: &str, email: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            email: email.map(str::to_string),
            role: None,
            created_at: None,
        }
    }
}

/// Change in the authentication state of the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChangeEvent {
    /// A session was established for the user
    SignedIn(User),
    /// The session was cleared
    SignedOut,
    /// The access token was refreshed for the user
    TokenRefreshed(User),
}

/// Receiver side of the auth state notifications.
///
/// Dropping it deregisters the listener.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthChangeEvent>,
}

impl AuthSubscription {
    pub fn new(rx: broadcast::Receiver<AuthChangeEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the sender is gone.
    pub async fn recv(&mut self) -> Option<AuthChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Auth listener lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
    Gitlab,
    Discord,
    Azure,
    Apple,
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
            OAuthProvider::Gitlab => "gitlab",
            OAuthProvider::Discord => "discord",
            OAuthProvider::Azure => "azure",
            OAuthProvider::Apple => "apple",
        };
        f.write_str(name)
    }
}
