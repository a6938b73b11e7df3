//! Authentication and session handling against Supabase Auth (GoTrue)

mod session;
mod types;

use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use url::Url;

use crate::config::ClientOptions;
use crate::error::Error;
use crate::fetch::Fetch;

pub use session::*;
pub use types::*;

/// Client for Supabase Authentication
pub struct Auth {
    /// The base URL for the Supabase project
    url: String,

    /// The anonymous API key for the Supabase project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session
    session: RwLock<Option<Session>>,

    /// Auth state notifications
    events: broadcast::Sender<AuthChangeEvent>,

    /// Client options
    options: ClientOptions,
}

impl Auth {
    /// Create a new Auth client
    pub fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
            session: RwLock::new(None),
            events,
            options,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    fn stored_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn emit(&self, event: AuthChangeEvent) {
        log::debug!("Auth state change: {:?}", event);
        // No listeners is fine
        let _ = self.events.send(event);
    }

    /// Register for auth state changes. Dropping the returned value deregisters.
    pub fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }

    /// Number of registered auth state listeners
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Sign in a user with email and password
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, Error> {
        let url = self.get_auth_url("/token");

        let session = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .query(&[("grant_type", "password")])
            .timeout(self.options.request_timeout)
            .json(&json!({ "email": email, "password": password }))?
            .execute::<Session>()
            .await
            .map_err(auth_failure)?
            .stamped();

        self.set_session(session.clone());
        Ok(session)
    }

    /// Exchange a PKCE authorization code from an OAuth redirect for a session
    pub async fn exchange_code_for_session(
        &self,
        auth_code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, Error> {
        let url = self.get_auth_url("/token");

        let mut body = json!({ "auth_code": auth_code });
        if let Some(verifier) = code_verifier {
            body["code_verifier"] = json!(verifier);
        }

        let session = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .query(&[("grant_type", "pkce")])
            .timeout(self.options.request_timeout)
            .json(&body)?
            .execute::<Session>()
            .await
            .map_err(auth_failure)?
            .stamped();

        self.set_session(session.clone());
        Ok(session)
    }

    /// Pick up the session carried by an identity provider redirect.
    ///
    /// Handles the implicit flow fragment (`#access_token=..`), the PKCE `?code=`
    /// query and the `error`/`error_description` parameters of a failed login.
    pub async fn get_session_from_url(&self, redirect_url: &str) -> Result<Option<Session>, Error> {
        let url = Url::parse(redirect_url)?;

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let fragment: HashMap<String, String> = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        if query.contains_key("error") {
            return Session::from_redirect_params(&query);
        }

        if let Some(session) = Session::from_redirect_params(&fragment)? {
            log::info!("Session detected in redirect for user {}", session.user.id);
            self.set_session(session.clone());
            return Ok(Some(session));
        }

        if let Some(code) = query.get("code") {
            return self.exchange_code_for_session(code, None).await.map(Some);
        }

        Ok(None)
    }

    /// Get the current session, refreshing it first if it expired
    pub async fn get_session(&self) -> Result<Option<Session>, Error> {
        match self.stored_session() {
            Some(session) if session.is_expired() && self.options.auto_refresh_token => {
                log::debug!("Session expired, refreshing");
                self.refresh_session().await.map(Some)
            }
            session => Ok(session),
        }
    }

    /// Access token of the current session
    pub async fn access_token(&self) -> Result<Option<String>, Error> {
        Ok(self.get_session().await?.map(|s| s.access_token))
    }

    /// Refresh the current session
    pub async fn refresh_session(&self) -> Result<Session, Error> {
        let current = self.stored_session().ok_or_else(|| Error::auth("Not logged in"))?;
        let url = self.get_auth_url("/token");

        let result = Fetch::post(&self.client, &url)
            .api_key(&self.key)
            .query(&[("grant_type", "refresh_token")])
            .timeout(self.options.request_timeout)
            .json(&json!({ "refresh_token": current.refresh_token }))?
            .execute::<Session>()
            .await;

        match result {
            Ok(session) => {
                let session = session.stamped();
                if self.options.persist_session {
                    self.store_session(Some(session.clone()));
                }
                self.emit(AuthChangeEvent::TokenRefreshed(session.user.clone()));
                Ok(session)
            }
            Err(e) => {
                if e.is_unauthorized() || matches!(e, Error::Api { status: 400, .. }) {
                    log::warn!("Refresh token rejected, clearing session: {}", e);
                    self.store_session(None);
                    self.emit(AuthChangeEvent::SignedOut);
                }
                Err(auth_failure(e))
            }
        }
    }

    /// Get the user of the current session.
    ///
    /// Returns `Ok(None)` when there is no session or the service no longer accepts it.
    pub async fn get_user(&self) -> Result<Option<User>, Error> {
        let token = match self.access_token().await? {
            Some(token) => token,
            None => return Ok(None),
        };

        let url = self.get_auth_url("/user");
        let result = Fetch::get(&self.client, &url)
            .api_key(&self.key)
            .bearer_auth(&token)
            .timeout(self.options.request_timeout)
            .execute::<User>()
            .await;

        match result {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_unauthorized() => {
                log::debug!("Session rejected by /user: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Sign out the current user.
    ///
    /// The local session is cleared and `SignedOut` is emitted even when the remote
    /// logout fails; the remote error is still returned.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let token = self.stored_session().map(|s| s.access_token);

        let result = match token {
            Some(token) => {
                let url = self.get_auth_url("/logout");
                Fetch::post(&self.client, &url)
                    .api_key(&self.key)
                    .bearer_auth(&token)
                    .timeout(self.options.request_timeout)
                    .execute_empty()
                    .await
            }
            None => Ok(()),
        };

        self.store_session(None);
        self.emit(AuthChangeEvent::SignedOut);

        match result {
            Err(e) if !e.is_unauthorized() => Err(e),
            _ => Ok(()),
        }
    }

    /// Set the session
    pub fn set_session(&self, session: Session) {
        let user = session.user.clone();
        if self.options.persist_session {
            self.store_session(Some(session));
        }
        self.emit(AuthChangeEvent::SignedIn(user));
    }

    /// Build the URL that starts an OAuth sign-in with the given provider
    pub fn get_oauth_sign_in_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> String {
        let mut url = format!("{}?provider={}", self.get_auth_url("/authorize"), provider);

        if let Some(redirect_to) = redirect_to {
            url.push_str(&format!("&redirect_to={}", urlencoding::encode(redirect_to)));
        }

        url
    }
}

fn auth_failure(e: Error) -> Error {
    match e {
        Error::Api { status, message } => Error::auth(format!("{} ({})", message, status)),
        other => other,
    }
}
