use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::backend::Identity;
use crate::navigation::{Navigator, Route};

pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Please try logging in again.";

/// What the callback screen shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackState {
    Authenticating,
    Failed(String),
}

impl fmt::Display for CallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackState::Authenticating => {
                writeln!(f, "Authenticating...")?;
                write!(f, "Please wait while we redirect you.")
            }
            CallbackState::Failed(message) => {
                writeln!(f, "{}", message)?;
                write!(f, "Redirecting you back to login...")
            }
        }
    }
}

/// Landing screen of the identity provider redirect.
///
/// Confirms a session exists and moves on to the dashboard, or shows an error
/// and sends the user back home after `redirect_delay`.
pub struct AuthCallback {
    identity: Arc<dyn Identity>,
    navigator: Arc<dyn Navigator>,
    redirect_delay: Duration,
    state: watch::Sender<CallbackState>,
}

impl AuthCallback {
    pub fn new(identity: Arc<dyn Identity>, navigator: Arc<dyn Navigator>, redirect_delay: Duration) -> Self {
        let (state, _) = watch::channel(CallbackState::Authenticating);
        Self {
            identity,
            navigator,
            redirect_delay,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<CallbackState> {
        self.state.subscribe()
    }

    /// Check the session and navigate. Returns the route navigated to.
    pub async fn run(&self) -> Route {
        match self.identity.get_session().await {
            Ok(Some(session)) => {
                info!("Authenticated as {}", session.user.id);
                self.navigator.navigate(Route::Dashboard);
                Route::Dashboard
            }
            Ok(None) => {
                warn!("No session after the login redirect");
                self.fail().await
            }
            Err(e) => {
                error!("Auth error: {}", e);
                self.fail().await
            }
        }
    }

    async fn fail(&self) -> Route {
        self.state.send_replace(CallbackState::Failed(AUTH_FAILED_MESSAGE.to_string()));
        tokio::time::sleep(self.redirect_delay).await;
        self.navigator.navigate(Route::Home);
        Route::Home
    }
}
