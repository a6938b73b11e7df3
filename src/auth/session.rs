//! Session management for authentication

use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::auth::types::User;
use crate::error::Error;

/// Seconds before the actual expiry at which a session counts as expired
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Session data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The expiry time in seconds
    pub expires_in: i64,

    /// The expiry timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The user the session belongs to
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Claims read from a GoTrue access token
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

impl Session {
    /// Create a new session
    pub fn new(access_token: String, refresh_token: String, user: User, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_in,
            expires_at: Some(Utc::now().timestamp() + expires_in),
            user,
        }
    }

    /// Fill in `expires_at` from `expires_in` when the server left it out
    pub(crate) fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now().timestamp() + EXPIRY_MARGIN_SECS >= expires_at,
            None => false,
        }
    }

    /// Build a session from the parameters of an implicit-grant redirect
    /// (`#access_token=..&refresh_token=..&expires_in=..`).
    ///
    /// Returns `Ok(None)` when the parameters carry no access token. The user is read
    /// from the token claims; the signature is not verified here, the token is only
    /// ever sent back to the service that issued it.
    pub fn from_redirect_params(params: &HashMap<String, String>) -> Result<Option<Self>, Error> {
        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .map(String::as_str)
                .unwrap_or(error.as_str());
            return Err(Error::auth(description));
        }

        let access_token = match params.get("access_token") {
            Some(token) if !token.is_empty() => token.clone(),
            _ => return Ok(None),
        };
        let refresh_token = params
            .get("refresh_token")
            .cloned()
            .ok_or_else(|| Error::auth("redirect is missing refresh_token"))?;

        let claims = read_claims(&access_token)?;
        let expires_in = params
            .get("expires_in")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(3600);
        let expires_at = params
            .get("expires_at")
            .and_then(|v| v.parse::<i64>().ok())
            .or(claims.exp);

        let user = User {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
            created_at: None,
        };

        Ok(Some(Self {
            access_token,
            refresh_token,
            token_type: params
                .get("token_type")
                .cloned()
                .unwrap_or_else(default_token_type),
            expires_in,
            expires_at,
            user,
        }
        .stamped()))
    }
}

fn read_claims(token: &str) -> Result<AccessTokenClaims, Error> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let data = decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}
