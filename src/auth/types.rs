// Authentication types

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// Persisted token set.
///
/// Either the whole record exists or nothing does; every field is required
/// when deserializing so a partial file is rejected rather than half-loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds since the Unix epoch after which `access_token` is invalid.
    /// Written as an integer; fractional values from older files are floored.
    #[serde(deserialize_with = "epoch_seconds")]
    pub expires_at: i64,
}

impl TokenSet {
    /// Seconds left before expiry (negative once expired)
    pub fn seconds_remaining(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now)
    }

    /// Check if the token is inside the refresh margin at `now`
    pub fn needs_refresh(&self, now: i64, margin_secs: i64) -> bool {
        now >= self.expires_at.saturating_sub(margin_secs)
    }
}

/// Accept any JSON number as an epoch instant
fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Instant {
        Whole(i64),
        Fractional(f64),
    }

    match Instant::deserialize(deserializer)? {
        Instant::Whole(secs) => Ok(secs),
        Instant::Fractional(secs) if secs.is_finite() => Ok(secs.floor() as i64),
        Instant::Fractional(secs) => Err(serde::de::Error::custom(format!(
            "expires_at is not a finite number: {}",
            secs
        ))),
    }
}

/// Token endpoint success body
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Which grant a token request is for
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    AuthorizationCode(String),
    RefreshToken(String),
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode(_) => "authorization_code",
            Grant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Query parameters captured from the authorization redirect
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub scope: Option<String>,
}

/// Ephemeral state of one interactive authorization attempt
#[derive(Debug)]
pub struct AuthorizationState {
    pub state_token: String,
    pub received_code: Option<String>,
}

impl AuthorizationState {
    /// Start a new attempt with a fresh random nonce
    pub fn new() -> Self {
        Self {
            state_token: uuid::Uuid::new_v4().simple().to_string(),
            received_code: None,
        }
    }
}

impl Default for AuthorizationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state observed by the manager for the latest request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoToken,
    TokenValid,
    TokenNearExpiry,
    AwaitingAuthorization,
    Fatal,
}

impl AuthState {
    /// Classify a stored token set at `now`
    pub fn evaluate(tokens: Option<&TokenSet>, now: i64, margin_secs: i64) -> Self {
        match tokens {
            None => AuthState::NoToken,
            Some(t) if t.needs_refresh(now, margin_secs) => AuthState::TokenNearExpiry,
            Some(_) => AuthState::TokenValid,
        }
    }
}

/// Current time in epoch seconds
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
