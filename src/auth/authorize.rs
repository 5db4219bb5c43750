// Provider consent URL

use url::Url;

use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Build the authorization URL the user visits to grant access.
///
/// Pure: same config and state always give the same URL.
pub fn build_authorize_url(config: &OAuthConfig, state: &str) -> Result<Url> {
    Url::parse_with_params(
        &config.auth_url,
        &[
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", config.scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|e| AuthError::Config(format!("Invalid authorization URL: {}", e)))
}
