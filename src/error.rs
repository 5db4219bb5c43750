// Error handling module
// Defines the failure taxonomy of the token lifecycle

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while acquiring or maintaining an access token
#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the provider
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status
    #[error("Provider rejected request: {status} - {body}")]
    ProviderRejection { status: u16, body: String },

    /// Provider answered 2xx but the body is not a usable token response
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Redirect carried a state nonce other than the one issued for this flow
    #[error("State mismatch on authorization redirect (possible CSRF): expected {expected}, received {received}")]
    CsrfMismatch { expected: String, received: String },

    /// No redirect observed within the wait window
    #[error("Timed out after {}s waiting for the authorization redirect", .0.as_secs())]
    InteractiveTimeout(Duration),

    /// Provider redirected back with an `error` parameter
    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// Redirect arrived without a `code` parameter
    #[error("Authorization redirect did not contain a code")]
    MissingAuthorizationCode,

    /// Stored token set has no refresh token to refresh with
    #[error("No refresh token available; a new interactive authorization is required")]
    MissingRefreshToken,

    /// Redirect URL typed in by the user could not be read
    #[error("Invalid redirect URL: {0}")]
    InvalidRedirect(String),

    /// Local callback listener could not be started or died
    #[error("Callback listener error: {0}")]
    CallbackListener(String),

    /// Token file could not be read or written
    #[error("Token storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether the provider rejected a grant as invalid or expired.
    ///
    /// Such a rejection is terminal: the same code or refresh token must not be
    /// presented again and a new interactive authorization is needed.
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            AuthError::ProviderRejection { status, body } => {
                (400..500).contains(status) && body.to_lowercase().contains("invalid")
            }
            _ => false,
        }
    }

    /// Whether recovering from this error needs the user to authorize again
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AuthError::MissingRefreshToken) || self.is_invalid_grant()
    }
}

/// Result type alias for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AuthError::Config("STRAVA_CLIENT_ID is required".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: STRAVA_CLIENT_ID is required"
        );

        let err = AuthError::ProviderRejection {
            status: 400,
            body: r#"{"message":"Bad Request"}"#.to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"Provider rejected request: 400 - {"message":"Bad Request"}"#
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = AuthError::InteractiveTimeout(Duration::from_secs(300));
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for the authorization redirect"
        );
    }

    #[test]
    fn test_csrf_message_names_both_states() {
        let err = AuthError::CsrfMismatch {
            expected: "s1".to_string(),
            received: "s2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected s1"));
        assert!(msg.contains("received s2"));
    }

    #[test]
    fn test_invalid_grant_detection() {
        let err = AuthError::ProviderRejection {
            status: 400,
            body: r#"{"errors":[{"resource":"AuthorizationCode","field":"code","code":"invalid"}]}"#
                .to_string(),
        };
        assert!(err.is_invalid_grant());
        assert!(err.requires_reauthorization());

        // Server errors are not grant rejections even if the body says "invalid"
        let err = AuthError::ProviderRejection {
            status: 500,
            body: "invalid upstream".to_string(),
        };
        assert!(!err.is_invalid_grant());

        let err = AuthError::Network("connection refused".to_string());
        assert!(!err.is_invalid_grant());
        assert!(!err.requires_reauthorization());
    }

    #[test]
    fn test_missing_refresh_token_requires_reauthorization() {
        assert!(AuthError::MissingRefreshToken.requires_reauthorization());
        assert!(!AuthError::MissingRefreshToken.is_invalid_grant());
    }
}
