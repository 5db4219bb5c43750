// Token endpoint calls: authorization code and refresh token grants

use reqwest::Client;
use std::time::Duration;

use super::store::TokenStore;
use super::types::{now_epoch, Grant, TokenResponse, TokenSet};
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Turns a code or refresh token into a persisted token set
pub struct TokenExchange {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    store: TokenStore,
}

impl TokenExchange {
    /// Create an exchanger with a bounded HTTP client
    pub fn new(config: &OAuthConfig, store: TokenStore) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            store,
        })
    }

    /// Exchange a freshly captured authorization code.
    ///
    /// The code is single-use; a rejection here is final for this code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        tracing::info!("Exchanging authorization code for tokens...");
        self.request(Grant::AuthorizationCode(code.to_string()))
            .await
    }

    /// Obtain a new token set with a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        if refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }
        tracing::info!("Refreshing access token...");
        self.request(Grant::RefreshToken(refresh_token.to_string()))
            .await
    }

    /// One POST to the token endpoint, then persist. Never retried.
    async fn request(&self, grant: Grant) -> Result<TokenSet> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", grant.grant_type()),
        ];
        match &grant {
            Grant::AuthorizationCode(code) => form.push(("code", code.as_str())),
            Grant::RefreshToken(token) => form.push(("refresh_token", token.as_str())),
        }

        tracing::debug!(
            url = %self.token_url,
            grant_type = grant.grant_type(),
            "Sending token request"
        );

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                grant_type = grant.grant_type(),
                body = %body,
                "Token endpoint rejected request"
            );
            return Err(AuthError::ProviderRejection {
                status: status.as_u16(),
                body,
            });
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(format!("Invalid token response: {}", e)))?;

        // Expiry is anchored to when the response arrived, not when we asked
        let tokens = normalize(data, &grant, now_epoch())?;

        self.store.save(&tokens).await?;

        tracing::info!(
            "Token obtained via {}, expires: {}",
            grant.grant_type(),
            chrono::DateTime::from_timestamp(tokens.expires_at, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| tokens.expires_at.to_string())
        );

        Ok(tokens)
    }
}

/// Turn a provider response into a complete token set
fn normalize(data: TokenResponse, grant: &Grant, now: i64) -> Result<TokenSet> {
    if data.access_token.is_empty() {
        return Err(AuthError::MalformedResponse(
            "response does not contain access_token".to_string(),
        ));
    }

    if data.expires_in < 0 {
        return Err(AuthError::MalformedResponse(format!(
            "negative expires_in: {}",
            data.expires_in
        )));
    }

    let refresh_token = match (data.refresh_token.filter(|t| !t.is_empty()), grant) {
        (Some(token), _) => token,
        // Provider kept the refresh token; the presented one stays valid
        (None, Grant::RefreshToken(previous)) => previous.clone(),
        (None, Grant::AuthorizationCode(_)) => {
            return Err(AuthError::MalformedResponse(
                "response does not contain refresh_token".to_string(),
            ))
        }
    };

    Ok(TokenSet {
        access_token: data.access_token,
        refresh_token,
        expires_at: now.saturating_add(data.expires_in),
    })
}
