use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};

use super::authorize::build_authorize_url;
use super::callback::{parse_pasted_redirect, CallbackServer};
use super::exchange::TokenExchange;
use super::prompt::AuthorizationPrompt;
use super::store::TokenStore;
use super::types::{now_epoch, AuthState, AuthorizationState, CallbackParams, TokenSet};
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};

/// Token set as last read from or written to the store
#[derive(Default)]
struct TokenCache {
    loaded: bool,
    tokens: Option<TokenSet>,
}

/// Authentication manager
/// Decides per request whether the cached token is usable, needs a refresh,
/// or needs the user to authorize again
pub struct AuthManager {
    config: OAuthConfig,

    store: TokenStore,

    exchange: TokenExchange,

    /// Where the consent URL is shown during an interactive flow
    prompt: Arc<dyn AuthorizationPrompt>,

    /// Held for the whole of a token request so refreshes and interactive
    /// flows never overlap
    cache: Mutex<TokenCache>,

    /// State observed by the latest request
    state: RwLock<AuthState>,
}

impl AuthManager {
    /// Create a manager; fails on unusable client configuration
    pub fn new(
        config: OAuthConfig,
        store: TokenStore,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Result<Self> {
        config.validate()?;

        let exchange = TokenExchange::new(&config, store.clone())?;

        Ok(Self {
            config,
            store,
            exchange,
            prompt,
            cache: Mutex::new(TokenCache::default()),
            state: RwLock::new(AuthState::NoToken),
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// State the latest request ended up in
    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    async fn set_state(&self, next: AuthState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::debug!("Auth state: {:?} -> {:?}", *state, next);
        }
        *state = next;
    }

    /// Get a usable access token, refreshing or authorizing as needed.
    ///
    /// A still-valid cached token is returned without any I/O. A failed
    /// refresh is reported as is; falling back to an interactive flow is
    /// left to the caller.
    pub async fn get_valid_access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;

        if !cache.loaded {
            match self.store.load().await {
                Ok(tokens) => {
                    cache.tokens = tokens;
                    cache.loaded = true;
                }
                Err(e) => {
                    tracing::error!("Failed to load token set: {}", e);
                    self.set_state(AuthState::Fatal).await;
                    return Err(e);
                }
            }
        }

        let state = AuthState::evaluate(
            cache.tokens.as_ref(),
            now_epoch(),
            self.config.refresh_margin_secs,
        );
        self.set_state(state).await;

        let result = match (state, cache.tokens.as_ref()) {
            (AuthState::TokenValid, Some(tokens)) => {
                tracing::debug!("Using cached access token");
                return Ok(tokens.access_token.clone());
            }
            (AuthState::TokenNearExpiry, Some(tokens)) => {
                tracing::info!(
                    "Token expires in {}s, refreshing...",
                    tokens.seconds_remaining(now_epoch())
                );
                let refresh_token = tokens.refresh_token.clone();
                self.exchange.refresh(&refresh_token).await
            }
            _ => {
                tracing::info!("No stored token, starting authorization flow...");
                self.authorize().await
            }
        };

        self.finish(&mut cache, result).await
    }

    /// Run a new interactive authorization regardless of what is stored
    pub async fn authorize_interactive(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let result = self.authorize().await;
        self.finish(&mut cache, result).await
    }

    async fn finish(&self, cache: &mut TokenCache, result: Result<TokenSet>) -> Result<String> {
        match result {
            Ok(tokens) => {
                self.set_state(AuthState::TokenValid).await;
                let access_token = tokens.access_token.clone();
                cache.tokens = Some(tokens);
                cache.loaded = true;
                Ok(access_token)
            }
            Err(e) => {
                tracing::error!("Token acquisition failed: {}", e);
                self.set_state(AuthState::Fatal).await;
                // Next request starts again from whatever is on disk
                cache.loaded = false;
                Err(e)
            }
        }
    }

    /// Interactive authorization-code flow.
    ///
    /// The callback listener lives only inside this call and is shut down on
    /// every return path when `server` is dropped.
    async fn authorize(&self) -> Result<TokenSet> {
        self.set_state(AuthState::AwaitingAuthorization).await;

        let mut attempt = AuthorizationState::new();
        let server = CallbackServer::bind(&self.config.redirect_uri).await?;

        let url = build_authorize_url(&self.config, &attempt.state_token)?;
        self.prompt.present(&url)?;

        let params = self.wait_for_redirect(server).await?;
        attempt.received_code = Some(verify_callback(&attempt.state_token, params)?);

        // The code is consumed here; whatever the exchange does, it is not reused
        let code = attempt
            .received_code
            .take()
            .ok_or(AuthError::MissingAuthorizationCode)?;
        self.exchange.exchange_code(&code).await
    }

    /// Wait for the redirect on the listener or, if the prompt allows it, as a
    /// URL pasted by the user; whichever comes first within the timeout.
    async fn wait_for_redirect(&self, server: CallbackServer) -> Result<CallbackParams> {
        let listener = server.wait(self.config.auth_timeout);
        if !self.prompt.accepts_pasted_redirect() {
            return listener.await;
        }
        tokio::pin!(listener);

        let pasted = spawn_paste_reader(self.prompt.clone());

        tokio::select! {
            params = &mut listener => params,
            pasted = pasted => match pasted {
                Ok(params) => {
                    tracing::info!("Using pasted authorization redirect");
                    Ok(params)
                }
                // Input closed without a usable URL; the listener may still get it
                Err(_) => listener.await,
            },
        }
    }
}

/// Read pasted redirect URLs on a plain thread until one parses.
///
/// A blocking stdin read cannot be cancelled, so it does not run on the
/// runtime; when the listener wins the thread is simply left behind.
fn spawn_paste_reader(prompt: Arc<dyn AuthorizationPrompt>) -> oneshot::Receiver<CallbackParams> {
    let (tx, rx) = oneshot::channel();

    std::thread::spawn(move || loop {
        match prompt.read_pasted_redirect() {
            Ok(Some(input)) => match parse_pasted_redirect(&input) {
                Ok(params) => {
                    let _ = tx.send(params);
                    return;
                }
                Err(e) => eprintln!("{}", e),
            },
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Stopped reading pasted redirect: {}", e);
                return;
            }
        }
    });

    rx
}

/// Check the redirect against the flow that issued it and extract the code
fn verify_callback(expected_state: &str, params: CallbackParams) -> Result<String> {
    let received = params.state.unwrap_or_default();
    if received != expected_state {
        tracing::error!("Authorization redirect carried an unexpected state; rejecting");
        return Err(AuthError::CsrfMismatch {
            expected: expected_state.to_string(),
            received,
        });
    }

    if let Some(error) = params.error {
        let detail = match params.error_description {
            Some(desc) => format!("{} ({})", error, desc),
            None => error,
        };
        return Err(AuthError::AuthorizationDenied(detail));
    }

    match params.code.filter(|c| !c.is_empty()) {
        Some(code) => Ok(code),
        None => Err(AuthError::MissingAuthorizationCode),
    }
}
