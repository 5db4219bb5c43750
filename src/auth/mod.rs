// Authentication module
// OAuth2 authorization-code token lifecycle: store, consent URL, callback, exchange

mod authorize;
pub mod callback;
mod exchange;
mod manager;
mod prompt;
mod store;
mod types;

pub use authorize::build_authorize_url;
pub use callback::{CallbackServer, CallbackTarget};
pub use exchange::TokenExchange;
pub use manager::AuthManager;
pub use prompt::{AuthorizationPrompt, BrowserPrompt, PrintPrompt};
pub use store::TokenStore;
pub use types::{now_epoch, AuthState, AuthorizationState, CallbackParams, TokenSet};
