use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Confirm, Input, Password};
use url::Url;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AUTH_URL: &str = "https://www.strava.com/oauth/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
pub const DEFAULT_API_URL: &str = "https://www.strava.com/api/v3";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/callback";
pub const DEFAULT_SCOPE: &str = "read,activity:read,activity:read_all";

/// Strava Sync - keeps an OAuth2 token alive and downloads activity history
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Strava application client ID
    #[arg(short = 'c', long, env = "STRAVA_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Strava application client secret
    #[arg(short = 's', long, env = "STRAVA_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the Strava application
    #[arg(long, env = "STRAVA_REDIRECT_URI", default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,

    /// Requested OAuth scope
    #[arg(long, env = "STRAVA_SCOPE", default_value = DEFAULT_SCOPE)]
    pub scope: String,

    /// Authorization endpoint
    #[arg(long, env = "STRAVA_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    pub auth_url: String,

    /// Token endpoint
    #[arg(long, env = "STRAVA_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Base URL of the Strava REST API
    #[arg(long, env = "STRAVA_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Where the token set is persisted
    #[arg(short = 't', long, env = "STRAVA_TOKEN_FILE", default_value = "strava_tokens.json")]
    pub token_file: String,

    /// Where downloaded activities are written
    #[arg(
        short = 'o',
        long,
        env = "STRAVA_ACTIVITIES_FILE",
        default_value = "strava_activities.json"
    )]
    pub activities_file: String,

    /// Activities requested per page
    #[arg(long, env = "PER_PAGE", default_value = "30")]
    pub per_page: u32,

    /// Seconds before expiry at which the token is refreshed
    #[arg(long, env = "TOKEN_REFRESH_MARGIN", default_value = "3600")]
    pub refresh_margin: u64,

    /// Seconds to wait for the browser redirect during authorization
    #[arg(long, env = "AUTH_TIMEOUT", default_value = "300")]
    pub auth_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub http_connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Print the authorization URL instead of opening a browser
    #[arg(long, env = "NO_BROWSER", default_value = "false")]
    pub no_browser: bool,

    /// Force a new interactive authorization even if a token is stored
    #[arg(long)]
    pub login: bool,

    /// Only make sure a valid token exists; skip downloading activities
    #[arg(long)]
    pub auth_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Everything the token lifecycle needs to talk to the provider
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scope: String,

    /// Token is refreshed once it is this close to expiry
    pub refresh_margin_secs: i64,

    /// Upper bound on the wait for the browser redirect
    pub auth_timeout: Duration,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
}

impl OAuthConfig {
    /// Config pointing at the public Strava endpoints
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            refresh_margin_secs: 3600,
            auth_timeout: Duration::from_secs(300),
            http_connect_timeout: 10,
            http_request_timeout: 30,
        }
    }

    /// Validate client identity and the redirect target
    pub fn validate(&self) -> std::result::Result<(), crate::error::AuthError> {
        use crate::error::AuthError;

        if self.client_id.trim().is_empty() {
            return Err(AuthError::Config("STRAVA_CLIENT_ID is empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::Config(
                "STRAVA_CLIENT_SECRET is empty".to_string(),
            ));
        }
        Url::parse(&self.auth_url)
            .map_err(|e| AuthError::Config(format!("Invalid STRAVA_AUTH_URL: {}", e)))?;
        Url::parse(&self.token_url)
            .map_err(|e| AuthError::Config(format!("Invalid STRAVA_TOKEN_URL: {}", e)))?;
        crate::auth::callback::CallbackTarget::from_redirect_uri(&self.redirect_uri)?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub oauth: OAuthConfig,

    // Storage
    pub token_file: PathBuf,
    pub activities_file: PathBuf,

    // Activity download
    pub api_url: String,
    pub per_page: u32,

    // Behaviour
    pub open_browser: bool,
    pub force_login: bool,
    pub auth_only: bool,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Build config from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let client_id = args
            .client_id
            .filter(|s| !s.trim().is_empty())
            .context("STRAVA_CLIENT_ID is required (use -c or set STRAVA_CLIENT_ID env var)")?;

        let client_secret = args
            .client_secret
            .filter(|s| !s.trim().is_empty())
            .context(
                "STRAVA_CLIENT_SECRET is required (use -s or set STRAVA_CLIENT_SECRET env var)",
            )?;

        let oauth = OAuthConfig {
            client_id,
            client_secret,
            auth_url: args.auth_url,
            token_url: args.token_url,
            redirect_uri: args.redirect_uri,
            scope: args.scope,
            refresh_margin_secs: args.refresh_margin as i64,
            auth_timeout: Duration::from_secs(args.auth_timeout),
            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,
        };

        Ok(Config {
            oauth,
            token_file: expand_tilde(&args.token_file),
            activities_file: expand_tilde(&args.activities_file),
            api_url: args.api_url,
            per_page: args.per_page,
            open_browser: !args.no_browser,
            force_login: args.login,
            auth_only: args.auth_only,
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.oauth.validate()?;

        Url::parse(&self.api_url).context("Invalid STRAVA_API_URL")?;

        if self.per_page == 0 || self.per_page > 200 {
            anyhow::bail!("PER_PAGE must be between 1 and 200, got {}", self.per_page);
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["strava-sync"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_from_args_with_credentials() {
        let config = Config::from_args(parse(&[
            "-c",
            "12345",
            "-s",
            "secret",
            "--redirect-uri",
            "http://localhost:9000/cb",
            "--auth-timeout",
            "60",
            "--no-browser",
        ]))
        .unwrap();

        assert_eq!(config.oauth.client_id, "12345");
        assert_eq!(config.oauth.client_secret, "secret");
        assert_eq!(config.oauth.redirect_uri, "http://localhost:9000/cb");
        assert_eq!(config.oauth.auth_timeout, Duration::from_secs(60));
        assert!(!config.open_browser);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_timeouts_from_args() {
        let config = Config::from_args(parse(&["-c", "1", "-s", "x"])).unwrap();
        assert_eq!(config.oauth.http_connect_timeout, 10);
        assert_eq!(config.oauth.http_request_timeout, 30);

        let config = Config::from_args(parse(&[
            "-c",
            "1",
            "-s",
            "x",
            "--http-connect-timeout",
            "3",
            "--http-timeout",
            "15",
        ]))
        .unwrap();
        assert_eq!(config.oauth.http_connect_timeout, 3);
        assert_eq!(config.oauth.http_request_timeout, 15);

        // Malformed values are rejected instead of silently defaulted
        assert!(
            CliArgs::try_parse_from(["strava-sync", "--http-connect-timeout", "soon"]).is_err()
        );
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = Config::from_args(parse(&["-c", "12345", "-s", "  "])).unwrap_err();
        assert!(err.to_string().contains("STRAVA_CLIENT_SECRET"));
    }

    #[test]
    fn test_oauth_defaults() {
        let oauth = OAuthConfig::new("id", "secret");
        assert_eq!(oauth.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(oauth.refresh_margin_secs, 3600);
        assert_eq!(oauth.auth_timeout, Duration::from_secs(300));
        assert!(oauth.validate().is_ok());
    }

    #[test]
    fn test_oauth_validate_rejects_remote_redirect() {
        let mut oauth = OAuthConfig::new("id", "secret");
        oauth.redirect_uri = "https://example.com/callback".to_string();
        assert!(matches!(
            oauth.validate(),
            Err(crate::error::AuthError::Config(_))
        ));
    }

    #[test]
    fn test_per_page_bounds() {
        let mut config = Config::from_args(parse(&["-c", "1", "-s", "x"])).unwrap();
        config.per_page = 0;
        assert!(config.validate().is_err());
        config.per_page = 200;
        assert!(config.validate().is_ok());
    }
}

// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and missing client credentials)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_client_id = std::env::var("STRAVA_CLIENT_ID").is_ok();
    let has_client_secret = std::env::var("STRAVA_CLIENT_SECRET").is_ok();

    !env_file_exists && (!has_client_id || !has_client_secret)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Run interactive setup to collect the Strava application credentials
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("Strava Sync - first time setup");
    println!();
    println!("No configuration found. Create an API application at");
    println!("  https://www.strava.com/settings/api");
    println!("and enter its credentials below.");
    println!();

    let client_id: String = Input::new()
        .with_prompt("Client ID (STRAVA_CLIENT_ID)")
        .interact_text()
        .context("Failed to read STRAVA_CLIENT_ID")?;

    if client_id.trim().is_empty() {
        anyhow::bail!("STRAVA_CLIENT_ID cannot be empty");
    }

    let client_secret: String = Password::new()
        .with_prompt("Client secret (STRAVA_CLIENT_SECRET)")
        .interact()
        .context("Failed to read STRAVA_CLIENT_SECRET")?;

    if client_secret.trim().is_empty() {
        anyhow::bail!("STRAVA_CLIENT_SECRET cannot be empty");
    }

    println!();
    println!("The redirect URI host must match the Authorization Callback Domain");
    println!("configured for the application (usually 'localhost').");
    let redirect_uri: String = Input::new()
        .with_prompt("Redirect URI")
        .default(DEFAULT_REDIRECT_URI.to_string())
        .interact_text()
        .context("Failed to read redirect URI")?;

    let config = InteractiveConfig {
        client_id: client_id.trim().to_string(),
        client_secret: client_secret.trim().to_string(),
        redirect_uri,
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    println!();
    Ok(config)
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Strava Sync Configuration
# Generated by interactive setup

# Strava API application (required)
STRAVA_CLIENT_ID={}
STRAVA_CLIENT_SECRET={}

# Must point at this machine; the port is where the callback listener binds
STRAVA_REDIRECT_URI={}

# Storage
STRAVA_TOKEN_FILE=strava_tokens.json
STRAVA_ACTIVITIES_FILE=strava_activities.json

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.client_id, config.client_secret, config.redirect_uri,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
