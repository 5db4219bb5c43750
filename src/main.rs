use anyhow::Result;
use std::sync::Arc;

use strava_sync::activities::ActivitiesClient;
use strava_sync::auth::{AuthManager, AuthorizationPrompt, BrowserPrompt, PrintPrompt, TokenStore};
use strava_sync::config;
use strava_sync::error::AuthError;

#[tokio::main]
async fn main() -> Result<()> {
    // Check if interactive setup is needed (no .env and missing credentials)
    if config::needs_interactive_setup() {
        let interactive_config = config::run_interactive_setup()?;

        // Set environment variables from interactive config so Config::load() can use them
        std::env::set_var("STRAVA_CLIENT_ID", &interactive_config.client_id);
        std::env::set_var("STRAVA_CLIENT_SECRET", &interactive_config.client_secret);
        std::env::set_var("STRAVA_REDIRECT_URI", &interactive_config.redirect_uri);
    }

    // Load configuration first (for log level)
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Strava Sync v{} starting...", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Token file: {}", config.token_file.display());

    let prompt: Arc<dyn AuthorizationPrompt> = if config.open_browser {
        Arc::new(BrowserPrompt)
    } else {
        Arc::new(PrintPrompt)
    };

    let auth_manager = Arc::new(AuthManager::new(
        config.oauth.clone(),
        TokenStore::new(&config.token_file),
        prompt,
    )?);

    let token = if config.force_login {
        auth_manager.authorize_interactive().await
    } else {
        auth_manager.get_valid_access_token().await
    };

    match token {
        Ok(token) => {
            tracing::info!(
                "Authentication successful (token: {}...)",
                &token[..8.min(token.len())]
            );
        }
        Err(e) => {
            tracing::error!("Authentication failed: {}", e);
            print_auth_guidance(&e);
            anyhow::bail!("Unable to obtain a Strava access token");
        }
    }

    if config.auth_only {
        println!("Token stored in {}", config.token_file.display());
        return Ok(());
    }

    let client = ActivitiesClient::new(
        auth_manager.clone(),
        &config.api_url,
        config.oauth.http_request_timeout,
    )?;

    println!();
    println!("Fetching activities...");
    match client
        .sync_to_file(&config.activities_file, config.per_page)
        .await
    {
        Ok(summary) if summary.activities == 0 => println!("No activities found"),
        Ok(summary) => println!(
            "Saved {} activities to '{}'",
            summary.activities,
            config.activities_file.display()
        ),
        Err(e) => {
            if let Some(auth_err) = e.downcast_ref::<AuthError>() {
                print_auth_guidance(auth_err);
            }
            return Err(e);
        }
    }

    Ok(())
}

/// Tell the user what to do next after a token failure
fn print_auth_guidance(err: &AuthError) {
    eprintln!();
    match err {
        AuthError::Config(_) => {
            eprintln!("Check STRAVA_CLIENT_ID / STRAVA_CLIENT_SECRET in your environment or .env file.");
        }
        AuthError::CsrfMismatch { .. } => {
            eprintln!("The authorization redirect did not belong to this login attempt and was rejected.");
            eprintln!("Run again to start a new authorization.");
        }
        AuthError::InteractiveTimeout(_) => {
            eprintln!("No authorization was received in time. Run again and approve access in the browser.");
        }
        AuthError::CallbackListener(_) => {
            eprintln!("The local callback listener could not start. Free the redirect URI port or");
            eprintln!("change STRAVA_REDIRECT_URI (and the app's callback domain) accordingly.");
        }
        e if e.requires_reauthorization() => {
            eprintln!("The stored authorization is no longer accepted by Strava.");
            eprintln!("Authorize again with:");
            eprintln!();
            eprintln!("    strava-sync --login");
        }
        _ => {
            eprintln!("Check your network connection and try again.");
        }
    }
    eprintln!();
}
