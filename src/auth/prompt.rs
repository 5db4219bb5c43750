// Surfacing the consent URL to the user

use std::io::Write;
use url::Url;

use crate::error::{AuthError, Result};

/// Shows the authorization URL to whoever has to click "Authorize"
pub trait AuthorizationPrompt: Send + Sync {
    fn present(&self, url: &Url) -> Result<()>;

    /// Whether the user may paste the redirect URL back by hand
    fn accepts_pasted_redirect(&self) -> bool {
        false
    }

    /// Block until the user pastes the URL the browser was redirected to.
    /// `None` once there is no more input to read.
    ///
    /// Runs on its own thread while the local listener keeps waiting, so a
    /// redirect that does reach this machine still completes the flow.
    fn read_pasted_redirect(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Opens the system browser, printing the URL as a fallback
pub struct BrowserPrompt;

impl AuthorizationPrompt for BrowserPrompt {
    fn present(&self, url: &Url) -> Result<()> {
        tracing::info!("Opening browser for Strava authorization...");
        println!("If the browser doesn't open automatically, visit:");
        println!("  {}", url);
        println!();

        if let Err(e) = open::that_detached(url.as_str()) {
            tracing::warn!("Could not open a browser: {}", e);
        }
        Ok(())
    }
}

/// For hosts without a browser.
///
/// The URL can be opened anywhere. When the browser is on another machine its
/// redirect to localhost fails to load there; the user copies that address
/// from the address bar and pastes it here instead.
pub struct PrintPrompt;

impl AuthorizationPrompt for PrintPrompt {
    fn present(&self, url: &Url) -> Result<()> {
        println!();
        println!("Authorize Strava access by visiting:");
        println!("  {}", url);
        println!();
        println!("If the browser is on another machine, the page it lands on after");
        println!("\"Authorize\" will not load. Copy that page's full URL and paste it below.");
        Ok(())
    }

    fn accepts_pasted_redirect(&self) -> bool {
        true
    }

    fn read_pasted_redirect(&self) -> Result<Option<String>> {
        print!("Redirect URL> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let read = std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| AuthError::InvalidRedirect(format!("failed to read input: {}", e)))?;

        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}
