// Local listener for the OAuth redirect
// One listener per interactive attempt; dropped (and shut down) when the attempt ends

use axum::{
    extract::{Query, State},
    http::Uri,
    response::Html,
    routing::get,
    Router,
};
use url::Url;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::types::CallbackParams;
use crate::error::{AuthError, Result};

/// How long in-flight responses get to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Single-slot handoff from the HTTP handler to the waiting manager
type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Socket address and path the listener serves, derived from the redirect URI
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackTarget {
    pub addr: SocketAddr,
    pub path: String,
}

impl CallbackTarget {
    /// Parse a redirect URI that points back at this machine
    pub fn from_redirect_uri(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::Config(format!("Invalid redirect URI: {}", e)))?;

        if url.scheme() != "http" {
            return Err(AuthError::Config(format!(
                "Redirect URI must use http for the local listener: {}",
                redirect_uri
            )));
        }

        let ip: IpAddr = match url.host() {
            Some(url::Host::Domain(d)) if d.eq_ignore_ascii_case("localhost") => {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
            Some(url::Host::Ipv4(ip)) if ip.is_loopback() => IpAddr::V4(ip),
            Some(url::Host::Ipv6(ip)) if ip.is_loopback() => IpAddr::V6(ip),
            _ => {
                return Err(AuthError::Config(format!(
                    "Redirect URI must point at localhost: {}",
                    redirect_uri
                )))
            }
        };

        let port = url.port_or_known_default().ok_or_else(|| {
            AuthError::Config(format!("Redirect URI has no port: {}", redirect_uri))
        })?;

        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            addr: SocketAddr::new(ip, port),
            path,
        })
    }
}

/// Build the router that captures the redirect on `path`
pub fn callback_router(path: &str, slot: CallbackSlot) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(slot)
}

/// Read the redirect parameters out of a URL the user copied from the browser.
///
/// Used when the redirect cannot reach the local listener, e.g. the browser
/// runs on another machine. The result goes through the same state check as
/// a captured redirect.
pub fn parse_pasted_redirect(input: &str) -> Result<CallbackParams> {
    let uri: Uri = input
        .trim()
        .parse()
        .map_err(|e| AuthError::InvalidRedirect(format!("not a URL: {}", e)))?;

    if uri.query().map_or(true, str::is_empty) {
        return Err(AuthError::InvalidRedirect(
            "URL has no query; paste the whole address including ?state=...&code=...".to_string(),
        ));
    }

    let Query(params) = Query::<CallbackParams>::try_from_uri(&uri)
        .map_err(|e| AuthError::InvalidRedirect(e.to_string()))?;
    Ok(params)
}

async fn handle_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let denied = params.error.is_some();

    match slot.lock().await.take() {
        Some(sender) => {
            tracing::info!("Authorization redirect received");
            if sender.send(params).is_err() {
                tracing::warn!("Redirect arrived after the authorization wait ended");
            }
        }
        None => tracing::debug!("Ignoring additional redirect; code already captured"),
    }

    if denied {
        Html(DENIED_HTML)
    } else {
        Html(SUCCESS_HTML)
    }
}

/// Running callback listener.
///
/// Stops accepting connections as soon as it is dropped.
pub struct CallbackServer {
    local_addr: SocketAddr,
    receiver: Option<oneshot::Receiver<CallbackParams>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the port of `redirect_uri` and start serving in the background
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let target = CallbackTarget::from_redirect_uri(redirect_uri)?;

        let listener = TcpListener::bind(target.addr).await.map_err(|e| {
            AuthError::CallbackListener(format!(
                "Failed to bind {}: {}. Make sure no other process is using this port.",
                target.addr, e
            ))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::CallbackListener(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(&target.path, Arc::new(Mutex::new(Some(tx))));

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Callback listener failed: {}", e);
            }
            tracing::debug!("Callback listener on {} stopped", local_addr);
        });

        tracing::info!(
            "Waiting for authorization redirect on http://{}{}",
            local_addr,
            target.path
        );

        Ok(Self {
            local_addr,
            receiver: Some(rx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for the redirect, then tear the listener down
    pub async fn wait(mut self, timeout: Duration) -> Result<CallbackParams> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| AuthError::CallbackListener("redirect already consumed".to_string()))?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(AuthError::CallbackListener(
                "listener stopped before a redirect arrived".to_string(),
            )),
            Err(_) => Err(AuthError::InteractiveTimeout(timeout)),
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let Some(task) = self.task.take() else {
            return;
        };

        // Let the confirmation page finish, then make sure the task is gone
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let abort = task.abort_handle();
                    if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                        abort.abort();
                    }
                });
            }
            Err(_) => task.abort(),
        }
    }
}

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Strava Sync - Authorized</title>
    <style>
        body { font-family: system-ui, -apple-system, sans-serif; max-width: 600px; margin: 100px auto; text-align: center; }
        h1 { color: #fc4c02; }
        p { color: #64748b; }
    </style>
</head>
<body>
    <h1>Authorization received</h1>
    <p>You can close this window and return to the terminal.</p>
</body>
</html>"#;

const DENIED_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Strava Sync - Not authorized</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
    <h1>Authorization was not granted</h1>
    <p>You can close this window; the terminal shows what happened.</p>
</body>
</html>"#;
