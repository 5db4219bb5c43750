// Activity download and local JSON snapshot

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;

/// HTTP client for the athlete activities endpoint
pub struct ActivitiesClient {
    client: Client,

    /// Authentication manager
    auth_manager: Arc<AuthManager>,

    /// Base URL, e.g. https://www.strava.com/api/v3
    api_url: String,
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub activities: usize,
}

impl ActivitiesClient {
    pub fn new(auth_manager: Arc<AuthManager>, api_url: &str, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            auth_manager,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch every activity, one page at a time until an empty page
    pub async fn fetch_all(&self, per_page: u32) -> Result<Vec<Value>> {
        let url = format!("{}/athlete/activities", self.api_url);
        let mut activities = Vec::new();
        let mut page = 1u32;

        loop {
            // Asked per page so a long download survives a token expiring midway
            let access_token = self.auth_manager.get_valid_access_token().await?;

            tracing::debug!(page, per_page, "Fetching activities page");
            let response = self
                .client
                .get(&url)
                .bearer_auth(&access_token)
                .query(&[("per_page", per_page), ("page", page)])
                .send()
                .await
                .with_context(|| format!("Failed to request activities page {}", page))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Failed to fetch activities: {} - {}", status, body);
            }

            let batch: Vec<Value> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse activities page {}", page))?;

            if batch.is_empty() {
                break;
            }

            tracing::info!("Page {}: {} activities", page, batch.len());
            activities.extend(batch);
            page += 1;
        }

        Ok(activities)
    }

    /// Download all activities and write them to `path`
    pub async fn sync_to_file(&self, path: &Path, per_page: u32) -> Result<SyncSummary> {
        let activities = self.fetch_all(per_page).await?;

        if activities.is_empty() {
            tracing::info!("No activities found");
            return Ok(SyncSummary { activities: 0 });
        }

        save_activities(path, &activities).await?;
        Ok(SyncSummary {
            activities: activities.len(),
        })
    }
}

/// Write activities as pretty-printed UTF-8 JSON, replacing the file
pub async fn save_activities(path: &Path, activities: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(activities).context("Failed to serialize activities")?;

    match tokio::fs::write(path, json).await {
        Ok(()) => {
            tracing::info!("Saved {} activities to {}", activities.len(), path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(e).with_context(|| {
            format!(
                "No permission to write {}; change the file permissions or choose another path with -o",
                path.display()
            )
        }),
        Err(e) => Err(e).with_context(|| format!("Failed to write {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{now_epoch, PrintPrompt, TokenSet, TokenStore};
    use crate::config::OAuthConfig;
    use mockito::Matcher;
    use serde_json::json;

    async fn authed_client(server: &mockito::ServerGuard, dir: &tempfile::TempDir) -> ActivitiesClient {
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store
            .save(&TokenSet {
                access_token: "tok1".to_string(),
                refresh_token: "ref1".to_string(),
                expires_at: now_epoch() + 7200,
            })
            .await
            .unwrap();

        let mut config = OAuthConfig::new("12345", "shhh");
        config.token_url = format!("{}/oauth/token", server.url());
        let manager = AuthManager::new(config, store, Arc::new(PrintPrompt)).unwrap();

        ActivitiesClient::new(Arc::new(manager), &server.url(), 30).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_all_pages_until_empty() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        let page1 = server
            .mock("GET", "/athlete/activities")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("per_page".into(), "2".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .match_header("authorization", "Bearer tok1")
            .with_status(200)
            .with_body(json!([{"id": 1}, {"id": 2}]).to_string())
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/athlete/activities")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(json!([{"id": 3}]).to_string())
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/athlete/activities")
            .match_query(Matcher::UrlEncoded("page".into(), "3".into()))
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let client = authed_client(&server, &dir).await;
        let activities = client.fetch_all(2).await.unwrap();

        assert_eq!(activities.len(), 3);
        assert_eq!(activities[2]["id"], 3);
        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_error_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server
            .mock("GET", "/athlete/activities")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("Rate Limit Exceeded")
            .create_async()
            .await;

        let client = authed_client(&server, &dir).await;
        let err = client.fetch_all(30).await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Rate Limit Exceeded"));
    }

    #[tokio::test]
    async fn test_sync_with_no_activities_writes_nothing() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        server
            .mock("GET", "/athlete/activities")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = authed_client(&server, &dir).await;
        let out = dir.path().join("activities.json");
        let summary = client.sync_to_file(&out, 30).await.unwrap();

        assert_eq!(summary, SyncSummary { activities: 0 });
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_save_activities_pretty_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("strava_activities.json");

        let activities = vec![json!({"id": 1, "name": "Carrera matutina en Montjuïc"})];
        save_activities(&path, &activities).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Montjuïc"));
        assert!(content.contains("\n  "));
        let parsed: Vec<Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, activities);
    }
}
