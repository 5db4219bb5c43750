// Token persistence on local disk

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::TokenSet;
use crate::error::{AuthError, Result};

/// Single-record JSON file holding the current token set
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted token set.
    ///
    /// A missing file means "never authorized" and yields `Ok(None)`. A file
    /// that exists but does not hold a complete record is an error; it is left
    /// on disk for the operator to inspect.
    pub async fn load(&self) -> Result<Option<TokenSet>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No token file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let tokens: TokenSet = serde_json::from_str(&content).map_err(|e| {
            AuthError::Storage(format!(
                "Token file {} is not a valid token record: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(Some(tokens))
    }

    /// Replace the persisted record with `tokens`.
    ///
    /// Writes a sibling temp file and renames it over the target so a reader
    /// never observes a half-written record.
    pub async fn save(&self, tokens: &TokenSet) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize tokens: {}", e)))?;

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).await.map_err(|e| {
            AuthError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await
            {
                tracing::warn!("Could not restrict token file permissions: {}", e);
            }
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AuthError::Storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        tracing::debug!("Token set saved to {}", self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenSet {
        TokenSet {
            access_token: "tok1".to_string(),
            refresh_token: "ref1".to_string(),
            expires_at: 1_700_021_600,
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("strava_tokens.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("strava_tokens.json"));

        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));

        // Temp file does not linger
        assert!(!dir.path().join("strava_tokens.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("tokens.json");
        let store = TokenStore::new(&path);

        store.save(&sample()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json"));
        store.save(&sample()).await.unwrap();

        let next = TokenSet {
            access_token: "tok2".to_string(),
            refresh_token: "ref2".to_string(),
            expires_at: 1_700_043_200,
        };
        store.save(&next).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn test_persisted_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        TokenStore::new(&path).save(&sample()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "tok1");
        assert_eq!(raw["refresh_token"], "ref1");
        assert_eq!(raw["expires_at"], 1_700_021_600i64);
    }

    #[tokio::test]
    async fn test_load_record_with_fractional_expiry_and_extra_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strava_tokens.json");
        std::fs::write(
            &path,
            r#"{"token_type":"Bearer","access_token":"tok1","refresh_token":"ref1","expires_in":21600,"expires_at":1760600000.4821}"#,
        )
        .unwrap();

        let store = TokenStore::new(&path);
        let tokens = store.load().await.unwrap().unwrap();
        assert_eq!(
            tokens,
            TokenSet {
                access_token: "tok1".to_string(),
                refresh_token: "ref1".to_string(),
                expires_at: 1_760_600_000,
            }
        );

        // Rewritten with an integer expiry
        store.save(&tokens).await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["expires_at"].is_i64());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"access_token":"tok1"}"#).unwrap();

        let store = TokenStore::new(&path);
        assert!(matches!(store.load().await, Err(AuthError::Storage(_))));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_save_failure_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        // Root ignores directory permissions; nothing to assert in that case
        if std::fs::write(locked.join("writable"), b"x").is_ok() {
            return;
        }

        let store = TokenStore::new(locked.join("tokens.json"));
        assert!(matches!(
            store.save(&sample()).await,
            Err(AuthError::Storage(_))
        ));
    }
}
