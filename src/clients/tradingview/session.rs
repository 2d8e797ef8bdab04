use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub cookies: Vec<SavedCookie>,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub saved_at: Option<String>,
}

impl SessionSnapshot {
    /// Builds a snapshot from a `Cookie` header value as produced by the jar.
    #[must_use]
    pub fn from_cookie_header(header: &str, domain: &str, csrf_token: Option<String>) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (!name.is_empty()).then(|| SavedCookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    domain: domain.to_string(),
                    path: default_path(),
                })
            })
            .collect();

        Self {
            cookies,
            csrf_token,
            saved_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// JSON file holding the remote session between restarts.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing and corrupt files both yield `None`; corruption is logged.
    pub async fn load(&self) -> Option<SessionSnapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved TradingView session");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session file");
                return None;
            }
        };

        match serde_json::from_str::<SessionSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt session file");
                None
            }
        }
    }

    /// Writes to a sibling temp file, then renames over the target.
    pub async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), cookies = snapshot.cookies.len(), "Saved TradingView session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("pinegate-session-{}", uuid::Uuid::new_v4()))
            .join("session.json")
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = temp_path();
        let store = SessionStore::new(&path);
        let snapshot = SessionSnapshot::from_cookie_header(
            "sessionid=abc; csrftoken=xyz",
            "www.tradingview.com",
            Some("xyz".to_string()),
        );

        store.save(&snapshot).await.unwrap();
        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();

        // temp files are renamed away, leaving only the session file
        let mut entries = std::fs::read_dir(path.parent().unwrap()).unwrap();
        assert_eq!(entries.next().unwrap().unwrap().file_name(), "session.json");
        assert!(entries.next().is_none());

        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.cookies.len(), 2);
        assert_eq!(loaded.cookies[0].name, "sessionid");
        assert_eq!(loaded.cookies[1].path, "/");
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let store = SessionStore::new(temp_path());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let path = temp_path();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = SessionStore::new(&path);
        assert!(store.load().await.is_none());
    }

    #[test]
    fn test_snapshot_accepts_minimal_json() {
        let snapshot: SessionSnapshot =
            serde_json::from_str(r#"{"cookies":[{"name":"a","value":"b","domain":"x"}]}"#).unwrap();
        assert_eq!(snapshot.cookies[0].path, "/");
        assert!(snapshot.csrf_token.is_none());
    }
}
