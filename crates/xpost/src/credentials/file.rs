use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::store::{CredentialKind, CredentialStore};
use crate::browser::BrowserCookie;
use crate::error::Result;

const COOKIE_JAR_FILE: &str = "cookies.json";

/// Stores each credential as a trimmed single-line text file inside `dir`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, kind: CredentialKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    fn cookie_jar_path(&self) -> PathBuf {
        self.dir.join(COOKIE_JAR_FILE)
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self
            .dir
            .join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, kind: CredentialKind) -> Result<Option<String>> {
        let value = Self::read_optional(&self.path_of(kind))
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        debug!(%kind, present = value.is_some(), "Loaded credential");
        Ok(value)
    }

    async fn save(&self, kind: CredentialKind, value: &str) -> Result<()> {
        self.write_atomic(&self.path_of(kind), value.trim().as_bytes())
            .await?;
        debug!(%kind, "Saved credential");
        Ok(())
    }

    async fn remove(&self, kind: CredentialKind) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(kind)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_cookie_jar(&self) -> Result<Option<Vec<BrowserCookie>>> {
        match Self::read_optional(&self.cookie_jar_path()).await? {
            Some(contents) if !contents.trim().is_empty() => {
                Ok(Some(serde_json::from_str(&contents)?))
            }
            _ => Ok(None),
        }
    }

    async fn save_cookie_jar(&self, cookies: &[BrowserCookie]) -> Result<()> {
        let json = serde_json::to_vec_pretty(cookies)?;
        self.write_atomic(&self.cookie_jar_path(), &json).await
    }
}
