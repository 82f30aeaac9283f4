use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use xpost::XpostConfig;

/// Loads and persists [`XpostConfig`] as TOML.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub inner: XpostConfig,
    pub path: PathBuf,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xpost")
            .join("config.toml")
    }

    fn resolve(path: Option<&Path>) -> PathBuf {
        path.map(Path::to_path_buf).unwrap_or_else(Self::default_path)
    }

    /// Read the file, falling back to defaults when it does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve(path);
        let inner = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            XpostConfig::default()
        };
        Ok(Self { inner, path })
    }

    /// Overwrite the file with the defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let config = Self {
            inner: XpostConfig::default(),
            path: Self::resolve(path),
        };
        config.save()?;
        Ok(config.path)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, self.show()?)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(&self.inner).context("failed to serialize configuration")
    }

    /// Apply command line overrides.
    pub fn with_credentials_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.inner.credentials.directory = dir;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpost::config::CookieQuoting;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("none.toml"))).unwrap();
        assert_eq!(config.inner.site.base_url, "https://x.com");
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[assembler]\ncookie_quoting = \"quoted\"\n\n[credentials]\ndirectory = \"/var/lib/xpost\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.inner.assembler.cookie_quoting, CookieQuoting::Quoted);
        assert_eq!(config.inner.credentials.directory, PathBuf::from("/var/lib/xpost"));
        assert_eq!(config.inner.csrf.csrf_cookie, "ct0");
    }

    #[test]
    fn test_reset_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        AppConfig::reset(Some(&path)).unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.inner.assembler.query_id, "F7hteriqzdRzvMfXM6Ul4w");
        assert_eq!(config.inner.bearer.markers.len(), 2);
        assert_eq!(
            config.inner.assembler.features,
            XpostConfig::default().assembler.features
        );
    }

    #[test]
    fn test_credentials_dir_override() {
        let config = AppConfig {
            inner: XpostConfig::default(),
            path: PathBuf::from("x.toml"),
        }
        .with_credentials_dir(Some(PathBuf::from("/tmp/creds")));
        assert_eq!(config.inner.credentials.directory, PathBuf::from("/tmp/creds"));
    }
}
