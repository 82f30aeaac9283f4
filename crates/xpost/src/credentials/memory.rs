use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{CredentialKind, CredentialStore};
use crate::browser::BrowserCookie;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<CredentialKind, String>>,
    cookie_jar: RwLock<Option<Vec<BrowserCookie>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, e.g. `MemoryCredentialStore::new().with(SessionToken, "abc")`.
    pub fn with(self, kind: CredentialKind, value: impl Into<String>) -> Self {
        self.values.write().insert(kind, value.into());
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, kind: CredentialKind) -> Result<Option<String>> {
        Ok(self
            .values
            .read()
            .get(&kind)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn save(&self, kind: CredentialKind, value: &str) -> Result<()> {
        self.values.write().insert(kind, value.trim().to_string());
        Ok(())
    }

    async fn remove(&self, kind: CredentialKind) -> Result<()> {
        self.values.write().remove(&kind);
        Ok(())
    }

    async fn load_cookie_jar(&self) -> Result<Option<Vec<BrowserCookie>>> {
        Ok(self.cookie_jar.read().clone())
    }

    async fn save_cookie_jar(&self, cookies: &[BrowserCookie]) -> Result<()> {
        *self.cookie_jar.write() = Some(cookies.to_vec());
        Ok(())
    }
}
