use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserCookie;
use crate::error::Result;

/// One independently stored credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Long-lived account token (`auth_token`).
    SessionToken,
    /// Identifier mixed into the fingerprint key (`guest_id`).
    SessionIdentifier,
    /// Short-lived anti-forgery token (`ct0`).
    CsrfToken,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::SessionToken,
        CredentialKind::SessionIdentifier,
        CredentialKind::CsrfToken,
    ];

    #[inline]
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::SessionToken => "auth_token.txt",
            Self::SessionIdentifier => "guest_id.txt",
            Self::CsrfToken => "ct0.txt",
        }
    }

    /// Name of the cookie the platform uses for this value.
    #[inline]
    pub fn cookie_name(&self) -> &'static str {
        match self {
            Self::SessionToken => "auth_token",
            Self::SessionIdentifier => "guest_id",
            Self::CsrfToken => "ct0",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::SessionToken => "session token",
            Self::SessionIdentifier => "session identifier",
            Self::CsrfToken => "csrf token",
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Durable storage for credentials.
///
/// A missing value is `Ok(None)`, never an error. Saves replace the whole
/// value atomically: readers see either the old or the new value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, kind: CredentialKind) -> Result<Option<String>>;

    async fn save(&self, kind: CredentialKind, value: &str) -> Result<()>;

    async fn remove(&self, kind: CredentialKind) -> Result<()>;

    /// Full browser cookie jar captured at login, if any.
    async fn load_cookie_jar(&self) -> Result<Option<Vec<BrowserCookie>>>;

    async fn save_cookie_jar(&self, cookies: &[BrowserCookie]) -> Result<()>;
}
