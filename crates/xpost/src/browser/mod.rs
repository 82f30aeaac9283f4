//! Browser-engine abstraction used for credential harvesting.
//!
//! Some tokens are only set by client-side script after an authenticated page
//! render, so they have to be collected from a real browser. The
//! [`BrowserLauncher`] / [`BrowsingContext`] traits hide the engine; the
//! shipped implementation drives Chromium over the DevTools protocol
//! ([`ChromeLauncher`]).
//!
//! Every launched context owns its own browser process and profile, so two
//! acquisitions never share a cookie jar.

mod cdp;
mod launcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cdp::CdpContext;
pub use launcher::ChromeLauncher;

use crate::error::{AcquisitionError, XpostError};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("devtools connection failed: {0}")]
    Connect(String),
    #[error("{method} failed: {message}")]
    Protocol { method: String, message: String },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("browser connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrowserError> for AcquisitionError {
    fn from(err: BrowserError) -> Self {
        AcquisitionError::Browser(err.to_string())
    }
}

impl From<BrowserError> for XpostError {
    fn from(err: BrowserError) -> Self {
        XpostError::Browser(err.to_string())
    }
}

/// A cookie as reported by (or injected into) the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; absent or negative for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            expires: None,
            http_only: false,
            secure: false,
        }
    }

    /// Secure, HTTP-only first-party cookie, the way the site sets its session cookie.
    pub fn session(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            http_only: true,
            secure: true,
            ..Self::new(name, value, domain)
        }
    }
}

/// Find a cookie by name in a jar.
pub fn find_cookie<'a>(cookies: &'a [BrowserCookie], name: &str) -> Option<&'a BrowserCookie> {
    cookies
        .iter()
        .find(|c| c.name == name && !c.value.is_empty())
}

/// One isolated page with its own cookie jar.
#[async_trait]
pub trait BrowsingContext: Send {
    /// Navigate and wait for the load event.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Reload the current page and wait for the load event.
    async fn reload(&mut self) -> Result<(), BrowserError>;

    async fn set_cookie(&mut self, cookie: &BrowserCookie) -> Result<(), BrowserError>;

    /// Every cookie in this context's jar.
    async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError>;

    /// Release the context and its engine. Idempotent.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowsingContext>, BrowserError>;
}
