//! Bearer token scraping from the public web client bundle.
//!
//! Strategies, in order:
//! 1. fetch the landing page and locate the client script with each configured pattern
//! 2. fetch the configured direct script URLs
//! 3. return the configured fallback token, with a warning
//!
//! Each fetched script is searched with every marker pair; the first
//! non-empty substring between a start and end marker wins.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{BearerConfig, MarkerPair, SiteConfig};
use crate::error::{AcquisitionError, Result, XpostError};
use crate::utils::redact;

#[async_trait]
pub trait BearerAcquirer: Send + Sync {
    /// Obtain the application-wide bearer token.
    async fn acquire(&self) -> std::result::Result<String, AcquisitionError>;
}

/// Finds a script URL in HTML. Relative matches resolve against the page URL.
#[derive(Debug, Clone)]
pub struct ScriptLocator {
    pattern: Regex,
}

impl ScriptLocator {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| XpostError::configuration(format!("invalid script pattern {pattern:?}: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn locate(&self, html: &str, page_url: &Url) -> Option<String> {
        let raw = self.pattern.captures(html)?.get(1)?.as_str();
        page_url.join(raw).ok().map(String::from)
    }
}

/// Substring strictly between `start` and the next `end`, if non-empty.
pub fn extract_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    let token = &text[from..from + len];
    (!token.is_empty()).then_some(token)
}

/// Try each marker pair in order.
pub fn extract_token(text: &str, markers: &[MarkerPair]) -> Option<String> {
    markers
        .iter()
        .find_map(|m| extract_between(text, &m.start, &m.end))
        .map(ToOwned::to_owned)
}

pub struct ScrapingBearerAcquirer {
    client: Client,
    landing_url: Url,
    user_agent: String,
    accept_language: String,
    locators: Vec<ScriptLocator>,
    direct_script_urls: Vec<String>,
    markers: Vec<MarkerPair>,
    fallback_token: Option<String>,
}

impl ScrapingBearerAcquirer {
    pub fn from_config(client: Client, site: &SiteConfig, bearer: &BearerConfig) -> Result<Self> {
        let landing_url = Url::parse(&site.base_url)
            .map_err(|e| XpostError::configuration(format!("invalid base_url {}: {e}", site.base_url)))?;
        let locators = bearer
            .script_patterns
            .iter()
            .map(|p| ScriptLocator::new(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            client,
            landing_url,
            user_agent: site.user_agent.clone(),
            accept_language: site.accept_language.clone(),
            locators,
            direct_script_urls: bearer.direct_script_urls.clone(),
            markers: bearer.markers.clone(),
            fallback_token: bearer.fallback_token.clone().filter(|t| !t.is_empty()),
        })
    }

    async fn fetch_text(
        &self,
        url: &str,
        accept: &str,
        dest: &str,
    ) -> std::result::Result<String, AcquisitionError> {
        let referer = self.landing_url.as_str();
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, &self.accept_language)
            .header(REFERER, referer)
            .header("Sec-Fetch-Dest", dest)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn script_candidates(&self) -> Vec<String> {
        let mut candidates = Vec::new();

        match self.fetch_text(self.landing_url.as_str(), "text/html", "document").await {
            Ok(html) => {
                for locator in &self.locators {
                    if let Some(url) = locator.locate(&html, &self.landing_url) {
                        if !candidates.contains(&url) {
                            debug!(%url, "Located client script");
                            candidates.push(url);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to fetch landing page"),
        }

        for url in &self.direct_script_urls {
            if !candidates.contains(url) {
                candidates.push(url.clone());
            }
        }
        candidates
    }

    async fn scrape(&self) -> std::result::Result<String, AcquisitionError> {
        let mut last_error = None;
        for url in self.script_candidates().await {
            match self.fetch_text(&url, "*/*", "script").await {
                Ok(script) => {
                    if let Some(token) = extract_token(&script, &self.markers) {
                        debug!(%url, "Bearer token found in script");
                        return Ok(token);
                    }
                    debug!(%url, bytes = script.len(), "No bearer marker in script");
                }
                Err(e) => {
                    warn!(%url, error = %e, "Failed to fetch script");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AcquisitionError::TokenNotFound("bearer token".to_string())))
    }
}

#[async_trait]
impl BearerAcquirer for ScrapingBearerAcquirer {
    #[instrument(skip(self))]
    async fn acquire(&self) -> std::result::Result<String, AcquisitionError> {
        match self.scrape().await {
            Ok(token) => {
                info!(bearer = %redact(&token), "Scraped bearer token");
                Ok(token)
            }
            Err(e) => match &self.fallback_token {
                Some(token) => {
                    warn!(error = %e, "Bearer scraping failed, using configured fallback token");
                    Ok(token.clone())
                }
                None => Err(e),
            },
        }
    }
}
