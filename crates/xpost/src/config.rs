//! Typed configuration for every stage of the direct-API pipeline.
//!
//! All sections deserialize with `#[serde(default)]`, so a partial TOML file
//! only needs to name the values it overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graphql::features::default_features;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct XpostConfig {
    pub site: SiteConfig,
    pub credentials: CredentialsConfig,
    pub fingerprint: FingerprintConfig,
    pub csrf: CsrfConfig,
    pub bearer: BearerConfig,
    pub assembler: AssemblerConfig,
    pub client: ClientConfig,
    pub login: LoginConfig,
}

/// Target site identity and the browser identity we present to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Landing page, also used as `Origin`.
    pub base_url: String,
    /// Value of the `Host` header on API calls.
    pub api_host: String,
    /// Domain the session cookie is injected for.
    pub cookie_domain: String,
    pub user_agent: String,
    pub accept_language: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_platform: String,
    pub client_language: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://x.com".to_string(),
            api_host: "x.com".to_string(),
            cookie_domain: ".x.com".to_string(),
            user_agent: DEFAULT_UA.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            sec_ch_ua: r#""Not)A;Brand";v="8", "Chromium";v="138""#.to_string(),
            sec_ch_ua_platform: r#""Linux""#.to_string(),
            client_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Directory holding `auth_token.txt`, `guest_id.txt`, `ct0.txt` and `cookies.json`.
    pub directory: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Hex string mixed with the session identifier to derive the AES key.
    pub shared_secret: String,
    /// User agent reported inside the encrypted fingerprint.
    pub user_agent: String,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            shared_secret: "0e6be1f1e21ffc33590b888fd4dc81b19713e570e805d4e5df80a493c9571a05"
                .to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Chromium/Chrome binary. Looked up on `PATH` when unset.
    pub browser_executable: Option<PathBuf>,
    pub headless: bool,
    /// Extra command line switches passed to the browser.
    pub browser_args: Vec<String>,
    pub session_cookie: String,
    pub csrf_cookie: String,
    /// Wait after the authenticated reload before reading cookies.
    pub settle_delay_ms: u64,
    /// Upper bound for one whole acquisition.
    pub timeout_secs: u64,
    /// Upper bound for a single DevTools command.
    pub command_timeout_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            browser_executable: None,
            headless: true,
            browser_args: Vec::new(),
            session_cookie: "auth_token".to_string(),
            csrf_cookie: "ct0".to_string(),
            settle_delay_ms: 5_000,
            timeout_secs: 60,
            command_timeout_secs: 15,
        }
    }
}

impl CsrfConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Start and end marker surrounding the bearer token inside the client script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPair {
    pub start: String,
    pub end: String,
}

impl MarkerPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerConfig {
    /// Regexes locating the client bundle in the landing HTML, tried in order.
    /// Capture group 1 is the script URL.
    pub script_patterns: Vec<String>,
    /// Scripts fetched directly when no pattern matches the landing page.
    pub direct_script_urls: Vec<String>,
    /// Marker pairs tried in order against the script text.
    pub markers: Vec<MarkerPair>,
    /// Returned with a warning when scraping fails. Can go stale.
    pub fallback_token: Option<String>,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            script_patterns: vec![
                r#"<script[^>]+src="(https://abs\.twimg\.com/responsive-web/client-web[^"]*/main\.[0-9a-zA-Z]+\.js)""#.to_string(),
                r#"["'](https://abs\.twimg\.com/responsive-web/client-web[^"']*/main\.[0-9a-zA-Z]+\.js)["']"#.to_string(),
                r#"(https://abs\.twimg\.com/responsive-web/client-serviceworker/serviceworker\.[0-9a-f]+\.js)"#.to_string(),
            ],
            direct_script_urls: vec![
                "https://abs.twimg.com/responsive-web/client-serviceworker/serviceworker.bd07edaa.js"
                    .to_string(),
            ],
            markers: vec![
                MarkerPair::new(
                    r#":"Bearer "#,
                    r#""),Accept:"application/x-www-form-urlencoded"#,
                ),
                MarkerPair::new(r#""Bearer "#, r#"""#),
            ],
            fallback_token: None,
        }
    }
}

/// How credential values are written into the `Cookie` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CookieQuoting {
    /// `auth_token=abc; ct0=def`
    #[default]
    Unquoted,
    /// `auth_token="abc"; ct0="def"`
    Quoted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub query_id: String,
    pub cookie_quoting: CookieQuoting,
    /// Emission order of the request headers. Unlisted headers go last.
    pub header_order: Vec<String>,
    /// Static `X-Client-Transaction-Id` value; the header is omitted when unset.
    pub transaction_id: Option<String>,
    /// GraphQL feature switches sent with every mutation.
    pub features: BTreeMap<String, bool>,
}

pub const DEFAULT_HEADER_ORDER: &[&str] = &[
    "Host",
    "Cookie",
    "Content-Length",
    "Sec-Ch-Ua-Platform",
    "Authorization",
    "X-Csrf-Token",
    "Accept-Language",
    "Sec-Ch-Ua",
    "X-Twitter-Client-Language",
    "Sec-Ch-Ua-Mobile",
    "X-Twitter-Active-User",
    "X-Client-Transaction-Id",
    "X-Twitter-Auth-Type",
    "User-Agent",
    "Content-Type",
    "X-Xp-Forwarded-For",
    "Accept",
    "Origin",
    "Sec-Fetch-Site",
    "Sec-Fetch-Mode",
    "Sec-Fetch-Dest",
    "Referer",
    "Priority",
];

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            query_id: "F7hteriqzdRzvMfXM6Ul4w".to_string(),
            cookie_quoting: CookieQuoting::default(),
            header_order: DEFAULT_HEADER_ORDER.iter().map(|s| s.to_string()).collect(),
            transaction_id: None,
            features: default_features(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub request_timeout_secs: u64,
    /// Attempts per CSRF/bearer acquisition before giving up.
    pub acquisition_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub backoff_base_ms: u64,
    /// Re-acquire credentials and retry once when the call is rejected with 403.
    pub refresh_on_detection: bool,
    /// How long a fetched CSRF token is reused. `None` fetches one per call.
    pub csrf_max_age_secs: Option<u64>,
    /// Write freshly acquired CSRF tokens to the credential store.
    pub persist_csrf: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            acquisition_attempts: 3,
            backoff_base_ms: 1_000,
            refresh_on_detection: true,
            csrf_max_age_secs: Some(600),
            persist_csrf: true,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn csrf_max_age(&self) -> Option<Duration> {
        self.csrf_max_age_secs.map(Duration::from_secs)
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub login_url: String,
    pub identifier_cookie: String,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            login_url: "https://x.com/login".to_string(),
            identifier_cookie: "guest_id".to_string(),
            poll_interval_ms: 3_000,
            timeout_secs: 600,
        }
    }
}

impl LoginConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: XpostConfig = serde_json::from_value(serde_json::json!({
            "assembler": { "cookie_quoting": "quoted" },
            "csrf": { "settle_delay_ms": 10 }
        }))
        .unwrap();

        assert_eq!(config.assembler.cookie_quoting, CookieQuoting::Quoted);
        assert_eq!(config.assembler.query_id, "F7hteriqzdRzvMfXM6Ul4w");
        assert_eq!(config.csrf.settle_delay(), Duration::from_millis(10));
        assert_eq!(config.csrf.csrf_cookie, "ct0");
        assert_eq!(config.site.base_url, "https://x.com");
    }

    #[test]
    fn test_backoff_doubles() {
        let client = ClientConfig {
            backoff_base_ms: 100,
            ..Default::default()
        };
        assert_eq!(client.backoff(1), Duration::from_millis(100));
        assert_eq!(client.backoff(2), Duration::from_millis(200));
        assert_eq!(client.backoff(3), Duration::from_millis(400));
    }
}
