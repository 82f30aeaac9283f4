//! CSRF (`ct0`) acquisition through a real browser.
//!
//! The site sets its CSRF cookie from client-side script once it renders an
//! authenticated page, so the flow is:
//! 1. open an isolated browsing context and load the landing page
//! 2. inject the session token as a first-party cookie
//! 3. reload so the page renders authenticated
//! 4. poll the cookie jar until the CSRF cookie appears or the settle window ends
//!
//! The context is closed on every path, including timeouts.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::browser::{BrowserCookie, BrowserLauncher, BrowsingContext, ChromeLauncher, find_cookie};
use crate::config::{CsrfConfig, SiteConfig};
use crate::error::AcquisitionError;
use crate::utils::redact;

const COOKIE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait CsrfAcquirer: Send + Sync {
    /// Obtain a CSRF token bound to `session_token`. No retries at this layer.
    async fn acquire(&self, session_token: &str) -> Result<String, AcquisitionError>;
}

pub struct BrowserCsrfAcquirer<L = ChromeLauncher> {
    launcher: L,
    landing_url: String,
    cookie_domain: String,
    session_cookie: String,
    csrf_cookie: String,
    settle_delay: Duration,
    timeout: Duration,
}

impl BrowserCsrfAcquirer<ChromeLauncher> {
    pub fn from_config(site: &SiteConfig, csrf: &CsrfConfig) -> Self {
        Self::new(ChromeLauncher::from_config(csrf), site, csrf)
    }
}

impl<L: BrowserLauncher> BrowserCsrfAcquirer<L> {
    pub fn new(launcher: L, site: &SiteConfig, csrf: &CsrfConfig) -> Self {
        Self {
            launcher,
            landing_url: site.base_url.clone(),
            cookie_domain: site.cookie_domain.clone(),
            session_cookie: csrf.session_cookie.clone(),
            csrf_cookie: csrf.csrf_cookie.clone(),
            settle_delay: csrf.settle_delay(),
            timeout: csrf.timeout(),
        }
    }

    async fn harvest(
        &self,
        context: &mut dyn BrowsingContext,
        session_token: &str,
    ) -> Result<String, AcquisitionError> {
        context.navigate(&self.landing_url).await?;

        let cookie = BrowserCookie::session(&self.session_cookie, session_token, &self.cookie_domain);
        context.set_cookie(&cookie).await?;
        context.reload().await?;

        let deadline = Instant::now() + self.settle_delay;
        loop {
            let cookies = context.cookies().await?;
            if let Some(found) = find_cookie(&cookies, &self.csrf_cookie) {
                return Ok(found.value.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    cookie_count = cookies.len(),
                    "CSRF cookie absent after settle window"
                );
                return Err(AcquisitionError::TokenNotFound(self.csrf_cookie.clone()));
            }
            tokio::time::sleep(COOKIE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl<L: BrowserLauncher> CsrfAcquirer for BrowserCsrfAcquirer<L> {
    #[instrument(skip_all, fields(session_token = %redact(session_token)))]
    async fn acquire(&self, session_token: &str) -> Result<String, AcquisitionError> {
        let deadline = Instant::now() + self.timeout;

        let mut context = tokio::time::timeout_at(deadline, self.launcher.launch())
            .await
            .map_err(|_| AcquisitionError::Timeout(self.timeout))??;

        let result = tokio::time::timeout_at(deadline, self.harvest(context.as_mut(), session_token))
            .await
            .unwrap_or(Err(AcquisitionError::Timeout(self.timeout)));

        if let Err(e) = context.close().await {
            warn!(error = %e, "Failed to close browsing context");
        }

        match &result {
            Ok(token) => info!(csrf = %redact(token), "Acquired CSRF token"),
            Err(e) => warn!(error = %e, "CSRF acquisition failed"),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::browser::BrowserError;

    /// Scripted browser: `reveal_after_navigate` cookies appear on navigation,
    /// `reveal_after_reload` ones once the page reloads.
    #[derive(Clone, Default)]
    pub(crate) struct FakeLauncher {
        pub log: Arc<Mutex<Vec<String>>>,
        pub reveal_after_navigate: Vec<BrowserCookie>,
        pub reveal_after_reload: Vec<BrowserCookie>,
        pub fail_navigation: bool,
        pub reload_delay: Duration,
    }

    struct FakeContext {
        launcher: FakeLauncher,
        jar: Vec<BrowserCookie>,
    }

    #[async_trait]
    impl BrowsingContext for FakeContext {
        async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
            self.launcher.log.lock().push(format!("navigate {url}"));
            if self.launcher.fail_navigation {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                });
            }
            self.jar.extend(self.launcher.reveal_after_navigate.iter().cloned());
            Ok(())
        }

        async fn reload(&mut self) -> Result<(), BrowserError> {
            self.launcher.log.lock().push("reload".to_string());
            tokio::time::sleep(self.launcher.reload_delay).await;
            self.jar.extend(self.launcher.reveal_after_reload.iter().cloned());
            Ok(())
        }

        async fn set_cookie(&mut self, cookie: &BrowserCookie) -> Result<(), BrowserError> {
            self.launcher
                .log
                .lock()
                .push(format!("set_cookie {}={} secure={}", cookie.name, cookie.value, cookie.secure));
            self.jar.push(cookie.clone());
            Ok(())
        }

        async fn cookies(&mut self) -> Result<Vec<BrowserCookie>, BrowserError> {
            Ok(self.jar.clone())
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            self.launcher.log.lock().push("close".to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
            self.log.lock().push("launch".to_string());
            Ok(Box::new(FakeContext {
                launcher: self.clone(),
                jar: Vec::new(),
            }))
        }
    }

    fn acquirer(launcher: FakeLauncher, settle_ms: u64, timeout_secs: u64) -> BrowserCsrfAcquirer<FakeLauncher> {
        let csrf = CsrfConfig {
            settle_delay_ms: settle_ms,
            timeout_secs,
            ..Default::default()
        };
        BrowserCsrfAcquirer::new(launcher, &SiteConfig::default(), &csrf)
    }

    #[tokio::test]
    async fn test_acquire_reads_cookie_after_reload() {
        let launcher = FakeLauncher {
            reveal_after_reload: vec![BrowserCookie::new("ct0", "csrf1", ".x.com")],
            ..Default::default()
        };
        let log = launcher.log.clone();

        let token = acquirer(launcher, 100, 5).acquire("abc").await.unwrap();
        assert_eq!(token, "csrf1");
        assert_eq!(
            *log.lock(),
            vec![
                "launch".to_string(),
                "navigate https://x.com".to_string(),
                "set_cookie auth_token=abc secure=true".to_string(),
                "reload".to_string(),
                "close".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_cookie_is_token_not_found_and_closes() {
        let launcher = FakeLauncher::default();
        let log = launcher.log.clone();

        let err = acquirer(launcher, 50, 5).acquire("abc").await.unwrap_err();
        assert!(matches!(err, AcquisitionError::TokenNotFound(ref name) if name == "ct0"));
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn test_navigation_failure_still_closes() {
        let launcher = FakeLauncher {
            fail_navigation: true,
            ..Default::default()
        };
        let log = launcher.log.clone();

        let err = acquirer(launcher, 50, 5).acquire("abc").await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Browser(_)));
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_and_closes() {
        let launcher = FakeLauncher {
            reveal_after_reload: vec![BrowserCookie::new("ct0", "late", ".x.com")],
            reload_delay: Duration::from_secs(120),
            ..Default::default()
        };
        let log = launcher.log.clone();

        let err = acquirer(launcher, 50, 1).acquire("abc").await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout(_)));
        assert_eq!(log.lock().last().map(String::as_str), Some("close"));
    }
}
