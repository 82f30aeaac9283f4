//! The direct-API client: one context object owning every collaborator.
//!
//! A call loads the stored session credentials, acquires the bearer and CSRF
//! tokens concurrently, assembles the forged request, sends it and classifies
//! the response. Setup failures are `Err`; anything the server answers is an
//! `Ok(PostResult)`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::acquire::{BearerAcquirer, BrowserCsrfAcquirer, CsrfAcquirer, ScrapingBearerAcquirer};
use crate::config::{ClientConfig, XpostConfig};
use crate::credentials::{CredentialKind, CredentialStore, FileCredentialStore};
use crate::error::{AcquisitionError, Result, XpostError};
use crate::graphql::{
    PostResult, RequestAssembler, RequestCredentials, extract_status_id, interpret, parse_body,
    validate_content,
};
use crate::http::build_client;
use crate::utils::redact;

/// A CSRF token together with the session token it was issued for.
#[derive(Debug, Clone)]
struct CachedCsrf {
    session_token: String,
    token: String,
    fetched_at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Action<'a> {
    Post { content: &'a str },
    Reply { content: &'a str, target_url: &'a str },
}

pub struct DirectApiClient {
    store: Arc<dyn CredentialStore>,
    csrf: Arc<dyn CsrfAcquirer>,
    bearer: Arc<dyn BearerAcquirer>,
    assembler: RequestAssembler,
    http: Client,
    config: ClientConfig,
    // Held across acquisition so one client never runs two browsers at once.
    csrf_cache: Mutex<Option<CachedCsrf>>,
    bearer_cache: RwLock<Option<String>>,
}

impl DirectApiClient {
    pub fn builder(config: XpostConfig) -> DirectApiClientBuilder {
        DirectApiClientBuilder::new(config)
    }

    /// Client with the file store, browser CSRF acquirer and scraping bearer acquirer.
    pub fn from_config(config: XpostConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    #[instrument(skip(self, content, session_identifier), fields(content_len = content.len()))]
    pub async fn create_direct_post(
        &self,
        content: &str,
        session_identifier: Option<&str>,
    ) -> Result<PostResult> {
        validate_content(content)?;
        self.execute(Action::Post { content }, session_identifier)
            .await
    }

    #[instrument(skip(self, content, session_identifier), fields(content_len = content.len()))]
    pub async fn create_direct_reply(
        &self,
        content: &str,
        target_url: &str,
        session_identifier: Option<&str>,
    ) -> Result<PostResult> {
        validate_content(content)?;
        extract_status_id(target_url)?;
        self.execute(Action::Reply { content, target_url }, session_identifier)
            .await
    }

    /// Drop the cached CSRF token and acquire a new one for the stored session.
    pub async fn refresh_csrf(&self) -> Result<String> {
        let session_token = self.require(CredentialKind::SessionToken).await?;
        self.csrf_cache.lock().await.take();
        self.csrf_token(&session_token).await
    }

    /// Cached bearer token, scraping it on first use.
    pub async fn bearer_token(&self) -> Result<String> {
        let cached = self.bearer_cache.read().clone();
        if let Some(token) = cached {
            return Ok(token);
        }
        let token = self
            .with_retries("bearer", || self.bearer.acquire())
            .await?;
        *self.bearer_cache.write() = Some(token.clone());
        Ok(token)
    }

    /// Forget the cached CSRF and bearer tokens.
    pub async fn invalidate(&self) {
        self.csrf_cache.lock().await.take();
        self.bearer_cache.write().take();
    }

    async fn require(&self, kind: CredentialKind) -> Result<String> {
        self.store.load(kind).await?.ok_or_else(|| {
            XpostError::configuration(format!(
                "no {kind} stored ({}); run the login flow first",
                kind.file_name()
            ))
        })
    }

    async fn csrf_token(&self, session_token: &str) -> Result<String> {
        let mut cache = self.csrf_cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            let fresh = self
                .config
                .csrf_max_age()
                .is_some_and(|max_age| cached.fetched_at.elapsed() < max_age);
            if cached.session_token == session_token && fresh {
                debug!(csrf = %redact(&cached.token), "Reusing cached CSRF token");
                return Ok(cached.token.clone());
            }
            debug!("Cached CSRF token is stale or bound to another session");
        }

        let token = self
            .with_retries("csrf", || self.csrf.acquire(session_token))
            .await?;

        if self.config.persist_csrf {
            if let Err(e) = self.store.save(CredentialKind::CsrfToken, &token).await {
                warn!(error = %e, "Failed to persist CSRF token (non-fatal)");
            }
        }

        *cache = self.config.csrf_max_age().map(|_| CachedCsrf {
            session_token: session_token.to_string(),
            token: token.clone(),
            fetched_at: Instant::now(),
        });
        Ok(token)
    }

    async fn with_retries<F, Fut>(&self, what: &'static str, mut op: F) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<String, AcquisitionError>>,
    {
        let attempts = self.config.acquisition_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(token) => return Ok(token),
                Err(e) if attempt < attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Acquisition failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn execute(
        &self,
        action: Action<'_>,
        session_identifier: Option<&str>,
    ) -> Result<PostResult> {
        let session_token = self.require(CredentialKind::SessionToken).await?;
        let session_identifier = match session_identifier.map(str::trim).filter(|s| !s.is_empty()) {
            Some(sid) => sid.to_string(),
            None => self.require(CredentialKind::SessionIdentifier).await?,
        };

        let mut result = self
            .attempt(action, &session_token, &session_identifier)
            .await?;

        if result.requires_credential_refresh() && self.config.refresh_on_detection {
            warn!(
                status = result.status,
                "Request rejected by anti-bot layer, refreshing credentials and retrying once"
            );
            self.invalidate().await;
            result = self
                .attempt(action, &session_token, &session_identifier)
                .await?;
        }

        if result.success {
            info!(id = ?result.id, "Post created");
        } else {
            warn!(status = result.status, failure = ?result.failure, "Post not created");
        }
        Ok(result)
    }

    async fn attempt(
        &self,
        action: Action<'_>,
        session_token: &str,
        session_identifier: &str,
    ) -> Result<PostResult> {
        let (bearer_token, csrf_token) =
            tokio::try_join!(self.bearer_token(), self.csrf_token(session_token))?;

        let creds = RequestCredentials {
            session_token,
            csrf_token: &csrf_token,
            bearer_token: &bearer_token,
            session_identifier,
        };
        let request = match action {
            Action::Post { content } => self.assembler.build_create_post(content, creds)?,
            Action::Reply {
                content,
                target_url,
            } => self
                .assembler
                .build_create_reply(content, target_url, creds)?,
        };

        debug!(url = %request.url, "Sending CreateTweet");
        let response = request.into_request(&self.http).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(status, body_len = text.len(), "CreateTweet response");

        Ok(interpret(status, parse_body(&text)))
    }
}

/// Swaps individual collaborators; anything left unset comes from the config.
pub struct DirectApiClientBuilder {
    config: XpostConfig,
    store: Option<Arc<dyn CredentialStore>>,
    csrf: Option<Arc<dyn CsrfAcquirer>>,
    bearer: Option<Arc<dyn BearerAcquirer>>,
    http: Option<Client>,
}

impl DirectApiClientBuilder {
    pub fn new(config: XpostConfig) -> Self {
        Self {
            config,
            store: None,
            csrf: None,
            bearer: None,
            http: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn csrf_acquirer(mut self, acquirer: Arc<dyn CsrfAcquirer>) -> Self {
        self.csrf = Some(acquirer);
        self
    }

    pub fn bearer_acquirer(mut self, acquirer: Arc<dyn BearerAcquirer>) -> Self {
        self.bearer = Some(acquirer);
        self
    }

    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<DirectApiClient> {
        let config = self.config;
        let http = match self.http {
            Some(client) => client,
            None => build_client(config.client.request_timeout())?,
        };

        let store = self.store.unwrap_or_else(|| {
            Arc::new(FileCredentialStore::new(config.credentials.directory.clone()))
        });
        let csrf = self.csrf.unwrap_or_else(|| {
            Arc::new(BrowserCsrfAcquirer::from_config(&config.site, &config.csrf))
        });
        let bearer = match self.bearer {
            Some(bearer) => bearer,
            None => Arc::new(ScrapingBearerAcquirer::from_config(
                http.clone(),
                &config.site,
                &config.bearer,
            )?),
        };

        Ok(DirectApiClient {
            store,
            csrf,
            bearer,
            assembler: RequestAssembler::new(config.site, config.assembler, &config.fingerprint),
            http,
            config: config.client,
            csrf_cache: Mutex::new(None),
            bearer_cache: RwLock::new(None),
        })
    }
}
