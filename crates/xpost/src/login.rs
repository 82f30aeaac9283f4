//! Interactive login: a visible browser where the user signs in by hand.
//!
//! The cookie jar is polled until both the session token and the session
//! identifier are present; both are then stored together with the full jar.
//! A stored CSRF token belongs to the previous session, so it is removed.

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::browser::{BrowserCookie, BrowserLauncher, BrowsingContext, find_cookie};
use crate::config::LoginConfig;
use crate::credentials::{CredentialKind, CredentialStore};
use crate::error::{AcquisitionError, Result};
use crate::utils::redact;

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session_token: String,
    pub session_identifier: String,
    pub cookie_count: usize,
}

struct Captured {
    session_token: String,
    session_identifier: String,
    jar: Vec<BrowserCookie>,
}

async fn wait_for_session(
    context: &mut dyn BrowsingContext,
    config: &LoginConfig,
    session_cookie: &str,
) -> Result<Captured> {
    context.navigate(&config.login_url).await?;
    info!(url = %config.login_url, "Waiting for the login to complete in the browser window");

    let deadline = Instant::now() + config.timeout();
    loop {
        let jar = context.cookies().await?;
        let token = find_cookie(&jar, session_cookie).map(|c| c.value.clone());
        let identifier = find_cookie(&jar, &config.identifier_cookie).map(|c| c.value.clone());

        match (token, identifier) {
            (Some(session_token), Some(session_identifier)) => {
                return Ok(Captured {
                    session_token,
                    session_identifier,
                    jar,
                });
            }
            (token, identifier) => debug!(
                has_session_token = token.is_some(),
                has_session_identifier = identifier.is_some(),
                "Login not finished yet"
            ),
        }

        if Instant::now() >= deadline {
            return Err(AcquisitionError::Timeout(config.timeout()).into());
        }
        tokio::time::sleep(config.poll_interval()).await;
    }
}

/// Run the login flow and persist what it captured.
///
/// `session_cookie` is the cookie carrying the session token (`auth_token`).
#[instrument(skip_all)]
pub async fn interactive_login<L>(
    launcher: &L,
    store: &dyn CredentialStore,
    config: &LoginConfig,
    session_cookie: &str,
) -> Result<LoginOutcome>
where
    L: BrowserLauncher + ?Sized,
{
    let mut context = launcher.launch().await?;
    let captured = wait_for_session(context.as_mut(), config, session_cookie).await;
    if let Err(e) = context.close().await {
        warn!(error = %e, "Failed to close login browser");
    }
    let captured = captured?;

    store
        .save(CredentialKind::SessionToken, &captured.session_token)
        .await?;
    store
        .save(CredentialKind::SessionIdentifier, &captured.session_identifier)
        .await?;
    store.remove(CredentialKind::CsrfToken).await?;
    store.save_cookie_jar(&captured.jar).await?;

    info!(
        session_token = %redact(&captured.session_token),
        session_identifier = %redact(&captured.session_identifier),
        cookies = captured.jar.len(),
        "Login captured"
    );

    Ok(LoginOutcome {
        session_token: captured.session_token,
        session_identifier: captured.session_identifier,
        cookie_count: captured.jar.len(),
    })
}
