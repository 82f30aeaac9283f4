use anyhow::{Context, Result, bail};
use tokio::io::AsyncReadExt;
use tracing::info;
use xpost::browser::ChromeLauncher;
use xpost::http::build_client;
use xpost::utils::redact;
use xpost::{
    BearerAcquirer, CredentialKind, CredentialStore, DirectApiClient, FileCredentialStore, FingerprintCipher,
    PostResult, ScrapingBearerAcquirer, XpostConfig, interactive_login,
};

use crate::cli::{CredentialsAction, OutputFormat};
use crate::output::OutputManager;

/// Runs subcommands against one loaded configuration.
pub struct CommandExecutor {
    config: XpostConfig,
}

impl CommandExecutor {
    pub fn new(config: XpostConfig) -> Self {
        Self { config }
    }

    fn store(&self) -> FileCredentialStore {
        FileCredentialStore::new(self.config.credentials.directory.clone())
    }

    fn client(&self) -> Result<DirectApiClient> {
        DirectApiClient::from_config(self.config.clone()).context("failed to set up the client")
    }

    pub async fn login(&self, timeout: Option<u64>) -> Result<()> {
        let mut login = self.config.login.clone();
        if let Some(timeout) = timeout {
            login.timeout_secs = timeout;
        }
        let launcher = ChromeLauncher::from_config(&self.config.csrf).headless(false);
        let store = self.store();

        println!("A browser window will open. Sign in; it closes once the session is captured.");
        let outcome = interactive_login(&launcher, &store, &login, &self.config.csrf.session_cookie)
            .await
            .context("login failed")?;

        println!(
            "Stored session token {} and session identifier {} ({} cookies) in {}",
            redact(&outcome.session_token),
            redact(&outcome.session_identifier),
            outcome.cookie_count,
            store.dir().display()
        );
        Ok(())
    }

    /// Returns whether the post was created.
    pub async fn post(
        &self,
        content: Option<String>,
        guest_id: Option<String>,
        output: OutputFormat,
    ) -> Result<bool> {
        let content = read_content(content).await?;
        let result = self
            .client()?
            .create_direct_post(&content, guest_id.as_deref())
            .await?;
        print_result(&result, output)
    }

    pub async fn reply(
        &self,
        url: &str,
        content: Option<String>,
        guest_id: Option<String>,
        output: OutputFormat,
    ) -> Result<bool> {
        let content = read_content(content).await?;
        let result = self
            .client()?
            .create_direct_reply(&content, url, guest_id.as_deref())
            .await?;
        print_result(&result, output)
    }

    pub async fn credentials(&self, action: CredentialsAction) -> Result<()> {
        let store = self.store();
        match action {
            CredentialsAction::Show { reveal } => {
                println!("Credential directory: {}", store.dir().display());
                for kind in CredentialKind::ALL {
                    let value = match store.load(kind).await? {
                        Some(v) if reveal => v,
                        Some(v) => redact(&v),
                        None => "(not set)".to_string(),
                    };
                    println!("  {:<20} {:<16} {value}", kind.describe(), kind.file_name());
                }
                let jar = store.load_cookie_jar().await?;
                println!(
                    "  {:<20} {}",
                    "cookie jar",
                    jar.map(|j| format!("{} cookies", j.len()))
                        .unwrap_or_else(|| "(not set)".to_string())
                );
            }
            CredentialsAction::Set { kind, value } => {
                let kind = CredentialKind::from(kind);
                if value.trim().is_empty() {
                    bail!("refusing to store an empty {kind}");
                }
                store.save(kind, &value).await?;
                if kind == CredentialKind::SessionToken {
                    // A stored CSRF token belongs to the previous session.
                    store.remove(CredentialKind::CsrfToken).await?;
                }
                println!("Stored {kind} in {}", store.path_of(kind).display());
            }
            CredentialsAction::Clear { kind } => {
                let kinds: Vec<CredentialKind> = match kind {
                    Some(kind) => vec![CredentialKind::from(kind)],
                    None => CredentialKind::ALL.to_vec(),
                };
                for kind in kinds {
                    store.remove(kind).await?;
                    println!("Removed {kind}");
                }
            }
            CredentialsAction::RefreshCsrf => {
                let token = self.client()?.refresh_csrf().await?;
                println!("Stored new CSRF token {}", redact(&token));
            }
            CredentialsAction::Bearer { show } => {
                let http = build_client(self.config.client.request_timeout())?;
                let acquirer =
                    ScrapingBearerAcquirer::from_config(http, &self.config.site, &self.config.bearer)?;
                let token = acquirer.acquire().await?;
                println!("{}", if show { token } else { redact(&token) });
            }
        }
        Ok(())
    }

    pub async fn decrypt(&self, value: &str, guest_id: Option<String>, output: OutputFormat) -> Result<()> {
        let guest_id = match guest_id {
            Some(id) => id,
            None => self
                .store()
                .load(CredentialKind::SessionIdentifier)
                .await?
                .context("no session identifier stored; pass --guest-id")?,
        };

        let cipher = FingerprintCipher::new(self.config.fingerprint.shared_secret.clone());
        let plaintext = cipher
            .decrypt_bytes(value, &guest_id)
            .context("failed to decrypt fingerprint")?;
        let text = String::from_utf8_lossy(&plaintext);

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) if output == OutputFormat::Json => println!("{json}"),
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{text}"),
        }
        Ok(())
    }
}

async fn read_content(content: Option<String>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }
    info!("Reading content from stdin");
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("failed to read stdin")?;
    Ok(buffer.trim_end_matches(['\r', '\n']).to_string())
}

fn print_result(result: &PostResult, output: OutputFormat) -> Result<bool> {
    println!("{}", OutputManager::new(output).format_post_result(result)?);
    Ok(result.success)
}
