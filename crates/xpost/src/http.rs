use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::Client;
use rustls::ClientConfig;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::debug;

use crate::error::{Result, XpostError};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used for scraping and for the GraphQL call.
///
/// Cookies are never stored by the client: every credential is sent explicitly
/// through the assembled `Cookie` header.
pub fn build_client(timeout: Duration) -> Result<Client> {
    install_rustls_provider();

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| XpostError::configuration(format!("tls protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| XpostError::configuration(format!("tls verifier: {e}")))?
        .with_no_client_auth();

    let mut builder = Client::builder().use_preconfigured_tls(tls_config);
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }

    Ok(builder.build()?)
}
