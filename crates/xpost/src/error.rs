use thiserror::Error;

pub type Result<T> = std::result::Result<T, XpostError>;

/// Failures while obtaining CSRF or bearer credentials.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The flow completed but the token never showed up.
    #[error("token not found: {0}")]
    TokenNotFound(String),
    #[error("acquisition timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Fingerprint cipher failures. `Format` and `Authentication` only occur on decrypt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("malformed ciphertext: {0}")]
    Format(String),
    #[error("authentication tag mismatch")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
}

#[derive(Debug, Error)]
pub enum XpostError {
    /// A stored credential the caller must provide first (login) is missing.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl XpostError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Acquisition(_) | Self::Http(_))
    }

    /// Whether the caller has to run the login flow before anything else works.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
