//! Direct GraphQL posting for x.com.
//!
//! The pipeline for one post or reply:
//!
//! 1. load the session token and session identifier from a [`CredentialStore`]
//! 2. acquire the bearer token ([`ScrapingBearerAcquirer`]) and a CSRF token
//!    ([`BrowserCsrfAcquirer`]) concurrently
//! 3. encrypt a fresh device fingerprint ([`FingerprintCipher`])
//! 4. assemble the `CreateTweet` call ([`RequestAssembler`])
//! 5. classify the answer into a [`PostResult`]
//!
//! [`DirectApiClient`] wires these together and caches the short-lived tokens.

pub mod acquire;
pub mod browser;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod graphql;
pub mod http;
pub mod login;
pub mod utils;

pub use acquire::{BearerAcquirer, BrowserCsrfAcquirer, CsrfAcquirer, ScrapingBearerAcquirer};
pub use browser::{BrowserCookie, BrowserLauncher, BrowsingContext, ChromeLauncher};
pub use client::{DirectApiClient, DirectApiClientBuilder};
pub use config::XpostConfig;
pub use credentials::{CredentialKind, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{AcquisitionError, CipherError, Result, XpostError};
pub use fingerprint::{FingerprintCipher, FingerprintPayload};
pub use graphql::{AssembledRequest, FailureKind, PostResult, RequestAssembler};
pub use login::{LoginOutcome, interactive_login};
