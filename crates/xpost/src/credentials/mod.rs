//! Persistence of the account credentials the direct-API path depends on.
//!
//! - [`CredentialKind`]: the three independently stored secrets
//! - [`CredentialStore`]: async load/save abstraction
//! - [`FileCredentialStore`]: one trimmed text file per kind plus a JSON cookie jar
//! - [`MemoryCredentialStore`]: in-process store for embedding and tests

mod file;
mod memory;
mod store;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use store::{CredentialKind, CredentialStore};
