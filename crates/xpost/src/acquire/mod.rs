//! Acquisition of the short-lived credentials the API call needs.

mod bearer;
mod csrf;

pub use bearer::{BearerAcquirer, ScrapingBearerAcquirer, ScriptLocator, extract_between, extract_token};
pub use csrf::{BrowserCsrfAcquirer, CsrfAcquirer};

#[cfg(test)]
pub(crate) use csrf::tests::FakeLauncher;
