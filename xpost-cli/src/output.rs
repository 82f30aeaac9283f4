use anyhow::Result;
#[cfg(feature = "colored-output")]
use colored::*;
use xpost::{FailureKind, PostResult};

use crate::cli::OutputFormat;

pub struct OutputManager {
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_post_result(&self, result: &PostResult) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
            OutputFormat::Pretty => Ok(self.format_pretty(result)),
        }
    }

    fn format_pretty(&self, result: &PostResult) -> String {
        if result.success {
            let id = result.id.as_deref().unwrap_or_default();
            return format!("{} post created, id {id}", self.ok_marker());
        }

        let reason = match &result.failure {
            Some(FailureKind::SoftError { messages }) if messages.is_empty() => {
                "rejected by the server".to_string()
            }
            Some(FailureKind::SoftError { messages }) => {
                format!("rejected by the server: {}", messages.join("; "))
            }
            Some(FailureKind::AmbiguousSuccess) => {
                "server answered 200 without an id; the post may or may not exist".to_string()
            }
            Some(FailureKind::AntiBotDetection) => {
                "rejected by the anti-bot layer (403); credentials may need a refresh".to_string()
            }
            Some(FailureKind::Http) | None => format!("HTTP {}", result.status),
        };
        format!("{} {reason}", self.fail_marker())
    }

    pub fn format_error(&self, error: &anyhow::Error) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "status": "error",
                "message": format!("{error:#}"),
                "requires_login": requires_login(error),
            })
            .to_string(),
            OutputFormat::Pretty => format!("{} {error:#}", self.error_marker()),
        }
    }

    #[cfg(feature = "colored-output")]
    fn ok_marker(&self) -> String {
        "✓".green().bold().to_string()
    }

    #[cfg(not(feature = "colored-output"))]
    fn ok_marker(&self) -> String {
        "✓".to_string()
    }

    #[cfg(feature = "colored-output")]
    fn fail_marker(&self) -> String {
        "✗".red().bold().to_string()
    }

    #[cfg(not(feature = "colored-output"))]
    fn fail_marker(&self) -> String {
        "✗".to_string()
    }

    #[cfg(feature = "colored-output")]
    fn error_marker(&self) -> String {
        "Error:".red().bold().to_string()
    }

    #[cfg(not(feature = "colored-output"))]
    fn error_marker(&self) -> String {
        "Error:".to_string()
    }
}

fn requires_login(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<xpost::XpostError>()
        .is_some_and(|e| e.requires_login())
}
