use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use xpost::CredentialKind;

#[derive(Parser, Debug)]
#[command(
    name = "xpost",
    version,
    about = "Post and reply on x.com through the web client's GraphQL API",
    long_about = None
)]
pub struct Args {
    /// Configuration file (defaults to <config dir>/xpost/config.toml)
    #[arg(short, long, global = true, env = "XPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding auth_token.txt, guest_id.txt and ct0.txt
    #[arg(long, global = true, env = "XPOST_CREDENTIALS_DIR")]
    pub credentials_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Whether results (and errors) should be printed as JSON.
    pub fn wants_json(&self) -> bool {
        let output = match &self.command {
            Commands::Post { output, .. } | Commands::Reply { output, .. } => Some(*output),
            Commands::Decrypt { output, .. } => Some(*output),
            _ => None,
        };
        matches!(output, Some(OutputFormat::Json))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open a browser window, sign in by hand and store the session
    Login {
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Create a post
    Post {
        /// Post text; read from stdin when omitted
        content: Option<String>,

        /// Session identifier to key the fingerprint with instead of the stored one
        #[arg(long)]
        guest_id: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Reply to a post
    Reply {
        /// Permalink of the post to reply to (…/status/<id>)
        url: String,

        /// Reply text; read from stdin when omitted
        content: Option<String>,

        #[arg(long)]
        guest_id: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Inspect and manage stored credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Decrypt an X-Xp-Forwarded-For value
    Decrypt {
        /// Hex encoded header value
        value: String,

        /// Session identifier the value was encrypted for (defaults to the stored one)
        #[arg(long)]
        guest_id: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Show or reset the configuration file
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long)]
        reset: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialsAction {
    /// List stored credentials
    Show {
        /// Print full values instead of a redacted prefix
        #[arg(long)]
        reveal: bool,
    },

    /// Store a credential value
    Set { kind: KindArg, value: String },

    /// Remove one credential, or all of them
    Clear { kind: Option<KindArg> },

    /// Acquire a fresh CSRF token through the browser and store it
    RefreshCsrf,

    /// Scrape the bearer token from the web client
    Bearer {
        #[arg(long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    #[value(alias = "auth_token")]
    SessionToken,
    #[value(alias = "guest_id")]
    SessionIdentifier,
    #[value(alias = "ct0")]
    CsrfToken,
}

impl From<KindArg> for CredentialKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SessionToken => CredentialKind::SessionToken,
            KindArg::SessionIdentifier => CredentialKind::SessionIdentifier,
            KindArg::CsrfToken => CredentialKind::CsrfToken,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}
