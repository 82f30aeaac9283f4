mod cli;
mod commands;
mod config;
mod output;

use std::process;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, OutputFormat},
    commands::CommandExecutor,
    config::AppConfig,
    output::OutputManager,
};

/// Exit code when the server answered but no post was created.
const EXIT_NOT_CREATED: i32 = 2;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let format = if args.wants_json() {
        OutputFormat::Json
    } else {
        OutputFormat::Pretty
    };

    if let Err(e) = init_logging(args.verbose, args.quiet, args.log_json) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(EXIT_NOT_CREATED),
        Err(e) => {
            error!("Application error: {e:#}");
            let message = OutputManager::new(format).format_error(&e);
            match format {
                OutputFormat::Json => println!("{message}"),
                OutputFormat::Pretty => eprintln!("{message}"),
            }
            process::exit(1);
        }
    }
}

/// Returns `false` when a post or reply was not created.
async fn run(args: Args) -> Result<bool> {
    if let Commands::Completions { shell } = &args.command {
        let mut cmd = Args::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(true);
    }

    let config = AppConfig::load(args.config.as_deref())?.with_credentials_dir(args.credentials_dir);
    debug!(path = %config.path.display(), "Loaded configuration");
    let executor = CommandExecutor::new(config.inner.clone());

    match args.command {
        Commands::Login { timeout } => executor.login(timeout).await?,
        Commands::Post {
            content,
            guest_id,
            output,
        } => return executor.post(content, guest_id, output).await,
        Commands::Reply {
            url,
            content,
            guest_id,
            output,
        } => return executor.reply(&url, content, guest_id, output).await,
        Commands::Credentials { action } => executor.credentials(action).await?,
        Commands::Decrypt {
            value,
            guest_id,
            output,
        } => executor.decrypt(&value, guest_id, output).await?,
        Commands::Config { show, reset } => {
            if reset {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("✓ Configuration reset to defaults ({})", path.display());
            } else if show {
                println!("# {}", config.path.display());
                println!("{}", config.show()?);
            } else {
                println!("Use --show to display current configuration or --reset to reset to defaults");
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(true)
}

fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays machine readable.
    if json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }
    Ok(())
}
