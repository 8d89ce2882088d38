//! CLI entry point for `mailpost`.
//!
//! Meant to be run by an MTA as a delivery command, e.g. from an alias:
//! `inbox: "|mailpost http://user:pw@host/inbox /var/spool/mailpost"`.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;

use mailpost::config::Config;
use mailpost::error::{ExitCode, MailpostError};
use mailpost::pipeline;

#[derive(Parser)]
#[command(name = "mailpost", version, about)]
struct Cli {
    /// URL the message is posted to; `user:pass@` becomes Basic auth
    #[arg(value_name = "TARGET_URL")]
    target_url: String,

    /// Directory attachments are stored under, by content hash
    #[arg(value_name = "UPLOAD_DIR")]
    upload_dir: PathBuf,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> std::process::ExitCode {
    // MTAs only understand sysexits codes, so argument errors exit 64 rather than clap's 2
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return parse_failure_code(&e).into();
        }
    };

    let config = mailpost::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let raw_message = match read_stdin() {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Could not read message");
            return ExitCode::TempFail.into();
        }
    };

    pipeline::run(&cli.target_url, &cli.upload_dir, &raw_message, &config).into()
}

/// Help and version requests succeed; every other argument error is a
/// usage error.
fn parse_failure_code(e: &clap::Error) -> ExitCode {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
        kind => MailpostError::Usage(kind.as_str().unwrap_or("invalid arguments").to_string())
            .exit_code(),
    }
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut raw = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut raw)
        .context("reading message from stdin")?;
    tracing::debug!(bytes = raw.len(), "Read message");
    Ok(raw)
}

/// Set up logging to stderr, plus a log file when `general.log_dir` is set.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config
        .general
        .log_dir
        .as_ref()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());
    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::never(log_dir, "mailpost.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}
