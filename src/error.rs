//! Centralized error types for mailpost, and their mapping onto MTA exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes understood by sendmail-compatible MTAs (`sysexits.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Message delivered.
    Success = 0,
    /// Bad invocation: wrong arguments, malformed URL, unusable upload directory.
    Usage = 64,
    /// The target answered 404; the MTA bounces the mail to its sender.
    NoUser = 67,
    /// Anything retryable; the MTA queues the mail and tries again later.
    TempFail = 75,
    /// Permission denied. Defined for completeness, never produced.
    NoPerm = 77,
}

impl ExitCode {
    /// Numeric value handed to the operating system.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

/// All errors produced by the mailpost library.
#[derive(Error, Debug)]
pub enum MailpostError {
    /// The program was invoked incorrectly.
    #[error("Usage error: {0}")]
    Usage(String),

    /// The target URL could not be used.
    #[error("URL '{url}' is not valid: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The upload directory is missing or is not a directory.
    #[error("File upload directory '{}' is invalid", .0.display())]
    InvalidUploadDir(PathBuf),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The target answered 404 Not Found.
    #[error("URL at {url} doesn't exist")]
    NotFound { url: String },

    /// The target answered with a non-success status.
    #[error("Server at {url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The target tried to redirect the post elsewhere.
    #[error("Server at {url} answered with redirect {status} to {}", .location.as_deref().unwrap_or("<no location>"))]
    Redirect {
        url: String,
        status: u16,
        location: Option<String>,
    },

    /// Connection refused, DNS failure, timeout and friends.
    #[error("Could not reach {url}: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("Could not build HTTP client: {0}")]
    ClientBuild(reqwest::Error),
}

/// Convenience alias for `Result<T, MailpostError>`.
pub type Result<T> = std::result::Result<T, MailpostError>;

impl MailpostError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code the MTA should see for this failure.
    ///
    /// Everything that is not a usage problem or a missing mailbox is
    /// reported as temporary so the mail gets queued rather than lost.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(_) | Self::InvalidUrl { .. } | Self::InvalidUploadDir(_) => {
                ExitCode::Usage
            }
            Self::NotFound { .. } => ExitCode::NoUser,
            Self::Io { .. }
            | Self::HttpStatus { .. }
            | Self::Redirect { .. }
            | Self::Transport { .. }
            | Self::ClientBuild(_) => ExitCode::TempFail,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `MailpostError::io`).
impl From<std::io::Error> for MailpostError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
