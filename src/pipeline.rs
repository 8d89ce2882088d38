//! One delivery: unpack, store attachments, rewrite, post.

use std::fs;
use std::path::Path;

use tracing::{error, info, info_span};
use url::Url;

use crate::config::Config;
use crate::error::{ExitCode, MailpostError, Result};
use crate::forward::{AttachmentRef, Forwarder, OutgoingRequest};
use crate::model::address::EmailAddress;
use crate::parser::header::decode_header;
use crate::parser::mime::{split_message, unpack_mail};
use crate::rewrite::strip_attachments;
use crate::store::AttachmentStore;

/// Check that the target is an absolute `http`/`https` URL with a host.
pub fn validate_url(target_url: &str) -> Result<Url> {
    let invalid = |reason: &str| MailpostError::InvalidUrl {
        url: target_url.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(target_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

/// Make sure the upload directory exists and is a directory.
///
/// A missing directory is created when `create` is set; the result is
/// still rejected if it is not a directory afterwards.
pub fn prepare_upload_dir(upload_dir: &Path, create: bool) -> Result<()> {
    if create && !upload_dir.exists() {
        fs::create_dir_all(upload_dir).map_err(|e| {
            error!(path = %upload_dir.display(), error = %e, "Cannot create upload directory");
            MailpostError::InvalidUploadDir(upload_dir.to_path_buf())
        })?;
        info!(path = %upload_dir.display(), "Created upload directory");
    }
    if !upload_dir.is_dir() {
        return Err(MailpostError::InvalidUploadDir(upload_dir.to_path_buf()));
    }
    Ok(())
}

/// Store the attachments of `raw_message` and post the slimmed message.
///
/// Attachments are written before the post, so a failed post can be retried
/// by the MTA without losing anything; re-storing is a no-op.
pub fn process_and_post(
    target_url: &str,
    raw_message: &[u8],
    upload_dir: &Path,
    config: &Config,
) -> Result<()> {
    log_envelope(raw_message);

    let unpacked = unpack_mail(raw_message);
    let outgoing = if unpacked.has_extra_parts() {
        strip_attachments(raw_message)
    } else {
        raw_message.to_vec()
    };

    let store = AttachmentStore::new(
        upload_dir,
        config.storage.hash.hasher(),
        config.storage.chunk_size,
    );
    let mut refs = Vec::with_capacity(unpacked.attachments.len());
    for attachment in &unpacked.attachments {
        let stored = store.store(attachment)?;
        refs.push(AttachmentRef {
            digest: stored.digest,
            mime_type: attachment.mime_type(),
            filename: attachment.filename.clone(),
        });
    }

    let request = OutgoingRequest::build(target_url, &outgoing, &refs)?;
    Forwarder::new(&config.forward)?.send(&request)
}

fn log_envelope(raw_message: &[u8]) {
    let (headers, _) = split_message(raw_message);
    let from = headers.get("from").map(EmailAddress::parse).unwrap_or_default();
    let to = headers
        .get("to")
        .map(EmailAddress::parse_list)
        .unwrap_or_default();
    let subject = headers.get("subject").map(decode_header).unwrap_or_default();

    info!(
        from = %from.display(),
        to = ?to.iter().map(|a| a.address.as_str()).collect::<Vec<_>>(),
        subject = %subject,
        bytes = raw_message.len(),
        "Processing message"
    );
}

/// Validate the invocation, deliver one message and map the outcome to an
/// MTA exit code. Failures are logged before returning.
pub fn run(target_url: &str, upload_dir: &Path, raw_message: &[u8], config: &Config) -> ExitCode {
    let span = info_span!("deliver", upload_dir = %upload_dir.display());
    let _guard = span.enter();

    let result = validate_url(target_url)
        .and_then(|_| prepare_upload_dir(upload_dir, config.storage.create_upload_dir))
        .and_then(|()| process_and_post(target_url, raw_message, upload_dir, config));

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            let code = e.exit_code();
            error!(error = %e, exit_code = code.code(), "Delivery failed");
            code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://host/path").is_ok());
        assert!(validate_url("https://user:pw@host:8443/x").is_ok());
        assert!(validate_url("ftp://host/x").is_err());
        assert!(validate_url("host/path").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_prepare_creates_missing_dir() {
        let dir = assert_fs::TempDir::new().unwrap();
        let uploads = dir.child("a/b/uploads");
        prepare_upload_dir(uploads.path(), true).unwrap();
        assert!(uploads.path().is_dir());
    }

    #[test]
    fn test_prepare_rejects_file_and_missing_dir() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("plain-file");
        file.write_str("x").unwrap();

        let err = prepare_upload_dir(file.path(), true).unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::Usage);

        let missing = dir.child("missing");
        let err = prepare_upload_dir(missing.path(), false).unwrap_err();
        assert!(matches!(err, MailpostError::InvalidUploadDir(_)));
    }

    #[test]
    fn test_run_rejects_bad_url_before_touching_disk() {
        let dir = assert_fs::TempDir::new().unwrap();
        let uploads = dir.child("uploads");
        let code = run("mailto:x@y", uploads.path(), b"", &Config::default());
        assert_eq!(code, ExitCode::Usage);
        assert!(!uploads.path().exists());
    }
}
