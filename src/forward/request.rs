//! Builds the form-encoded POST that carries a message to the target.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::{
    percent_decode_str, percent_encode, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC,
};
use url::Url;

use crate::error::{MailpostError, Result};

/// Characters left unescaped in posted values: alphanumerics and `_.-/`.
const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'/');

/// Reference to a stored attachment, as announced to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub digest: String,
    pub mime_type: String,
    pub filename: String,
}

/// A fully prepared POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Target with any `user:pass@` removed.
    pub url: Url,
    /// `Basic <base64(user:pass)>` when the target URL carried credentials.
    pub authorization: Option<String>,
    /// `application/x-www-form-urlencoded` body.
    pub body: String,
}

impl OutgoingRequest {
    /// Build the request for `raw_message` and its stored attachments,
    /// in the order they were discovered.
    pub fn build(target_url: &str, raw_message: &[u8], attachments: &[AttachmentRef]) -> Result<Self> {
        let mut url = Url::parse(target_url).map_err(|e| MailpostError::InvalidUrl {
            url: target_url.to_string(),
            reason: e.to_string(),
        })?;
        let authorization = take_credentials(&mut url)?;

        Ok(Self {
            url,
            authorization,
            body: form_body(raw_message, attachments),
        })
    }
}

/// `Mail=<message>` followed by one `md5[]`/`mime-type[]`/`filename[]`
/// triple per attachment. Field names are sent as is.
pub fn form_body(raw_message: &[u8], attachments: &[AttachmentRef]) -> String {
    let mut body = String::with_capacity(raw_message.len() * 3 / 2 + 5);
    body.push_str("Mail=");
    body.extend(percent_encode(raw_message, FORM_VALUE));

    for attachment in attachments {
        body.push_str("&md5[]=");
        body.push_str(&attachment.digest);
        body.push_str("&mime-type[]=");
        body.extend(utf8_percent_encode(&attachment.mime_type, FORM_VALUE));
        body.push_str("&filename[]=");
        body.extend(utf8_percent_encode(&attachment.filename, FORM_VALUE));
    }

    body
}

/// Remove userinfo from `url`, returning the matching Basic credentials.
fn take_credentials(url: &mut Url) -> Result<Option<String>> {
    if url.username().is_empty() && url.password().is_none() {
        return Ok(None);
    }

    let user = percent_decode_str(url.username()).decode_utf8_lossy().into_owned();
    let password = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();

    let invalid = |url: &Url| MailpostError::InvalidUrl {
        url: url.to_string(),
        reason: "credentials cannot be removed from this URL".to_string(),
    };
    url.set_username("").map_err(|_| invalid(url))?;
    url.set_password(None).map_err(|_| invalid(url))?;

    Ok(Some(format!(
        "Basic {}",
        STANDARD.encode(format!("{user}:{password}"))
    )))
}
