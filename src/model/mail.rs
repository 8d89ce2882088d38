//! Result of decomposing one message.

use super::attachment::Attachment;

/// Everything the unpacker pulls out of a message.
///
/// At most one plain-text body and one HTML (alternate) body are kept per
/// message. Every other leaf part ends up in `attachments`, in the order it
/// appeared in the stream. The HTML body is also listed as an attachment
/// under its synthesized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackedMail {
    /// The canonical `text/plain` body (empty if none).
    pub text: String,

    /// Raw `Content-Type` header value of the plain-text part, empty when
    /// the message had no plain-text part.
    pub content_type: String,

    /// The canonical unnamed non-plain body, usually `text/html` (empty if none).
    pub html: String,

    /// All attachment parts, in discovery order.
    pub attachments: Vec<Attachment>,
}

impl UnpackedMail {
    /// `true` when the message carries anything beyond a plain-text body.
    pub fn has_extra_parts(&self) -> bool {
        !self.attachments.is_empty() || !self.html.is_empty()
    }
}
