//! Attachments recovered while unpacking a message.

/// One decoded, non-body MIME part.
///
/// Its storage identity is derived from `filebody` alone (see [`crate::store`]),
/// so two attachments with the same bytes share one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Decoded filename. Synthesized as `"<main>.<sub>"` for unnamed alternate bodies.
    pub filename: String,

    /// Transfer-decoded payload.
    pub filebody: Vec<u8>,

    /// Lowercase MIME main type (e.g. `"image"`).
    pub main_type: String,

    /// Lowercase MIME subtype (e.g. `"jpeg"`).
    pub sub_type: String,
}

impl Attachment {
    /// `"<main>/<sub>"`, as posted in the `mime-type[]` field.
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }
}
