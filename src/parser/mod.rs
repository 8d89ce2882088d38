//! Email parsing: header decoding, boundary-aware stream reading, MIME
//! unpacking and HTML-to-text conversion.

pub mod header;
pub mod html;
pub mod mime;
pub mod multipart;
