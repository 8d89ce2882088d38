//! Slims an outgoing message once its attachments are stored locally.
//!
//! A multipart message that carried attachments or an HTML body is cut
//! down to its first top-level sub-part; the receiver fetches everything
//! else by content address.

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::{debug, warn};

use crate::parser::mime::unpack_mail;

/// Drop every top-level sub-part but the first when the message carries
/// attachments or an HTML body. Otherwise the message is returned as is.
pub fn strip_attachments(raw_message: &[u8]) -> Vec<u8> {
    if !unpack_mail(raw_message).has_extra_parts() {
        return raw_message.to_vec();
    }

    match keep_first_part(raw_message) {
        Some(rewritten) => {
            debug!(
                original = raw_message.len(),
                rewritten = rewritten.len(),
                "Stripped attachments from message"
            );
            rewritten
        }
        None => raw_message.to_vec(),
    }
}

/// Re-serialize a multipart message with only its first child.
///
/// `None` when the message does not parse or its root is not multipart.
fn keep_first_part(raw_message: &[u8]) -> Option<Vec<u8>> {
    let envelope_len = from_line_len(raw_message);
    let message = &raw_message[envelope_len..];

    let Some(parsed) = MessageParser::default().parse(message) else {
        warn!("Message could not be parsed for rewriting, forwarding it unchanged");
        return None;
    };

    let root = parsed.root_part();
    let PartType::Multipart(children) = &root.body else {
        debug!("Root part is not multipart, nothing to strip");
        return None;
    };
    let boundary = root.content_type()?.attribute("boundary")?;
    let first = parsed.part(*children.first()?)?;

    let header_block = message.get(root.raw_header_offset()..root.raw_body_offset())?;
    let part_start = first.raw_header_offset();
    let part_end = delimiter_offset(message, first.raw_body_offset().saturating_sub(1), boundary)
        .unwrap_or(first.raw_end_offset());
    let first_part = message.get(part_start..part_end.max(part_start))?;

    let eol: &[u8] = if header_block.windows(2).any(|w| w == b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    };

    let mut out = Vec::with_capacity(
        envelope_len + header_block.len() + first_part.len() + 2 * boundary.len() + 16,
    );
    out.extend_from_slice(&raw_message[..envelope_len]);
    out.extend_from_slice(header_block);
    if !header_block.ends_with(b"\n\n") && !header_block.ends_with(b"\r\n\r\n") {
        out.extend_from_slice(eol);
    }
    let dashes: &[u8] = b"--";
    for chunk in [dashes, boundary.as_bytes(), eol] {
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(first_part);
    for chunk in [eol, dashes, boundary.as_bytes(), dashes, eol] {
        out.extend_from_slice(chunk);
    }

    Some(out)
}

/// Offset of the line break that opens the next `--boundary` line at or
/// after `from`. A preceding `\r` is included in the line break.
fn delimiter_offset(message: &[u8], from: usize, boundary: &str) -> Option<usize> {
    let delimiter = format!("\n--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut search = from;
    loop {
        let at = search
            + message
                .get(search..)?
                .windows(delimiter.len())
                .position(|w| w == delimiter)?;
        // A longer boundary sharing this prefix is not a match
        match message.get(at + delimiter.len()) {
            None | Some(b'\r' | b'\n' | b'-' | b' ' | b'\t') => {
                return Some(if at > 0 && message[at - 1] == b'\r' { at - 1 } else { at });
            }
            Some(_) => search = at + 1,
        }
    }
}

/// Length of a leading mbox `From ` line, terminator included.
fn from_line_len(data: &[u8]) -> usize {
    if !data.starts_with(b"From ") {
        return 0;
    }
    data.iter()
        .position(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_ATTACHMENT: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: inbox@example.org\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"SEP\"\r\n\
\r\n\
This is a multi-part message in MIME format.\r\n\
--SEP\r\n\
Content-Type: text/plain; charset=us-ascii\r\n\
\r\n\
See attached.\r\n\
--SEP\r\n\
Content-Type: application/octet-stream; name=\"blob.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
QklOQVJZUEFZTE9BRA==\r\n\
--SEP--\r\n";

    #[test]
    fn test_plain_message_unchanged() {
        let raw = b"Subject: hi\r\n\r\nJust text\r\n";
        assert_eq!(strip_attachments(raw), raw.to_vec());
    }

    #[test]
    fn test_attachment_payload_removed() {
        let rewritten = strip_attachments(WITH_ATTACHMENT);
        let text = String::from_utf8(rewritten.clone()).unwrap();

        assert!(text.starts_with("From: Alice <alice@example.com>\r\n"));
        assert!(text.contains("Subject: Report\r\n"));
        assert!(text.contains("See attached."));
        assert!(!text.contains("QklOQVJZUEFZTE9BRA=="));
        assert!(!text.contains("blob.bin"));
        assert!(text.ends_with("--SEP--\r\n"));

        let unpacked = unpack_mail(&rewritten);
        assert_eq!(unpacked.text, "See attached.");
        assert!(unpacked.attachments.is_empty());
    }

    #[test]
    fn test_trailing_blank_line_of_first_part_kept() {
        let raw = b"Subject: s\r\n\
Content-Type: multipart/mixed; boundary=S\r\n\
\r\n\
--S\r\n\
Content-Type: text/plain\r\n\
\r\n\
line1\r\n\
\r\n\
--S\r\n\
Content-Type: application/octet-stream; name=x.bin\r\n\
\r\n\
xx\r\n\
--S--\r\n";
        let before = unpack_mail(raw);
        let after = unpack_mail(&strip_attachments(raw));
        assert_eq!(before.text, "line1\r\n");
        assert_eq!(after.text, before.text);
        assert!(after.attachments.is_empty());
    }

    #[test]
    fn test_delimiter_offset_skips_longer_boundary() {
        let data = b"body\r\n--b2\r\ninner\r\n--b\r\nnext";
        assert_eq!(delimiter_offset(data, 0, "b"), Some(17));
        assert_eq!(delimiter_offset(data, 0, "b2"), Some(4));
        assert_eq!(delimiter_offset(b"no delimiter\n", 0, "b"), None);
    }

    #[test]
    fn test_html_alternative_reduced_to_first_part() {
        let raw = b"Subject: alt\n\
Content-Type: multipart/alternative; boundary=b1\n\
\n\
--b1\n\
Content-Type: text/plain\n\
\n\
plain version\n\
--b1\n\
Content-Type: text/html\n\
\n\
<p>html version</p>\n\
--b1--\n";
        let rewritten = String::from_utf8(strip_attachments(raw)).unwrap();
        assert!(rewritten.contains("plain version"));
        assert!(!rewritten.contains("html version"));
        assert!(!rewritten.contains('\r'));
    }

    #[test]
    fn test_single_html_part_unchanged() {
        let raw = b"Content-Type: text/html\n\n<p>only html</p>\n";
        assert_eq!(strip_attachments(raw), raw.to_vec());
    }

    #[test]
    fn test_from_line_kept() {
        let mut raw = b"From alice@example.com Mon Jan  1 00:00:00 2024\r\n".to_vec();
        raw.extend_from_slice(WITH_ATTACHMENT);
        let rewritten = strip_attachments(&raw);
        assert!(rewritten.starts_with(b"From alice@example.com Mon"));
        assert!(!rewritten.windows(8).any(|w| w == b"blob.bin"));
    }
}
