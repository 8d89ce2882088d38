//! MIME decomposition: walks a message in one forward pass and sorts its
//! leaves into the plain-text body, the HTML (alternate) body and attachments.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::header::{decode_base64, decode_charset, decode_header, hex_pair, ContentType, HeaderMap};
use super::html::html_to_text;
use super::multipart::MultipartReader;
use crate::model::attachment::Attachment;
use crate::model::mail::UnpackedMail;

/// Maximum multipart nesting followed before a container is kept as an opaque part.
const MAX_DEPTH: usize = 32;

/// Filename token in `Content-Disposition` (RFC 1806), quoted or not.
static DISPOSITION_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename="*(?P<filename>[^\s"]*)"*"#).expect("valid filename regex")
});

/// Charset declared in an HTML `<meta http-equiv>` tag.
static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta.*?content="text/html;\s*charset=([^"]*?)".*?>"#)
        .expect("valid meta regex")
});

/// Unpack a complete raw message (headers + body).
///
/// Never fails: undecodable parts are copied literally and a truncated
/// multipart structure simply ends early.
pub fn unpack_mail(raw_message: &[u8]) -> UnpackedMail {
    let mut reader = MultipartReader::new(strip_bom(raw_message));
    let mut attachments = Vec::new();
    let bodies = unpack_part(&mut reader, &mut attachments, 0);

    debug!(
        text_len = bodies.text.len(),
        html_len = bodies.html.len(),
        attachments = attachments.len(),
        "Unpacked message"
    );

    UnpackedMail {
        text: bodies.text,
        content_type: bodies.content_type,
        html: bodies.html,
        attachments,
    }
}

/// Content type and text of the message body, synthesizing plain text
/// from the HTML body when the message has no `text/plain` part.
///
/// The synthesized content type carries the charset declared in the HTML
/// `<meta>` tag, if any: `"text/plain;charset=utf-8;"`.
pub fn plain_body(raw_message: &[u8]) -> (String, String) {
    let unpacked = unpack_mail(raw_message);
    if !unpacked.content_type.is_empty() {
        return (unpacked.content_type, unpacked.text);
    }

    let charset = META_CHARSET_RE
        .captures(&unpacked.html)
        .map(|caps| format!("charset={};", &caps[1]))
        .unwrap_or_default();
    (
        format!("text/plain;{charset}"),
        html_to_text(&unpacked.html),
    )
}

/// Top-level headers and the undecoded body of a message.
pub fn split_message(raw_message: &[u8]) -> (HeaderMap, Vec<u8>) {
    let mut reader = MultipartReader::new(strip_bom(raw_message));
    let headers = reader.read_headers();
    let body = reader.read_body().to_vec();
    (headers, body)
}

/// Text channels of one (sub)tree; attachments are collected separately.
#[derive(Debug, Default)]
struct Bodies {
    text: String,
    content_type: String,
    html: String,
}

fn unpack_part(
    reader: &mut MultipartReader<'_>,
    attachments: &mut Vec<Attachment>,
    depth: usize,
) -> Bodies {
    let headers = reader.read_headers();
    let ctype = headers.content_type();
    let name = part_name(&headers, &ctype);

    if ctype.is_multipart() {
        match ctype.param("boundary") {
            // Headers ran straight into a delimiter: empty container
            _ if reader.at_delimiter() => return Bodies::default(),
            Some(boundary) if depth < MAX_DEPTH => {
                return unpack_multipart(reader, boundary, attachments, depth);
            }
            Some(_) => {
                warn!(depth, "Multipart nesting too deep, keeping container as a part");
            }
            None => {
                warn!(subtype = %ctype.sub_type, "Multipart part without boundary, keeping it as a part");
            }
        }
    }

    let body = decode_body(reader.read_body(), &headers.transfer_encoding());
    let mut bodies = Bodies::default();

    if ctype.main_type == "text" && ctype.sub_type == "plain" && name.is_none() {
        bodies.text = decode_charset(ctype.param("charset").unwrap_or(""), &body);
        bodies.content_type = headers
            .get("content-type")
            .filter(|v| !v.is_empty())
            .unwrap_or("text/plain")
            .to_string();
        return bodies;
    }

    // An unnamed non-plain part is the alternate body of the message
    let filename = match name {
        Some(name) => name,
        None => {
            bodies.html = decode_charset(ctype.param("charset").unwrap_or(""), &body);
            format!("{}.{}", ctype.main_type, ctype.sub_type)
        }
    };

    attachments.push(Attachment {
        filename: decode_header(&filename),
        filebody: body,
        main_type: ctype.main_type,
        sub_type: ctype.sub_type,
    });

    bodies
}

fn unpack_multipart(
    reader: &mut MultipartReader<'_>,
    boundary: &str,
    attachments: &mut Vec<Attachment>,
    depth: usize,
) -> Bodies {
    let mut bodies = Bodies::default();

    reader.push(boundary);
    // Preamble
    reader.skip_lines();

    while !reader.is_last() {
        if !reader.next() {
            break;
        }
        let child = unpack_part(reader, attachments, depth + 1);

        // First non-empty plain text wins
        if !child.content_type.is_empty() && bodies.text.is_empty() {
            bodies.text = child.text;
            bodies.content_type = child.content_type;
        }
        if !child.html.is_empty() {
            bodies.html = child.html;
        }
    }

    reader.pop();
    bodies
}

/// Filename from the `Content-Type` `name` parameter, else from `Content-Disposition`.
fn part_name(headers: &HeaderMap, ctype: &ContentType) -> Option<String> {
    if let Some(name) = ctype.param("name") {
        return Some(name.to_string());
    }

    let disposition = headers.get("content-disposition")?;
    DISPOSITION_FILENAME_RE
        .captures(disposition)
        .map(|caps| caps["filename"].to_string())
        .filter(|name| !name.is_empty())
}

/// Undo a part's `Content-Transfer-Encoding`.
///
/// `7bit`, `8bit`, `binary` and anything unrecognized are copied literally,
/// as is base64 that cannot be decoded.
fn decode_body(raw: &[u8], encoding: &str) -> Vec<u8> {
    match encoding {
        "base64" => {
            let alphabet_only: Vec<u8> = raw
                .iter()
                .copied()
                .filter(|b| b.is_ascii_alphanumeric() || matches!(*b, b'+' | b'/' | b'='))
                .collect();
            match decode_base64(&alphabet_only) {
                Some(bytes) => bytes,
                None => {
                    warn!(len = raw.len(), "Invalid base64 body, copying literally");
                    raw.to_vec()
                }
            }
        }
        "quoted-printable" => decode_quoted_printable(raw),
        "7bit" | "8bit" | "binary" => raw.to_vec(),
        other => {
            debug!(encoding = other, "Unknown transfer encoding, copying literally");
            raw.to_vec()
        }
    }
}

/// Decode a quoted-printable body (RFC 2045 §6.7).
///
/// Trailing whitespace is dropped from every line, `=` at end of line is a
/// soft break, malformed `=` escapes are kept as is.
fn decode_quoted_printable(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());

    for line in raw.split_inclusive(|&b| b == b'\n') {
        let terminator: &[u8] = if line.ends_with(b"\r\n") {
            b"\r\n"
        } else if line.ends_with(b"\n") {
            b"\n"
        } else {
            b""
        };
        let content = line[..line.len() - terminator.len()].trim_ascii_end();

        let (content, soft_break) = match content.strip_suffix(b"=") {
            Some(rest) => (rest, true),
            None => (content, false),
        };

        let mut i = 0;
        while i < content.len() {
            if content[i] == b'=' {
                if let Some(byte) = hex_pair(content.get(i + 1..i + 3)) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
            out.push(content[i]);
            i += 1;
        }

        if !soft_break {
            out.extend_from_slice(terminator);
        }
    }

    out
}

/// Skip a UTF-8 byte order mark.
fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}
