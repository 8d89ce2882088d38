//! RFC 2822 header handling: folding, header collections, `Content-Type`
//! parameters and RFC 2047 encoded-words.

use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use tracing::{debug, warn};

/// Fold continuation: a line break followed by whitespace.
static FOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n\s+").expect("valid fold regex"));

/// Mislabelled Latin-1 markers seen in the wild: `iso-8859-15`, `ISO-8859-1*en`, ...
static LATIN1_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)=\?iso-8859-1[0-9]?(?:\*[a-z0-9-]+)?\?([bq])\?").expect("valid marker regex")
});

/// Decode a raw header value into display text.
///
/// Unfolds continuation lines, canonicalizes Latin-1 charset labels, then
/// resolves RFC 2047 encoded-words. If any encoded-word cannot be decoded
/// the unfolded text is returned as is.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?=\r\n =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
pub fn decode_header(raw: &str) -> String {
    let unfolded = FOLD_RE.replace_all(raw, " ");
    let normalized = LATIN1_MARKER_RE.replace_all(&unfolded, |caps: &regex::Captures<'_>| {
        format!("=?iso-8859-1?{}?", caps[1].to_ascii_lowercase())
    });

    match try_decode_encoded_words(&normalized) {
        Some(decoded) => decoded,
        None => {
            debug!(header = %unfolded, "Malformed encoded-word, keeping header undecoded");
            unfolded.into_owned()
        }
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Returns `None` when a well-formed `=?charset?enc?text?=` token carries an
/// unknown encoding or undecodable payload. A stray `=?` that does not start
/// a token is kept literally.
fn try_decode_encoded_words(input: &str) -> Option<String> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // If the gap between two encoded words is only whitespace, skip it (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        match split_encoded_word(after_start) {
            Some(word) => {
                result.push_str(&word.decode()?);
                remaining = &after_start[word.consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    Some(result)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

impl EncodedWord<'_> {
    fn decode(&self) -> Option<String> {
        let bytes = match self.encoding.to_ascii_uppercase().as_str() {
            "B" => decode_base64(self.text.as_bytes())?,
            "Q" => decode_q_encoding(self.text),
            _ => return None,
        };
        Some(decode_charset(self.charset, &bytes))
    }
}

/// Syntactic split of `charset?encoding?text?=`. No whitespace is allowed inside.
fn split_encoded_word(s: &str) -> Option<EncodedWord<'_>> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let text = &rest2[..end];

    if charset.is_empty()
        || encoding.is_empty()
        || [charset, encoding, text]
            .iter()
            .any(|part| part.contains(char::is_whitespace))
    {
        return None;
    }

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(EncodedWord {
        charset,
        encoding,
        text,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Lenient base64: ignores whitespace, missing padding and trailing bits.
pub(crate) fn decode_base64(input: &[u8]) -> Option<Vec<u8>> {
    use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

    const LENIENT: GeneralPurpose = GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    );

    let compact: Vec<u8> = input
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    LENIENT.decode(compact).ok()
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => match hex_pair(bytes.get(i + 1..i + 3)) {
                Some(byte) => {
                    result.push(byte);
                    i += 3;
                }
                None => {
                    result.push(b'=');
                    i += 1;
                }
            },
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Parse two ASCII hex digits into a byte.
pub(crate) fn hex_pair(pair: Option<&[u8]>) -> Option<u8> {
    let pair = pair?;
    let hi = (*pair.first()? as char).to_digit(16)?;
    let lo = (*pair.get(1)? as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Decode bytes using a named charset.
pub(crate) fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let charset_lower = charset.trim().to_lowercase();
    match charset_lower.as_str() {
        "" | "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset_lower.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(
                    charset = charset,
                    "Unknown charset, falling back to UTF-8 lossy"
                );
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub(crate) fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

// ── Header collections ──────────────────────────────────────────

/// Headers of one MIME part: lowercase name → unfolded raw value.
///
/// Insertion order is kept; a repeated name replaces the earlier value
/// in place (last one wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Build a collection from header lines (line terminators optional).
    ///
    /// Continuation lines (starting with space or tab) are joined to the
    /// previous header with a single space. Lines without a colon are skipped.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::default();
        let mut pending: Option<(String, String)> = None;

        for line in lines {
            let line = line.trim_end_matches(['\r', '\n']);
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = pending.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            } else if let Some(colon_pos) = line.find(':') {
                if let Some((name, value)) = pending.take() {
                    map.insert(name, value);
                }
                let name = line[..colon_pos].trim().to_lowercase();
                let value = line[colon_pos + 1..].trim().to_string();
                pending = Some((name, value));
            }
        }
        if let Some((name, value)) = pending {
            map.insert(name, value);
        }

        map
    }

    /// Parse a header block given as text.
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.lines())
    }

    /// Insert or replace a header (name is matched case-insensitively).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value of a header, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed `Content-Type`, defaulting to `text/plain`.
    pub fn content_type(&self) -> ContentType {
        ContentType::parse(self.get("content-type").unwrap_or("text/plain"))
    }

    /// Lowercased `Content-Transfer-Encoding`, defaulting to `7bit`.
    pub fn transfer_encoding(&self) -> String {
        self.get("content-transfer-encoding")
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "7bit".to_string())
    }
}

/// A `Content-Type` value split into type, subtype and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercase main type (`"multipart"`).
    pub main_type: String,
    /// Lowercase subtype (`"mixed"`); empty if the header had none.
    pub sub_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse `type/subtype; key=value; key="quoted value"`.
    pub fn parse(value: &str) -> Self {
        let mut pieces = split_params(value).into_iter();
        let full_type = pieces.next().unwrap_or("").trim().to_lowercase();
        let full_type = if full_type.is_empty() {
            "text/plain".to_string()
        } else {
            full_type
        };
        let (main_type, sub_type) = match full_type.split_once('/') {
            Some((main, sub)) => (main.trim().to_string(), sub.trim().to_string()),
            None => (full_type.clone(), String::new()),
        };

        let params = pieces
            .filter_map(|piece| {
                let (key, val) = piece.split_once('=')?;
                Some((key.trim().to_lowercase(), unquote(val.trim()).to_string()))
            })
            .collect();

        Self {
            main_type,
            sub_type,
            params,
        }
    }

    /// Value of a parameter, case-insensitive key, unquoted.
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }
}

/// Strip one layer of surrounding double quotes or angle brackets.
/// Split on `;` outside double quotes. A backslash escapes the next
/// character inside quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                pieces.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&value[start..]);
    pieces
}

fn unquote(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('<') && s.ends_with('>')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
