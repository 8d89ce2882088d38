//! Forward-only reader over a MIME byte stream with a stack of active boundaries.
//!
//! The reader hands out one line at a time and reports "no more lines" as
//! soon as it meets a delimiter of *any* enclosing multipart, so a recursive
//! unpacker can consume nested parts in a single pass without building a
//! tree first. `level` records which boundary stopped the stream (1 = the
//! innermost) and `last` whether it was a closing `--boundary--` marker.

use tracing::warn;

use super::header::{decode_header_bytes, HeaderMap};

/// Line-oriented reader that stops at multipart delimiters.
#[derive(Debug)]
pub struct MultipartReader<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Vec<u8>>,
    level: usize,
    last: bool,
    truncated: bool,
}

impl<'a> MultipartReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            level: 0,
            last: false,
            truncated: false,
        }
    }

    /// Number of boundaries currently pushed.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// `true` while the stream is halted on a delimiter.
    pub fn at_delimiter(&self) -> bool {
        self.level > 0
    }

    /// `true` once the closing marker of the current level was seen
    /// (or the data ran out while boundaries were still open).
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Enter a multipart container delimited by `boundary`.
    ///
    /// Must not be called while halted on a delimiter.
    pub fn push(&mut self, boundary: &str) {
        debug_assert_eq!(self.level, 0, "push while halted on a delimiter");
        self.stack.push(boundary.as_bytes().to_vec());
    }

    /// Leave the innermost multipart container.
    pub fn pop(&mut self) {
        if self.stack.pop().is_none() {
            return;
        }
        if self.level <= 1 {
            self.last = false;
        }
        self.level = self.level.saturating_sub(1);
    }

    /// Skip to the next sibling part of the innermost container.
    ///
    /// Returns `false` when the container is finished: its closing marker
    /// was reached, an outer delimiter cut it short, or the data ended.
    pub fn next(&mut self) -> bool {
        while self.read_line().is_some() {}
        if self.level > 1 || self.last {
            return false;
        }
        self.level = 0;
        true
    }

    /// Read one line including its terminator.
    ///
    /// Returns `None` at end of data or when the line is a delimiter of an
    /// open boundary; the delimiter itself is consumed.
    pub fn read_line(&mut self) -> Option<&'a [u8]> {
        if self.level > 0 {
            return None;
        }

        if self.pos >= self.data.len() {
            if !self.stack.is_empty() {
                warn!(
                    open_boundaries = self.stack.len(),
                    "Message ended before its closing boundary"
                );
                self.level = self.stack.len();
                self.last = true;
                self.truncated = true;
            }
            return None;
        }

        let start = self.pos;
        let end = self.data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i + 1)
            .unwrap_or(self.data.len());
        let line = &self.data[start..end];
        self.pos = end;

        if !line.starts_with(b"--") || self.stack.is_empty() {
            return Some(line);
        }

        // Trailing whitespace on marker lines is ignored
        let marker = line.trim_ascii_end();
        for (i, boundary) in self.stack.iter().rev().enumerate() {
            let Some(rest) = marker[2..].strip_prefix(boundary.as_slice()) else {
                continue;
            };
            if rest.is_empty() {
                self.last = false;
            } else if rest == b"--" {
                self.last = true;
            } else {
                continue;
            }
            self.level = i + 1;
            return None;
        }

        Some(line)
    }

    /// Consume and discard lines up to the next delimiter (e.g. a preamble).
    pub fn skip_lines(&mut self) {
        while self.read_line().is_some() {}
    }

    /// Read a part's header block.
    ///
    /// Stops at the first empty line, at a delimiter, or at a line that is
    /// neither a header nor a continuation (that line is left unread and
    /// becomes the first body line). A leading mbox `From ` envelope line
    /// is skipped.
    pub fn read_headers(&mut self) -> HeaderMap {
        let mut lines: Vec<String> = Vec::new();
        let mut first = true;

        loop {
            let line_start = self.pos;
            let Some(line) = self.read_line() else {
                break;
            };
            if first && line.starts_with(b"From ") {
                first = false;
                continue;
            }
            first = false;

            if line == b"\n" || line == b"\r\n" {
                break;
            }
            let is_continuation = line.starts_with(b" ") || line.starts_with(b"\t");
            if !(is_continuation && !lines.is_empty()) && !line.contains(&b':') {
                self.pos = line_start;
                break;
            }
            lines.push(decode_header_bytes(line));
        }

        HeaderMap::from_lines(lines.iter().map(String::as_str))
    }

    /// Read the rest of the current part's body.
    ///
    /// The line break immediately preceding a delimiter belongs to the
    /// delimiter and is not part of the body.
    pub fn read_body(&mut self) -> &'a [u8] {
        let start = self.pos;
        let mut end = start;
        while self.read_line().is_some() {
            end = self.pos;
        }

        let body = &self.data[start..end];
        if self.level > 0 && !self.truncated {
            strip_line_break(body)
        } else {
            body
        }
    }
}

/// Remove one trailing `\r\n` or `\n`.
fn strip_line_break(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n")
        .or_else(|| data.strip_suffix(b"\n"))
        .unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &[u8] = b"preamble\r\n\
--outer\r\n\
Content-Type: text/plain\r\n\
\r\n\
first\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
\r\n\
inner one\r\n\
--inner--\r\n\
inner epilogue\r\n\
--outer--\r\n\
epilogue\r\n";

    #[test]
    fn test_reads_until_delimiter() {
        let mut reader = MultipartReader::new(NESTED);
        reader.push("outer");
        assert_eq!(reader.read_line(), Some(&b"preamble\r\n"[..]));
        assert_eq!(reader.read_line(), None);
        assert!(reader.at_delimiter());
        assert!(!reader.is_last());
    }

    #[test]
    fn test_walks_nested_levels() {
        let mut reader = MultipartReader::new(NESTED);
        reader.push("outer");
        reader.skip_lines();

        assert!(reader.next());
        let headers = reader.read_headers();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(reader.read_body(), b"first");

        assert!(reader.next());
        let headers = reader.read_headers();
        assert!(headers.content_type().is_multipart());
        reader.push("inner");
        reader.skip_lines();
        assert!(reader.next());
        assert!(reader.read_headers().is_empty());
        assert_eq!(reader.read_body(), b"inner one");
        assert!(!reader.next());
        assert!(reader.is_last());
        reader.pop();
        assert!(!reader.is_last());

        // The inner epilogue is skipped and the outer close marker ends the walk
        assert!(!reader.next());
        assert!(reader.is_last());
        reader.pop();
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn test_outer_delimiter_cuts_inner_level() {
        let data = b"--a\nContent-Type: multipart/mixed; boundary=b\n\n--b\n\nx\n--a--\n";
        let mut reader = MultipartReader::new(data);
        reader.push("a");
        reader.skip_lines();
        assert!(reader.next());
        reader.read_headers();
        reader.push("b");
        reader.skip_lines();
        assert!(reader.next());
        reader.read_headers();
        assert_eq!(reader.read_body(), b"x");
        // Stopped by the outer "--a--": level 2
        assert!(!reader.next());
        reader.pop();
        assert!(reader.at_delimiter());
        assert!(reader.is_last());
    }

    #[test]
    fn test_truncated_stream_closes_all_levels() {
        let data = b"--a\n\nunterminated body\n";
        let mut reader = MultipartReader::new(data);
        reader.push("a");
        reader.skip_lines();
        assert!(reader.next());
        reader.read_headers();
        assert_eq!(reader.read_body(), b"unterminated body\n");
        assert!(!reader.next());
        assert!(reader.is_last());
    }

    #[test]
    fn test_similar_dash_lines_are_data() {
        let data = b"--abc-not-it\n-- signature\n--abc\n";
        let mut reader = MultipartReader::new(data);
        reader.push("abc");
        assert_eq!(reader.read_line(), Some(&b"--abc-not-it\n"[..]));
        assert_eq!(reader.read_line(), Some(&b"-- signature\n"[..]));
        assert_eq!(reader.read_line(), None);
    }

    #[test]
    fn test_headers_skip_from_line_and_stop_at_body_text() {
        let data = b"From someone Thu Jan 01 00:00:00 2024\nSubject: Hi\nno colon here\nrest\n";
        let mut reader = MultipartReader::new(data);
        let headers = reader.read_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("Hi"));
        assert_eq!(reader.read_body(), b"no colon here\nrest\n");
    }
}
