//! HTML-to-text conversion, used when a message has no plain-text part.

/// Convert HTML to plain text.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>` and other block tags
/// - Removes scripts and styles
/// - Decodes common named entities and numeric character references
/// - Collapses runs of blank lines
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();

    // Remove script and style blocks
    text = remove_tag_block(&text, "script");
    text = remove_tag_block(&text, "style");

    // Convert block elements to newlines
    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{tag}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    // Strip all remaining HTML tags
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    let result = decode_entities(&result);

    // Collapse multiple blank lines into at most two
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Decode `&name;`, `&#NN;` and `&#xHH;` references. Unknown ones are kept verbatim.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut remaining = text;

    while let Some(amp) = remaining.find('&') {
        out.push_str(&remaining[..amp]);
        let candidate = &remaining[amp..];
        // Entity names are short; don't scan across the whole document
        let semi = candidate
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .map(|(i, _)| i);

        match semi.and_then(|end| resolve_entity(&candidate[1..end]).map(|c| (c, end))) {
            Some((ch, end)) => {
                out.push(ch);
                remaining = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                remaining = &candidate[1..];
            }
        }
    }

    out.push_str(remaining);
    out
}

fn resolve_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        // Non-breaking space reads as a plain space in text output
        if code == 160 {
            return Some(' ');
        }
        return char::from_u32(code);
    }

    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "copy" => Some('©'),
        "reg" => Some('®'),
        "euro" => Some('€'),
        _ => None,
    }
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        if let Some(end) = after.to_ascii_lowercase().find(&close) {
            remaining = &after[end + close.len()..];
        } else {
            // No closing tag: drop the rest
            remaining = "";
            break;
        }
    }
    result.push_str(remaining);
    result
}
