//! Email address parsing (RFC 2822 §3.4).

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com (User)"` → `display_name = "User"`, `address = "user@example.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single email address from a header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    ///
    /// Input that does not follow the address grammar (unbalanced brackets or
    /// quotes, whitespace inside the address) yields an empty pair rather
    /// than an error.
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_default()
    }

    /// Parse a comma-separated list of addresses, preserving order.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`.
    /// Empty and unparseable entries are skipped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        split_list(raw)
            .iter()
            .map(|entry| Self::parse(entry))
            .filter(|addr| !addr.address.is_empty())
            .collect()
    }

    /// The `(display_name, address)` pair.
    pub fn into_pair(self) -> (String, String) {
        (self.display_name, self.address)
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }

    fn try_parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !balanced(trimmed) {
            return None;
        }

        // "Display Name <address>" or "<address>"
        if let Some(angle_start) = find_unquoted(trimmed, '<') {
            let angle_end = trimmed[angle_start..].find('>')? + angle_start;
            let address = trimmed[angle_start + 1..angle_end].trim();
            let address = strip_route(address);
            if !is_addr_spec(address) {
                return None;
            }
            let display_name = strip_quotes(&trimmed[..angle_start]);
            return Some(Self {
                display_name,
                address: address.to_string(),
            });
        }

        // "address (Display Name)"
        if let Some(paren_start) = find_unquoted(trimmed, '(') {
            let paren_end = trimmed.rfind(')')?;
            if paren_end < paren_start {
                return None;
            }
            let address = trimmed[..paren_start].trim();
            if !is_addr_spec(address) {
                return None;
            }
            return Some(Self {
                display_name: trimmed[paren_start + 1..paren_end].trim().to_string(),
                address: address.to_string(),
            });
        }

        // Bare address
        if is_addr_spec(trimmed) {
            return Some(Self {
                display_name: String::new(),
                address: trimmed.to_string(),
            });
        }

        None
    }
}

/// Split a list on commas that are outside quotes, angle brackets and comments.
fn split_list(raw: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;

    for ch in raw.chars() {
        match ch {
            '"' if comment_depth == 0 => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '<' if !in_quotes && comment_depth == 0 => {
                in_angle = true;
                current.push(ch);
            }
            '>' if !in_quotes && comment_depth == 0 => {
                in_angle = false;
                current.push(ch);
            }
            '(' if !in_quotes => {
                comment_depth += 1;
                current.push(ch);
            }
            ')' if !in_quotes => {
                comment_depth = comment_depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if !in_quotes && !in_angle && comment_depth == 0 => {
                results.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    results.push(current);

    results
}

/// Quotes, angle brackets and parentheses must all be closed.
fn balanced(s: &str) -> bool {
    let mut in_quotes = false;
    let mut angle = 0i32;
    let mut paren = 0i32;
    for ch in s.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle += 1,
            '>' if !in_quotes => angle -= 1,
            '(' if !in_quotes => paren += 1,
            ')' if !in_quotes => paren -= 1,
            _ => {}
        }
        if angle < 0 || paren < 0 {
            return false;
        }
    }
    !in_quotes && angle == 0 && paren == 0
}

/// First occurrence of `needle` that is not inside a quoted string.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Drop an obsolete source route: `@relay1,@relay2:user@host` → `user@host`.
fn strip_route(addr: &str) -> &str {
    if addr.starts_with('@') {
        if let Some(colon) = addr.find(':') {
            return &addr[colon + 1..];
        }
    }
    addr
}

/// A usable addr-spec has no whitespace and no structural characters.
fn is_addr_spec(addr: &str) -> bool {
    !addr.is_empty()
        && !addr
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '(' | ')' | ',' | ';'))
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
