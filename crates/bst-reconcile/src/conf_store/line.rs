#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfValue<'a> {
    Quoted(&'a str),
    Raw(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfEntry<'a> {
    pub key: &'a str,
    pub value: ConfValue<'a>,
}

impl<'a> ConfEntry<'a> {
    pub fn quoted(&self) -> Option<&'a str> {
        match self.value {
            ConfValue::Quoted(v) => Some(v),
            ConfValue::Raw(_) => None,
        }
    }

    pub fn key_is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

/// Parse one trimmed line as `KEY ws* '=' ws* value`, where `KEY` has no whitespace,
/// `=` or `"`, and `value` is either `"..."` (anything after the closing quote is
/// ignored) or raw text. Blank lines, comments and section headers yield `None`.
pub fn parse_line(line: &str) -> Option<ConfEntry<'_>> {
    let text = line.trim();
    let (lhs, rhs) = text.split_once('=')?;
    let key = lhs.trim_end();
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == '"') {
        return None;
    }

    let rest = rhs.trim_start();
    let quoted = rest
        .strip_prefix('"')
        .and_then(|r| r.find('"').map(|end| &r[..end]));
    let value = match quoted {
        Some(v) => ConfValue::Quoted(v),
        None => ConfValue::Raw(rest.trim_end()),
    };
    Some(ConfEntry { key, value })
}

pub fn canonical_line(key: &str, value: &str) -> String {
    format!("{key}=\"{value}\"")
}

/// Terminator to keep when a line is replaced; unterminated lines gain `\n`.
pub fn line_terminator(line: &str) -> &'static str {
    if line.ends_with("\r\n") { "\r\n" } else { "\n" }
}
