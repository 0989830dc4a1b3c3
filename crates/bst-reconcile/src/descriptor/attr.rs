use std::sync::OnceLock;

use regex::{Captures, Regex};

use super::{RwMode, TOKEN_NORMAL, TOKEN_READONLY};

fn type_attr() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(Type\s*=\s*")([^"]*)(")"#).expect("valid Type attribute regex")
    })
}

pub fn references_target<S: AsRef<str>>(line: &str, targets: &[S]) -> bool {
    targets.iter().any(|t| {
        let t = t.as_ref();
        !t.is_empty() && line.contains(t)
    })
}

/// Mode declared by the tokens on this line, if it carries any.
/// `Type` values other than `Normal`/`Readonly` declare nothing.
pub fn line_mode(line: &str) -> Option<RwMode> {
    let mut seen_normal = false;
    for caps in type_attr().captures_iter(line) {
        if caps[2].eq_ignore_ascii_case(TOKEN_READONLY) {
            return Some(RwMode::ReadOnly);
        }
        seen_normal |= caps[2].eq_ignore_ascii_case(TOKEN_NORMAL);
    }
    seen_normal.then_some(RwMode::ReadWrite)
}

/// Rewrite every `Type` attribute value on `line` to `token`; `None` when the line
/// already agrees. Only the value span changes.
///
/// A line without any `Type` attribute gains ` Type="<token>"`, placed before a closing `/>`
/// or `>` when the line ends with one, otherwise at the end of the line text.
pub fn rewrite_line(line: &str, token: &str) -> Option<String> {
    if type_attr().is_match(line) {
        let out = type_attr().replace_all(line, |caps: &Captures| {
            if caps[2].eq_ignore_ascii_case(token) {
                caps[0].to_string()
            } else {
                format!("{}{}{}", &caps[1], token, &caps[3])
            }
        });
        return (out != line).then(|| out.into_owned());
    }
    Some(insert_type_attr(line, token))
}

fn insert_type_attr(line: &str, token: &str) -> String {
    let body = line.trim_end_matches(['\r', '\n']);
    let terminator = &line[body.len()..];
    let text_end = body.trim_end().len();
    let text = &body[..text_end];

    let at = if text.ends_with("/>") {
        text_end - 2
    } else if text.ends_with('>') {
        text_end - 1
    } else {
        text_end
    };

    let head = &body[..at];
    let head_trimmed = head.trim_end();
    let mut out = String::with_capacity(line.len() + token.len() + 8);
    out.push_str(head_trimmed);
    out.push_str(" Type=\"");
    out.push_str(token);
    out.push('"');
    out.push_str(&head[head_trimmed.len()..]);
    out.push_str(&body[at..]);
    out.push_str(terminator);
    out
}
