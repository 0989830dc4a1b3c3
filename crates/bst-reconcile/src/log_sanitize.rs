const MAX_LOG_CHARS: usize = 240;

#[derive(Clone, Copy)]
enum Escape {
    /// Just saw ESC.
    Intro,
    Csi,
    /// OSC body; ends at BEL or ST.
    Osc { after_esc: bool },
    /// DCS/SOS/PM/APC body; ends at ST only.
    String { after_esc: bool },
}

// Next state after `c` inside an escape sequence; `None` once it is complete.
fn advance(state: Escape, c: char) -> Option<Escape> {
    match state {
        Escape::Intro => match c {
            '[' => Some(Escape::Csi),
            ']' => Some(Escape::Osc { after_esc: false }),
            'P' | 'X' | '^' | '_' => Some(Escape::String { after_esc: false }),
            _ => None,
        },
        Escape::Csi => (!('@'..='~').contains(&c)).then_some(Escape::Csi),
        Escape::Osc { after_esc } => match c {
            '\x07' => None,
            '\\' if after_esc => None,
            '\x1b' => Some(Escape::Osc { after_esc: true }),
            _ => Some(Escape::Osc { after_esc: false }),
        },
        Escape::String { after_esc } => match c {
            '\\' if after_esc => None,
            '\x1b' => Some(Escape::String { after_esc: true }),
            _ => Some(Escape::String { after_esc: false }),
        },
    }
}

/// Make a line read from a config or descriptor file safe to embed in a log record.
///
/// Terminal escape sequences (CSI, OSC and ST-terminated strings) are removed whole,
/// other control and bidi characters are dropped, tabs become spaces, and overly long
/// lines are cut with a marker.
pub fn sanitize_log_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut escape: Option<Escape> = None;
    let mut char_count = 0usize;

    for c in input.trim_end_matches(['\r', '\n']).chars() {
        if let Some(state) = escape {
            escape = advance(state, c);
            continue;
        }
        if c == '\x1b' {
            escape = Some(Escape::Intro);
            continue;
        }
        if char_count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() || is_format_control(c) {
            continue;
        } else {
            out.push(c);
        }
        char_count += 1;
    }

    out
}

fn is_format_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::sanitize_log_line;

    #[test]
    fn drops_line_terminators_and_controls() {
        let got = sanitize_log_line("bst.feature.rooting=\"1\"\u{1b}\u{202e}\r\n");
        assert_eq!(got, "bst.feature.rooting=\"1\"");
    }

    #[test]
    fn removes_whole_escape_sequences() {
        let got = sanitize_log_line("key=\"\u{1b}[31m1\u{1b}[0m\" \u{1b}]0;title\u{7}end");
        assert_eq!(got, "key=\"1\" end");

        let st = sanitize_log_line("a\u{1b}Ppayload\u{1b}\\b\u{1b}]8;;x\u{1b}\\c");
        assert_eq!(st, "abc");
    }

    #[test]
    fn truncates_long_lines() {
        let long = "x".repeat(1000);
        let got = sanitize_log_line(&long);
        assert!(got.ends_with("...[truncated]"));
        assert!(got.len() < 300);
    }
}
