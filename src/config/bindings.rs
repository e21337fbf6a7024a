use std::collections::HashMap;

/// Parse a key string into the byte the terminal sends for it.
///
/// Accepts a single character (`"c"`), caret notation (`"^A"`, `"^?"`),
/// hex (`"\x01"`, `"0x01"`) and a few names (`"Space"`, `"Enter"`).
pub fn parse_key(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() == 1 {
        let b = s.as_bytes()[0];
        return b.is_ascii().then_some(b);
    }

    if let Some(rest) = s.strip_prefix('^') {
        if rest.len() == 1 {
            return caret(rest.as_bytes()[0]);
        }
    }

    if let Some(hex) = s.strip_prefix("\\x").or_else(|| s.strip_prefix("0x")) {
        return u8::from_str_radix(hex, 16).ok();
    }

    match s.to_lowercase().as_str() {
        "space" => Some(b' '),
        "backspace" | "bs" => Some(0x08),
        "delete" | "del" => Some(0x7f),
        "enter" | "return" => Some(b'\r'),
        "tab" => Some(b'\t'),
        "esc" | "escape" => Some(0x1b),
        _ => None,
    }
}

fn caret(c: u8) -> Option<u8> {
    match c {
        b'?' => Some(0x7f),
        b'@'..=b'_' => Some(c - b'@'),
        b'a'..=b'z' => Some(c - b'a' + 1),
        _ => None,
    }
}

/// Display form of a key byte, e.g. `^A` or `Space`.
pub fn key_display(b: u8) -> String {
    match b {
        b' ' => "Space".to_string(),
        0x7f => "^?".to_string(),
        0x00..=0x1f => format!("^{}", char::from(b + b'@')),
        _ => char::from(b).to_string(),
    }
}

/// Parse a screen-style escape string such as `"^Aa"` or `"``"` into
/// `(command byte, literal byte)`.
pub fn parse_escape(escape: &str) -> Option<(u8, u8)> {
    let bytes = escape.trim().as_bytes();
    let (command, rest) = match bytes {
        [b'^', c, rest @ ..] => (caret(*c)?, rest),
        [c, rest @ ..] => (*c, rest),
        [] => return None,
    };
    let literal = match rest {
        [b'^', c] => caret(*c)?,
        [c] => *c,
        _ => return None,
    };
    Some((command, literal))
}

/// Key strings that do not parse are skipped.
pub fn parse_bindings(raw: &HashMap<String, String>) -> HashMap<u8, String> {
    raw.iter()
        .filter_map(|(key, command)| parse_key(key).map(|b| (b, command.clone())))
        .collect()
}
