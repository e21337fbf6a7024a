mod session;
mod window;

pub use session::{Session, SessionConfig};
pub use window::{label_to_number, number_to_label, Window};

use crate::error::{Error, Result};

/// Windows are labelled 0-9 then A-Z.
pub const MAX_WINDOWS: usize = 36;

pub const DEFAULT_SCROLLBACK: usize = 1000;

/// Current user name for ACL checks.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// Session IDs end up as file names in the registry directory.
pub fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    if !name.chars().all(is_session_char) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

fn is_session_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// `<pid>.<tty>.<host>`; the tty part is empty without a controlling terminal.
pub fn default_session_name() -> String {
    let tty = sanitize_component(&detect_tty_name());
    let mut host = sanitize_component(&hostname());
    if host.is_empty() {
        host = "localhost".to_string();
    }
    format!("{}.{}.{}", std::process::id(), tty, host)
}

fn sanitize_component(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| if is_session_char(c) { c } else { '-' })
        .collect();
    mapped.trim_matches('-').to_string()
}

fn detect_tty_name() -> String {
    let link = match std::fs::read_link("/dev/fd/0") {
        Ok(link) => link,
        Err(_) => return String::new(),
    };
    if !link.starts_with("/dev/") {
        return String::new();
    }
    match link.file_name().and_then(|n| n.to_str()) {
        Some(base) if base != "0" && !base.starts_with("fd") => base.to_string(),
        _ => String::new(),
    }
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let result = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if result != 0 {
        return String::new();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_default()
}

/// Map the locale environment onto one of the charsets windows can be
/// transcoded from. Anything unrecognised is treated as UTF-8.
pub fn detect_encoding_from_locale() -> String {
    for key in ["LC_ALL", "LC_CTYPE", "LANG"] {
        let Ok(locale) = std::env::var(key) else {
            continue;
        };
        if let Some(encoding) = encoding_from_locale(&locale) {
            return encoding.to_string();
        }
    }
    "UTF-8".to_string()
}

fn encoding_from_locale(locale: &str) -> Option<&'static str> {
    let (_, charset) = locale.split_once('.')?;
    let charset = charset
        .split('@')
        .next()
        .unwrap_or(charset)
        .to_uppercase()
        .replace('_', "-");
    let encoding = match charset.as_str() {
        "UTF-8" | "UTF8" => "UTF-8",
        "ISO-8859-1" | "ISO8859-1" | "LATIN1" => "ISO-8859-1",
        "ISO-8859-2" | "ISO8859-2" | "LATIN2" => "ISO-8859-2",
        "ISO-8859-15" | "ISO8859-15" | "LATIN9" => "ISO-8859-15",
        "WINDOWS-1252" | "CP1252" => "WINDOWS-1252",
        "WINDOWS-1251" | "CP1251" => "WINDOWS-1251",
        "KOI8-R" | "KOI8R" => "KOI8-R",
        "KOI8-U" | "KOI8U" => "KOI8-U",
        _ => return None,
    };
    Some(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_name() {
        assert!(validate_session_name("demo").is_ok());
        assert!(validate_session_name("my-session_2").is_ok());
        assert!(validate_session_name("1234.pts-0.host").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("a/b").is_err());
        assert!(validate_session_name("with space").is_err());
    }

    #[test]
    fn test_default_session_name_shape() {
        let name = default_session_name();
        let parts: Vec<&str> = name.splitn(3, '.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], std::process::id().to_string());
        assert!(validate_session_name(&name).is_ok());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("pts/3"), "pts-3");
        assert_eq!(sanitize_component("/weird/"), "weird");
        assert_eq!(sanitize_component(""), "");
    }

    #[test]
    fn test_encoding_from_locale() {
        assert_eq!(encoding_from_locale("en_US.UTF-8"), Some("UTF-8"));
        assert_eq!(encoding_from_locale("de_DE.utf8"), Some("UTF-8"));
        assert_eq!(encoding_from_locale("ru_RU.KOI8-R"), Some("KOI8-R"));
        assert_eq!(encoding_from_locale("fr_FR.ISO8859-15@euro"), Some("ISO-8859-15"));
        assert_eq!(encoding_from_locale("C"), None);
        assert_eq!(encoding_from_locale("xx.EBCDIC"), None);
    }
}
