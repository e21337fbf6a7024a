use crate::models::{Session, Window};
use chrono::{DateTime, Local};
use crossterm::{
    cursor, queue,
    terminal::{self, Clear, ClearType},
};
use std::io::{self, Write};

/// Expand a status-line template.
///
/// `%n` window label, `%t` title, `%S` session ID, `%w` window list,
/// `%c` time as HH:MM, `%%` a literal percent sign.
pub fn format_status(template: &str, session: &Session, now: DateTime<Local>) -> String {
    let window = session.current();
    expand(template, |code| match code {
        'n' => window.map(|w| w.number.clone()),
        't' => window.map(|w| w.display_title().to_string()),
        'S' => Some(session.id.clone()),
        'w' => Some(session.window_list()),
        'c' => Some(now.format("%H:%M").to_string()),
        _ => None,
    })
}

/// Expand an activity/silence message template for one window.
pub fn format_message(template: &str, window: &Window) -> String {
    expand(template, |code| match code {
        'n' => Some(window.number.clone()),
        't' => Some(window.display_title().to_string()),
        _ => None,
    })
}

fn expand(template: &str, lookup: impl Fn(char) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(code) => match lookup(code) {
                Some(value) => out.push_str(&value),
                None => out.push(code),
            },
            None => out.push('%'),
        }
    }
    out
}

/// Draw `text` on the bottom row, truncated to the terminal width.
pub fn render(out: &mut impl Write, text: &str) -> io::Result<()> {
    let (cols, rows) = terminal::size().unwrap_or((80, 24));
    let line: String = text.chars().take(cols as usize).collect();
    queue!(
        out,
        cursor::SavePosition,
        cursor::MoveTo(0, rows.saturating_sub(1)),
        Clear(ClearType::CurrentLine)
    )?;
    out.write_all(line.as_bytes())?;
    queue!(out, cursor::RestorePosition)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyHandle;
    use chrono::TimeZone;

    fn session() -> Session {
        let mut session = Session::new("work", "alice");
        for title in ["shell", ""] {
            let pty = PtyHandle::start("sleep", &["30".to_string()], &Default::default()).unwrap();
            let mut window = Window::new(0, "sleep", &[], pty);
            window.title = title.to_string();
            session.push_window(window).unwrap();
        }
        session
    }

    #[test]
    fn test_format_status() {
        let session = session();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 7, 0).unwrap();
        let status = format_status("[%S] %n:%t %c 100%%", &session, now);
        assert_eq!(status, "[work] 1:sleep 09:07 100%");

        let list = format_status("%w", &session, now);
        assert_eq!(list, "0 shell  1* sleep");
        session.kill_all();
    }

    #[test]
    fn test_unknown_codes_are_literal() {
        let session = session();
        let now = Local::now();
        assert_eq!(format_status("%q%", &session, now), "q%");
        session.kill_all();
    }

    #[test]
    fn test_format_message() {
        let session = session();
        let window = &session.windows[0];
        assert_eq!(format_message("Activity in %n (%t)", window), "Activity in 0 (shell)");
        session.kill_all();
    }
}
