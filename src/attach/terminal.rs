use crossterm::{
    cursor,
    event::{DisableBracketedPaste, EnableBracketedPaste},
    execute, queue,
    terminal::{
        self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use std::io::{self, stdout, Write};

pub const PRESS_ANY_KEY: &str = "Press any key to continue...";

/// Raw mode plus alternate screen for the lifetime of an attachment.
/// Dropping the guard restores the terminal.
#[derive(Debug)]
pub struct TerminalGuard {
    active: bool,
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        let mut guard = Self { active: false };
        guard.resume()?;
        Ok(guard)
    }

    /// Give the terminal back to the shell, e.g. before suspending.
    pub fn release(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let result = execute!(stdout(), DisableBracketedPaste, LeaveAlternateScreen);
        disable_raw_mode()?;
        result
    }

    pub fn resume(&mut self) -> io::Result<()> {
        if self.active {
            return Ok(());
        }
        enable_raw_mode()?;
        self.active = true;
        execute!(stdout(), EnterAlternateScreen, EnableBracketedPaste)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Controlling terminal size as `(rows, cols)`.
pub fn size() -> Option<(u16, u16)> {
    terminal::size()
        .ok()
        .filter(|(cols, rows)| *cols > 0 && *rows > 0)
        .map(|(cols, rows)| (rows, cols))
}

pub fn clear_screen(out: &mut impl Write) -> io::Result<()> {
    queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    out.flush()
}

/// Print a block of text in raw mode, turning bare newlines into CRLF.
pub fn print_block(out: &mut impl Write, text: &str) -> io::Result<()> {
    out.write_all(to_crlf(text).as_bytes())?;
    out.flush()
}

fn to_crlf(text: &str) -> String {
    let mut converted = String::with_capacity(text.len() + 16);
    let mut prev = '\0';
    for c in text.chars() {
        if c == '\n' && prev != '\r' {
            converted.push('\r');
        }
        converted.push(c);
        prev = c;
    }
    converted
}
