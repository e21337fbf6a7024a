use crate::error::{Error, Result};
use crate::pty::PtyHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    /// Position in the session's window list (0..36).
    pub id: usize,
    /// Display label derived from `id` (0-9, A-Z).
    pub number: String,
    #[serde(default)]
    pub title: String,
    pub cmd_path: String,
    #[serde(default)]
    pub cmd_args: Vec<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pts_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    /// Zero means "use the session-level size".
    #[serde(default)]
    pub scrollback_size: usize,
    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(skip)]
    pty: Option<Arc<PtyHandle>>,
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

impl Window {
    pub fn new(id: usize, cmd_path: &str, cmd_args: &[String], pty: PtyHandle) -> Self {
        let mut window = Self {
            id,
            number: number_to_label(id),
            title: String::new(),
            cmd_path: cmd_path.to_string(),
            cmd_args: cmd_args.to_vec(),
            pid: None,
            pts_path: None,
            created_at: Utc::now(),
            scrollback_size: 0,
            encoding: default_encoding(),
            pty: None,
        };
        window.set_pty(Arc::new(pty));
        window
    }

    pub fn pty(&self) -> Option<Arc<PtyHandle>> {
        self.pty.clone()
    }

    /// Attach a live handle. The recorded pid and slave path follow the handle
    /// when it owns a process; a reconnected handle keeps the recorded values.
    pub fn set_pty(&mut self, pty: Arc<PtyHandle>) {
        if let Some(pid) = pty.pid() {
            self.pid = Some(pid);
            self.pts_path = pty.pts_path().map(|p| p.to_path_buf());
        }
        self.pty = Some(pty);
    }

    pub fn clear_pty(&mut self) {
        self.pty = None;
    }

    /// Kill the window's process. Falls back to the recorded pid when the
    /// window has no live handle (e.g. the process is held by a keeper).
    pub fn kill(&self) -> Result<()> {
        if let Some(pty) = &self.pty {
            if pty.pid().is_some() {
                return pty.kill();
            }
        }
        #[cfg(unix)]
        if let Some(pid) = self.pid.filter(|pid| crate::pty::sys::process_alive(*pid)) {
            crate::pty::sys::signal_group(pid, libc::SIGKILL)
                .or_else(|_| crate::pty::sys::signal_pid(pid, libc::SIGKILL))
                .map_err(|e| Error::io(format!("failed to kill window {}", self.number), e))?;
        }
        Ok(())
    }

    /// The live handle and the recorded pid must both agree. A reopened
    /// device stays open after its process exits.
    pub fn is_alive(&self) -> bool {
        let pid_alive = || self.pid.is_some_and(crate::pty::sys::process_alive);
        match &self.pty {
            Some(pty) => pty.is_alive() && (self.pid.is_none() || pid_alive()),
            None => pid_alive(),
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.cmd_path
        } else {
            &self.title
        }
    }
}

pub fn number_to_label(id: usize) -> String {
    match id {
        0..=9 => id.to_string(),
        _ => char::from(b'A' + (id - 10) as u8).to_string(),
    }
}

/// Accepts `0-9`, `A-Z`, `a-z` and decimal `0..=35`.
pub fn label_to_number(label: &str) -> Result<usize> {
    let invalid = || Error::NotFound(format!("window {label:?}"));
    let bytes = label.as_bytes();
    if bytes.len() == 1 {
        let c = bytes[0];
        return match c {
            b'0'..=b'9' => Ok((c - b'0') as usize),
            b'A'..=b'Z' => Ok((c - b'A') as usize + 10),
            b'a'..=b'z' => Ok((c - b'a') as usize + 10),
            _ => Err(invalid()),
        };
    }
    match label.parse::<usize>() {
        Ok(n) if n < super::MAX_WINDOWS => Ok(n),
        _ => Err(invalid()),
    }
}
