use super::window::{label_to_number, number_to_label, Window};
use super::MAX_WINDOWS;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-session options applied when windows are created.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub term: Option<String>,
    pub utf8: bool,
    pub all_capabilities: bool,
    pub encoding: Option<String>,
    pub scrollback: usize,
    /// Initial terminal size, exported as LINES/COLUMNS.
    pub size: Option<(u16, u16)>,
}

impl SessionConfig {
    pub fn env_overrides(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();

        let mut term = self.term.clone().unwrap_or_else(|| "screen".to_string());
        if self.all_capabilities && term == "screen" {
            term = "screen-256color".to_string();
        }
        env.insert("TERM".to_string(), term);

        if self.utf8 {
            match std::env::var("LANG") {
                Ok(lang) if lang.contains("UTF-8") || lang.contains("utf8") => {}
                Ok(lang) if !lang.is_empty() => {
                    let base = lang.split('.').next().unwrap_or(&lang);
                    env.insert("LANG".to_string(), format!("{base}.UTF-8"));
                }
                _ => {
                    env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
                }
            }
        }

        if let Some((rows, cols)) = self.size {
            env.insert("LINES".to_string(), rows.to_string());
            env.insert("COLUMNS".to_string(), cols.to_string());
        }
        env
    }

    pub fn window_encoding(&self) -> String {
        match &self.encoding {
            Some(encoding) if !encoding.is_empty() => encoding.clone(),
            _ if self.utf8 => "UTF-8".to_string(),
            _ => super::detect_encoding_from_locale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub windows: Vec<Window>,
    #[serde(default)]
    pub current_window: usize,
    #[serde(default)]
    pub last_window: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layouts: BTreeMap<String, usize>,
    /// Session-level scrollback used when a window has none of its own.
    #[serde(default)]
    pub scrollback: usize,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, owner: &str) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.to_string(),
            allowed_users: Vec::new(),
            windows: Vec::new(),
            current_window: 0,
            last_window: 0,
            layouts: BTreeMap::new(),
            scrollback: 0,
            created_at: Utc::now(),
        }
    }

    pub fn current(&self) -> Option<&Window> {
        self.windows.get(self.current_window)
    }

    pub fn current_mut(&mut self) -> Option<&mut Window> {
        self.windows.get_mut(self.current_window)
    }

    pub fn get_window(&self, label: &str) -> Option<&Window> {
        let id = label_to_number(label).ok()?;
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn next_window_id(&self) -> Result<usize> {
        if self.windows.len() >= MAX_WINDOWS {
            return Err(Error::WindowLimit);
        }
        Ok(self.windows.len())
    }

    /// Append a window and make it current.
    pub fn push_window(&mut self, mut window: Window) -> Result<usize> {
        let id = self.next_window_id()?;
        window.id = id;
        window.number = number_to_label(id);
        self.windows.push(window);
        self.last_window = self.current_window;
        self.current_window = id;
        Ok(id)
    }

    pub fn switch_to(&mut self, label: &str) -> Result<()> {
        let id = label_to_number(label)?;
        let index = self
            .windows
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| Error::NotFound(format!("window {label}")))?;
        self.select_index(index);
        Ok(())
    }

    pub fn next(&mut self) {
        if self.windows.is_empty() {
            return;
        }
        let next = (self.current_window + 1) % self.windows.len();
        self.select_index(next);
    }

    pub fn prev(&mut self) {
        if self.windows.is_empty() {
            return;
        }
        let len = self.windows.len();
        let prev = (self.current_window + len - 1) % len;
        self.select_index(prev);
    }

    pub fn toggle_last(&mut self) {
        if self.windows.is_empty() {
            return;
        }
        std::mem::swap(&mut self.current_window, &mut self.last_window);
        self.clamp_indices();
    }

    fn select_index(&mut self, index: usize) {
        self.last_window = self.current_window;
        self.current_window = index;
    }

    /// Remove the current window from the list, renumber the rest densely and
    /// clamp both indices. The caller is responsible for killing the process.
    pub fn remove_current_window(&mut self) -> Result<Window> {
        if self.current().is_none() {
            return Err(Error::NoCurrentWindow);
        }
        if self.windows.len() == 1 {
            return Err(Error::LastWindow);
        }

        let removed = self.windows.remove(self.current_window);
        for (i, window) in self.windows.iter_mut().enumerate() {
            window.id = i;
            window.number = number_to_label(i);
        }
        self.clamp_indices();
        Ok(removed)
    }

    fn clamp_indices(&mut self) {
        let last = self.windows.len().saturating_sub(1);
        self.current_window = self.current_window.min(last);
        self.last_window = self.last_window.min(last);
    }

    pub fn set_title(&mut self, title: &str) {
        if let Some(window) = self.current_mut() {
            window.title = title.to_string();
        }
    }

    /// Scrollback capacity for a window: its own size, then the session's,
    /// then the default.
    pub fn scrollback_for(&self, window: &Window) -> usize {
        if window.scrollback_size > 0 {
            window.scrollback_size
        } else if self.scrollback > 0 {
            self.scrollback
        } else {
            super::DEFAULT_SCROLLBACK
        }
    }

    pub fn has_alive_window(&self) -> bool {
        self.windows.iter().any(|w| w.is_alive())
    }

    pub fn kill_all(&self) {
        for window in &self.windows {
            if let Err(e) = window.kill() {
                tracing::warn!("session {}: failed to kill window {}: {e}", self.id, window.number);
            }
        }
    }

    /// Drop every in-memory PTY reference. Processes keep running.
    pub fn clear_handles(&mut self) {
        for window in &mut self.windows {
            window.clear_pty();
        }
    }

    // ==== Access control ====

    /// An unowned session with no allow-list admits anyone.
    pub fn can_attach(&self, user: &str) -> bool {
        if self.owner.is_empty() && self.allowed_users.is_empty() {
            return true;
        }
        if user.is_empty() {
            return false;
        }
        self.owner == user || self.allowed_users.iter().any(|u| u == user)
    }

    pub fn add_user(&mut self, user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::InvalidName(user.to_string()));
        }
        if !self.allowed_users.iter().any(|u| u == user) {
            self.allowed_users.push(user.to_string());
        }
        Ok(())
    }

    pub fn remove_user(&mut self, user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::InvalidName(user.to_string()));
        }
        self.allowed_users.retain(|u| u != user);
        Ok(())
    }

    // ==== Layouts ====

    pub fn save_layout(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_string()));
        }
        self.layouts.insert(name.to_string(), self.current_window);
        Ok(())
    }

    pub fn select_layout(&mut self, name: &str) -> Result<()> {
        let index = *self
            .layouts
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("layout {name}")))?;
        if index >= self.windows.len() {
            return Err(Error::NotFound(format!("window for layout {name}")));
        }
        self.select_index(index);
        Ok(())
    }

    pub fn layouts(&self) -> Vec<String> {
        self.layouts.keys().cloned().collect()
    }

    /// Window list in `0 sh  1* vim` form, current window starred.
    pub fn window_list(&self) -> String {
        self.windows
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let marker = if i == self.current_window { "*" } else { "" };
                format!("{}{} {}", w.number, marker, w.display_title())
            })
            .collect::<Vec<_>>()
            .join("  ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyHandle;

    fn window(cmd: &str) -> Window {
        let pty = PtyHandle::start("sleep", &["30".to_string()], &HashMap::new()).unwrap();
        Window::new(0, cmd, &[], pty)
    }

    fn session_with(n: usize) -> Session {
        let mut session = Session::new("test", "alice");
        for i in 0..n {
            session.push_window(window(&format!("w{i}"))).unwrap();
        }
        session
    }

    fn labels(session: &Session) -> Vec<String> {
        session.windows.iter().map(|w| w.number.clone()).collect()
    }

    // ==== Navigation ====

    #[test]
    fn test_push_window_makes_it_current() {
        let session = session_with(3);
        assert_eq!(session.current_window, 2);
        assert_eq!(session.last_window, 1);
        assert_eq!(labels(&session), vec!["0", "1", "2"]);
        session.kill_all();
    }

    #[test]
    fn test_next_prev_wrap() {
        let mut session = session_with(3);
        session.next();
        assert_eq!(session.current_window, 0);
        session.prev();
        assert_eq!(session.current_window, 2);
        session.prev();
        assert_eq!(session.current_window, 1);
        session.kill_all();
    }

    #[test]
    fn test_toggle_last() {
        let mut session = session_with(3);
        session.switch_to("0").unwrap();
        session.toggle_last();
        assert_eq!(session.current_window, 2);
        session.toggle_last();
        assert_eq!(session.current_window, 0);
        session.kill_all();
    }

    #[test]
    fn test_switch_to_unknown_window() {
        let mut session = session_with(2);
        let err = session.switch_to("7").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert_eq!(session.current_window, 1);
        session.kill_all();
    }

    // ==== Removal ====

    #[test]
    fn test_last_window_is_protected() {
        let mut session = session_with(1);
        let err = session.remove_current_window().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::LastWindow);
        assert_eq!(session.windows.len(), 1);
        session.kill_all();
    }

    #[test]
    fn test_removal_renumbers_densely() {
        let mut session = session_with(4);
        session.switch_to("1").unwrap();
        let removed = session.remove_current_window().unwrap();
        removed.kill().unwrap();

        assert_eq!(labels(&session), vec!["0", "1", "2"]);
        let ids: Vec<usize> = session.windows.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(session.current_window < 3);
        assert!(session.last_window < 3);
        session.kill_all();
    }

    #[test]
    fn test_removing_tail_window_clamps_current() {
        let mut session = session_with(3);
        let removed = session.remove_current_window().unwrap();
        removed.kill().unwrap();
        assert_eq!(session.current_window, 1);
        let removed = session.remove_current_window().unwrap();
        removed.kill().unwrap();
        assert_eq!(session.current_window, 0);
        assert_eq!(session.last_window, 0);
        session.kill_all();
    }

    // ==== Access control and layouts ====

    #[test]
    fn test_can_attach() {
        let mut session = Session::new("acl", "alice");
        assert!(session.can_attach("alice"));
        assert!(!session.can_attach("bob"));
        session.add_user("bob").unwrap();
        session.add_user("bob").unwrap();
        assert_eq!(session.allowed_users.len(), 1);
        assert!(session.can_attach("bob"));
        session.remove_user("bob").unwrap();
        assert!(!session.can_attach("bob"));

        let open = Session::new("open", "");
        assert!(open.can_attach("anyone"));
    }

    #[test]
    fn test_layouts() {
        let mut session = session_with(3);
        session.switch_to("1").unwrap();
        session.save_layout("editing").unwrap();
        session.next();
        session.select_layout("editing").unwrap();
        assert_eq!(session.current_window, 1);
        assert_eq!(session.layouts(), vec!["editing".to_string()]);
        assert!(session.select_layout("missing").is_err());
        session.kill_all();
    }

    #[test]
    fn test_scrollback_precedence() {
        let mut session = session_with(1);
        assert_eq!(session.scrollback_for(&session.windows[0]), 1000);
        session.scrollback = 500;
        assert_eq!(session.scrollback_for(&session.windows[0]), 500);
        session.windows[0].scrollback_size = 50;
        assert_eq!(session.scrollback_for(&session.windows[0]), 50);
        session.kill_all();
    }

    #[test]
    fn test_env_overrides() {
        let config = SessionConfig {
            all_capabilities: true,
            size: Some((40, 120)),
            ..Default::default()
        };
        let env = config.env_overrides();
        assert_eq!(env["TERM"], "screen-256color");
        assert_eq!(env["LINES"], "40");
        assert_eq!(env["COLUMNS"], "120");

        let config = SessionConfig {
            term: Some("xterm".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_overrides()["TERM"], "xterm");
    }
}
