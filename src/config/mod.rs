pub mod bindings;

use crate::attach::{AttachConfig, DecoderConfig, FlowControl, FlowMode, DEFAULT_COMMAND_BYTE, DEFAULT_LITERAL_BYTE};
use crate::error::{Error, Result};
use crate::models::SessionConfig;
use crate::pty::default_shell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default configuration embedded at compile time
const DEFAULT_CONFIG: &str = include_str!("defaults.toml");

/// Empty strings mean "not set" throughout, matching the defaults file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub shell: String,
    pub term: String,
    pub all_capabilities: bool,
    pub utf8: bool,
    pub encoding: String,
    pub scrollback: usize,
    pub log_file: String,
    pub flow_control: String,
    pub interrupt: bool,
    pub optimal_output: bool,
    pub escape: String,
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    pub activity_message: String,
    pub silence_message: String,
    pub silence_timeout: u64,
    pub status_format: String,
    pub registry_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        // The embedded file is checked by the tests below.
        Self::from_layers(None).unwrap_or_else(|_| Self::fallback())
    }
}

impl Config {
    fn fallback() -> Self {
        Self {
            shell: String::new(),
            term: String::new(),
            all_capabilities: false,
            utf8: false,
            encoding: String::new(),
            scrollback: crate::models::DEFAULT_SCROLLBACK,
            log_file: String::new(),
            flow_control: "off".to_string(),
            interrupt: false,
            optimal_output: false,
            escape: "^Aa".to_string(),
            bindings: HashMap::new(),
            activity_message: String::new(),
            silence_message: String::new(),
            silence_timeout: 0,
            status_format: String::new(),
            registry_dir: String::new(),
        }
    }

    /// Load defaults overlaid with a user file. An explicit `path` must exist;
    /// the default user file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (user_config_path(), false),
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => return Ok(Self::default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("config file {}", path.display())))
            }
            Err(e) => return Err(Error::io(format!("reading {}", path.display()), e)),
        };

        Self::from_layers(Some(&contents)).map_err(|message| Error::Config { path, message })
    }

    /// Overlay `user` TOML on the embedded defaults, key by key. Tables (the
    /// bindings) are merged entry by entry.
    pub fn from_layers(user: Option<&str>) -> std::result::Result<Self, String> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG).map_err(|e| e.to_string())?;
        if let Some(user) = user {
            let user: toml::Table = toml::from_str(user).map_err(|e| e.to_string())?;
            for (key, value) in user {
                match value {
                    toml::Value::Table(overlay) if matches!(merged.get(&key), Some(toml::Value::Table(_))) => {
                        if let Some(toml::Value::Table(base)) = merged.get_mut(&key) {
                            for (name, binding) in overlay {
                                base.insert(name, binding);
                            }
                        }
                    }
                    value => {
                        merged.insert(key, value);
                    }
                }
            }
        }
        toml::Value::Table(merged)
            .try_into::<Config>()
            .map_err(|e| e.to_string())
    }

    /// `(command byte, literal byte)` from `escape`.
    pub fn escape_bytes(&self) -> (u8, u8) {
        match bindings::parse_escape(&self.escape) {
            Some(bytes) => bytes,
            None => {
                if !self.escape.is_empty() {
                    warn!("config: ignoring invalid escape {:?}", self.escape);
                }
                (DEFAULT_COMMAND_BYTE, DEFAULT_LITERAL_BYTE)
            }
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let (command_byte, literal_byte) = self.escape_bytes();
        DecoderConfig {
            command_byte,
            literal_byte,
            bindings: bindings::parse_bindings(&self.bindings),
        }
    }

    pub fn flow_mode(&self) -> FlowMode {
        self.flow_control.parse().unwrap_or_else(|e| {
            warn!("config: {e}");
            FlowMode::Off
        })
    }

    pub fn shell(&self) -> String {
        non_empty(&self.shell).unwrap_or_else(default_shell)
    }

    pub fn registry_dir(&self) -> Option<PathBuf> {
        non_empty(&self.registry_dir).map(PathBuf::from)
    }

    pub fn session_config(&self, size: Option<(u16, u16)>) -> SessionConfig {
        SessionConfig {
            term: non_empty(&self.term),
            utf8: self.utf8,
            all_capabilities: self.all_capabilities,
            encoding: non_empty(&self.encoding),
            scrollback: self.scrollback,
            size,
        }
    }

    pub fn attach_config(&self, size: Option<(u16, u16)>) -> AttachConfig {
        AttachConfig {
            shell: self.shell(),
            session: self.session_config(size),
            flow: FlowControl::new(self.flow_mode(), self.interrupt),
            optimal_output: self.optimal_output,
            log_file: non_empty(&self.log_file).map(PathBuf::from),
            activity_message: non_empty(&self.activity_message),
            silence_message: non_empty(&self.silence_message),
            silence_timeout: (self.silence_timeout > 0).then(|| Duration::from_secs(self.silence_timeout)),
            status_format: non_empty(&self.status_format),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Get the path to user's config file
pub fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rescreen")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_defaults_parse() {
        let config = Config::from_layers(None).unwrap();
        assert_eq!(config.escape, "^Aa");
        assert_eq!(config.scrollback, 1000);
        assert_eq!(config.flow_mode(), FlowMode::Off);
        assert_eq!(config.escape_bytes(), (0x01, b'a'));
        assert_eq!(config.bindings.get("w").map(String::as_str), Some("windows"));
    }

    #[test]
    fn test_user_file_overrides_field_by_field() {
        let config = Config::from_layers(Some(
            r#"
            escape = "^Bb"
            scrollback = 50
            [bindings]
            "^K" = "kill"
            "#,
        ))
        .unwrap();
        assert_eq!(config.escape_bytes(), (0x02, b'b'));
        assert_eq!(config.scrollback, 50);
        // Untouched keys keep their defaults.
        assert_eq!(config.flow_control, "off");
        assert_eq!(config.bindings.len(), 2);

        let decoder = config.decoder_config();
        assert_eq!(decoder.bindings[&0x0bu8], "kill");
        assert_eq!(decoder.bindings[&b'w'], "windows");
    }

    #[test]
    fn test_invalid_user_file() {
        assert!(Config::from_layers(Some("scrollback = \"many\"")).is_err());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not toml").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn test_explicit_missing_file_is_not_found() {
        let err = Config::load(Some(Path::new("/nonexistent/rescreen.toml"))).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_escape_falls_back() {
        let config = Config {
            escape: "^".to_string(),
            ..Config::default()
        };
        assert_eq!(config.escape_bytes(), (DEFAULT_COMMAND_BYTE, DEFAULT_LITERAL_BYTE));
    }

    #[test]
    fn test_attach_config() {
        let config = Config {
            shell: "/bin/zsh".to_string(),
            term: "xterm".to_string(),
            log_file: "/tmp/screenlog.%n".to_string(),
            flow_control: "on".to_string(),
            silence_message: "quiet in %n".to_string(),
            silence_timeout: 30,
            ..Config::default()
        };
        let attach = config.attach_config(Some((40, 100)));
        assert_eq!(attach.shell, "/bin/zsh");
        assert_eq!(attach.session.term.as_deref(), Some("xterm"));
        assert_eq!(attach.session.size, Some((40, 100)));
        assert!(attach.flow.enabled);
        assert_eq!(attach.log_file, Some(PathBuf::from("/tmp/screenlog.%n")));
        assert_eq!(attach.silence_timeout, Some(Duration::from_secs(30)));
        assert_eq!(attach.activity_message, None);
        assert_eq!(attach.status_format, None);
    }
}
