use crate::error::{Error, Result};
use crate::models::{current_user, validate_session_name, Session};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";

/// On-disk session records, one `<ID>.json` per session.
#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::io(format!("creating sessions directory {}", self.dir.display()), e)
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.record_path(id).exists()
    }

    /// Write the record to `<ID>.json.tmp` and rename it over `<ID>.json`,
    /// so readers only ever see a complete record.
    pub fn save(&self, session: &Session) -> Result<()> {
        validate_session_name(&session.id)?;
        self.ensure_dir()?;

        let path = self.record_path(&session.id);
        let tmp_path = tmp_path(&path);
        let contents = serde_json::to_vec_pretty(session)?;

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&contents)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::io(format!("writing session file {}", tmp_path.display()), e));
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::io(format!("renaming session file {}", path.display()), e));
        }

        debug!(id = %session.id, "persistence: saved record");
        Ok(())
    }

    /// Read one record. An unparsable record is moved aside to
    /// `<ID>.json.corrupted` and reported as [`Error::Corrupted`].
    pub fn load(&self, id: &str) -> Result<Session> {
        validate_session_name(id)?;
        let path = self.record_path(id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("session {id}")));
            }
            Err(e) => return Err(Error::io(format!("reading session file {}", path.display()), e)),
        };

        let mut session: Session = match serde_json::from_slice(&data) {
            Ok(session) => session,
            Err(e) => {
                let backup = quarantine(&path, &data);
                warn!("persistence: {} failed to parse: {e}", path.display());
                return Err(Error::Corrupted { path, backup });
            }
        };

        if session.id != id {
            debug!("persistence: record {} carried id {:?}", path.display(), session.id);
            session.id = id.to_string();
        }
        if session.owner.is_empty() {
            session.owner = current_user();
        }
        Ok(session)
    }

    /// Every readable record. Corrupt ones are quarantined and skipped.
    pub fn load_all(&self) -> Result<Vec<Session>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(
                    format!("reading sessions directory {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(session) => sessions.push(session),
                Err(e) => debug!("persistence: skipping {}: {e}", path.display()),
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        validate_session_name(id)?;
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("removing session file {}", path.display()), e)),
        }
    }

    pub fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        validate_session_name(old_id)?;
        validate_session_name(new_id)?;
        let from = self.record_path(old_id);
        let to = self.record_path(new_id);
        fs::rename(&from, &to)
            .map_err(|e| Error::io(format!("renaming session file {}", from.display()), e))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn corrupted_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupted");
    PathBuf::from(name)
}

/// Earlier backups are kept: a later corruption gets a timestamped name.
fn quarantine(path: &Path, data: &[u8]) -> PathBuf {
    let mut backup = corrupted_path(path);
    if backup.exists() {
        let mut name = backup.into_os_string();
        name.push(format!(".{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f")));
        backup = PathBuf::from(name);
    }
    if fs::rename(path, &backup).is_err() {
        // Keep a copy even if the original cannot be moved.
        let _ = fs::write(&backup, data);
    }
    backup
}

/// Registry directory: configured path, then `$RESCREEN_DIR`, then
/// `~/.rescreen/sessions`.
pub fn registry_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("RESCREEN_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".rescreen")
        .join("sessions")
}
