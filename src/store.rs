use crate::attach::ScrollbackBuffer;
use crate::error::{Error, Result};
use crate::models::{current_user, validate_session_name, Session, SessionConfig, Window};
use crate::persistence::Registry;
use crate::pty::sys::RawFd;
use crate::pty::{PtyHandle, DEFAULT_COLS, DEFAULT_ROWS};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// A registered session. Window mutations go through [`SessionStore`] so they
/// are persisted; readers may lock it directly.
pub type SessionRef = Arc<Mutex<Session>>;

pub fn lock_session(session: &SessionRef) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide session index backed by the on-disk registry.
///
/// Lock order is index first, then session. No method acquires the index
/// while holding a session lock.
pub struct SessionStore {
    registry: Registry,
    sessions: RwLock<HashMap<String, SessionRef>>,
    paste: Mutex<Vec<u8>>,
}

impl SessionStore {
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            registry: Registry::new(dir),
            sessions: RwLock::new(HashMap::new()),
            paste: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn index_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionRef>> {
        self.sessions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn index_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionRef>> {
        self.sessions.write().unwrap_or_else(|p| p.into_inner())
    }

    /// In-memory lookup only.
    pub fn get(&self, id: &str) -> Option<SessionRef> {
        self.index_read().get(id).cloned()
    }

    fn registered(&self, id: &str) -> Result<SessionRef> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    pub fn create(
        &self,
        id: &str,
        cmd_path: &str,
        args: &[String],
        config: &SessionConfig,
    ) -> Result<SessionRef> {
        validate_session_name(id)?;

        let mut index = self.index_write();
        if index.contains_key(id) || self.registry.exists(id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        let window = start_window(0, cmd_path, args, config)?;
        let mut session = Session::new(id, &current_user());
        session.scrollback = config.scrollback;
        session.push_window(window)?;

        if let Err(e) = self.registry.save(&session) {
            session.kill_all();
            return Err(e);
        }

        info!(id, "store: created session");
        let session = Arc::new(Mutex::new(session));
        index.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Cached sessions get dead windows reconnected; otherwise the record is
    /// read from disk and every window whose process is still alive is
    /// reconnected through its slave device.
    pub fn load(&self, id: &str) -> Result<SessionRef> {
        validate_session_name(id)?;
        if let Some(session) = self.get(id) {
            reconnect_windows(&mut lock_session(&session));
            return Ok(session);
        }

        let mut session = match self.registry.load(id) {
            Ok(session) => session,
            Err(Error::Corrupted { backup, .. }) => {
                warn!(id, "store: record corrupted, preserved as {}", backup.display());
                return Err(Error::NotFound(format!("session {id}")));
            }
            Err(e) => return Err(e),
        };
        reconnect_windows(&mut session);

        let mut index = self.index_write();
        let entry = index
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        Ok(entry.clone())
    }

    /// Snapshot of every known session, memory winning over disk.
    pub fn list(&self) -> Vec<Session> {
        let memory: Vec<SessionRef> = self.index_read().values().cloned().collect();

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for session in memory {
            let mut session = lock_session(&session);
            reconnect_windows(&mut session);
            seen.insert(session.id.clone());
            result.push(session.clone());
        }

        match self.registry.load_all() {
            Ok(disk) => {
                for mut session in disk {
                    if seen.contains(&session.id) {
                        continue;
                    }
                    reconnect_windows(&mut session);
                    result.push(session);
                }
            }
            Err(e) => warn!("store: could not read registry: {e}"),
        }

        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        validate_session_name(id)?;
        let session = self
            .index_write()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        lock_session(&session).kill_all();
        self.registry.remove(id)?;
        info!(id, "store: deleted session");
        Ok(())
    }

    /// Sweep records that are not loaded in this process. Windows whose
    /// process is alive but can no longer be reached through a slave device
    /// are killed; records with no live window left are removed. Returns the
    /// IDs of removed records.
    pub fn cleanup_orphans(&self) -> Result<Vec<String>> {
        let index = self.index_read();
        let mut removed = Vec::new();

        for session in self.registry.load_all()? {
            if index.contains_key(&session.id) {
                continue;
            }

            let mut alive = false;
            for window in &session.windows {
                let Some(pid) = window.pid else { continue };
                if !crate::pty::sys::process_alive(pid) {
                    continue;
                }
                let reachable = window.pts_path.as_deref().is_some_and(Path::exists);
                if reachable {
                    alive = true;
                    continue;
                }
                debug!(id = %session.id, pid, "store: killing unreachable window process");
                if let Err(e) = window.kill() {
                    warn!(id = %session.id, "store: failed to kill orphan {pid}: {e}");
                    alive = true;
                }
            }

            if !alive {
                self.registry.remove(&session.id)?;
                info!(id = %session.id, "store: removed orphaned record");
                removed.push(session.id);
            }
        }
        Ok(removed)
    }

    /// Apply `f` under the session lock and persist the result.
    fn mutate<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let session = self.registered(id)?;
        let mut session = lock_session(&session);
        let value = f(&mut session)?;
        self.registry.save(&session)?;
        Ok(value)
    }

    pub fn persist(&self, id: &str) -> Result<()> {
        self.mutate(id, |_| Ok(()))
    }

    // ==== Window operations ====

    /// Start a new window and make it current. Returns its label.
    pub fn create_window(
        &self,
        id: &str,
        cmd_path: &str,
        args: &[String],
        config: &SessionConfig,
    ) -> Result<String> {
        self.mutate(id, |session| {
            let next = session.next_window_id()?;
            let window = start_window(next, cmd_path, args, config)?;
            let index = session.push_window(window)?;
            Ok(session.windows[index].number.clone())
        })
    }

    pub fn current_window(&self, id: &str) -> Result<Window> {
        let session = self.registered(id)?;
        let session = lock_session(&session);
        session.current().cloned().ok_or(Error::NoCurrentWindow)
    }

    pub fn get_window(&self, id: &str, label: &str) -> Result<Window> {
        let session = self.registered(id)?;
        let session = lock_session(&session);
        session
            .get_window(label)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("window {label}")))
    }

    pub fn switch_to_window(&self, id: &str, label: &str) -> Result<()> {
        self.mutate(id, |session| session.switch_to(label))
    }

    pub fn next_window(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            session.next();
            Ok(())
        })
    }

    pub fn prev_window(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            session.prev();
            Ok(())
        })
    }

    pub fn toggle_last_window(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            session.toggle_last();
            Ok(())
        })
    }

    /// The window stays in the session if its process cannot be killed.
    pub fn kill_current_window(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            if session.windows.len() == 1 {
                return Err(Error::LastWindow);
            }
            session.current().ok_or(Error::NoCurrentWindow)?.kill()?;
            session.remove_current_window().map(drop)
        })
    }

    /// Drop the current window once its process has gone away. The last
    /// window is never removed.
    pub fn retire_current_window(&self, id: &str) -> Result<()> {
        self.mutate(id, |session| {
            let removed = session.remove_current_window()?;
            if let Err(e) = removed.kill() {
                debug!(id, "store: retired window {} was not killable: {e}", removed.number);
            }
            Ok(())
        })
    }

    /// Master descriptors this process opened, one per window.
    pub fn master_fds(&self, id: &str) -> Vec<RawFd> {
        let Some(session) = self.get(id) else {
            return Vec::new();
        };
        let session = lock_session(&session);
        session
            .windows
            .iter()
            .filter_map(|w| w.pty().and_then(|pty| pty.master_fd()))
            .collect()
    }

    pub fn window_count(&self, id: &str) -> Result<usize> {
        let session = self.registered(id)?;
        let count = lock_session(&session).windows.len();
        Ok(count)
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        self.mutate(id, |session| {
            session.set_title(title);
            Ok(())
        })
    }

    pub fn save_layout(&self, id: &str, name: &str) -> Result<()> {
        self.mutate(id, |session| session.save_layout(name))
    }

    pub fn select_layout(&self, id: &str, name: &str) -> Result<()> {
        self.mutate(id, |session| session.select_layout(name))
    }

    pub fn add_user(&self, id: &str, user: &str) -> Result<()> {
        self.mutate(id, |session| session.add_user(user))
    }

    pub fn remove_user(&self, id: &str, user: &str) -> Result<()> {
        self.mutate(id, |session| session.remove_user(user))
    }

    /// Forget the in-memory PTY handles of a session. Its processes keep
    /// running and the record stays reconnectable by slave path.
    pub fn force_detach(&self, id: &str) -> Result<()> {
        let session = self.registered(id)?;
        lock_session(&session).clear_handles();
        Ok(())
    }

    pub fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        validate_session_name(old_id)?;
        validate_session_name(new_id)?;

        let mut index = self.index_write();
        if index.contains_key(new_id) || self.registry.exists(new_id) {
            return Err(Error::AlreadyExists(new_id.to_string()));
        }
        let session = index
            .remove(old_id)
            .ok_or_else(|| Error::NotFound(format!("session {old_id}")))?;
        let mut guard = lock_session(&session);
        guard.id = new_id.to_string();
        index.insert(new_id.to_string(), session.clone());

        if let Err(e) = self.registry.rename(old_id, new_id) {
            index.remove(new_id);
            guard.id = old_id.to_string();
            index.insert(old_id.to_string(), session.clone());
            return Err(e);
        }
        drop(index);

        info!(old_id, new_id, "store: renamed session");
        self.registry.save(&guard)
    }

    // ==== Paste buffer ====

    pub fn set_paste_buffer(&self, data: Vec<u8>) {
        *self.paste.lock().unwrap_or_else(|p| p.into_inner()) = data;
    }

    pub fn paste_buffer(&self) -> Vec<u8> {
        self.paste.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn write_paste_buffer(&self, path: &Path) -> Result<()> {
        fs::write(path, self.paste_buffer())
            .map_err(|e| Error::io(format!("writing paste buffer to {}", path.display()), e))
    }

    pub fn read_paste_buffer(&self, path: &Path) -> Result<()> {
        let data = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("file {}", path.display())),
            _ => Error::io(format!("reading paste buffer from {}", path.display()), e),
        })?;
        self.set_paste_buffer(data);
        Ok(())
    }

    pub fn dump_scrollback(&self, buffer: &ScrollbackBuffer, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)
            .map_err(|e| Error::io(format!("creating {}", path.display()), e))?;
        buffer
            .write_to(&mut file)
            .map_err(|e| Error::io(format!("writing scrollback to {}", path.display()), e))
    }
}

fn start_window(id: usize, cmd_path: &str, args: &[String], config: &SessionConfig) -> Result<Window> {
    let (rows, cols) = config.size.unwrap_or((DEFAULT_ROWS, DEFAULT_COLS));
    let pty = PtyHandle::start_sized(cmd_path, args, &config.env_overrides(), rows, cols)?;
    let mut window = Window::new(id, cmd_path, args, pty);
    window.scrollback_size = config.scrollback;
    window.encoding = config.window_encoding();
    Ok(window)
}

/// Reopen the slave device of every window whose handle is missing or dead
/// while its recorded process still runs.
fn reconnect_windows(session: &mut Session) {
    for window in &mut session.windows {
        if window.pty().is_some_and(|pty| pty.is_alive()) {
            continue;
        }
        let (Some(pid), Some(path)) = (window.pid, window.pts_path.clone()) else {
            continue;
        };
        if !crate::pty::sys::process_alive(pid) {
            continue;
        }
        match PtyHandle::reconnect(&path) {
            Ok(pty) => {
                debug!(id = %session.id, window = %window.number, "store: reconnected {}", path.display());
                window.set_pty(Arc::new(pty));
            }
            Err(e) => debug!(id = %session.id, window = %window.number, "store: reconnect failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path().join("sessions"));
        (dir, store)
    }

    fn sleep_args() -> Vec<String> {
        vec!["30".to_string()]
    }

    fn create(store: &SessionStore, id: &str) -> SessionRef {
        store
            .create(id, "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap()
    }

    fn window_count(store: &SessionStore, id: &str) -> usize {
        lock_session(&store.get(id).unwrap()).windows.len()
    }

    // ==== Create / load / delete ====

    #[test]
    fn test_create_persists_record() {
        let (_dir, store) = store();
        create(&store, "demo");
        assert!(store.registry().exists("demo"));

        let record = store.registry().load("demo").unwrap();
        assert_eq!(record.windows.len(), 1);
        assert!(record.windows[0].pid.is_some());
        store.delete("demo").unwrap();
    }

    #[test]
    fn test_create_collision() {
        let (_dir, store) = store();
        create(&store, "dup");
        let err = store
            .create("dup", "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        store.delete("dup").unwrap();
    }

    #[test]
    fn test_create_rejects_bad_name() {
        let (_dir, store) = store();
        let err = store
            .create("../etc", "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_delete_unknown_session() {
        let (_dir, store) = store();
        assert_eq!(store.delete("nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_removes_record() {
        let (_dir, store) = store();
        create(&store, "gone");
        store.delete("gone").unwrap();
        assert!(store.get("gone").is_none());
        assert!(!store.registry().exists("gone"));
    }

    #[test]
    fn test_load_corrupt_record_is_not_found() {
        let (_dir, store) = store();
        fs::create_dir_all(store.registry().dir()).unwrap();
        let path = store.registry().record_path("bad");
        fs::write(&path, b"{{{").unwrap();

        let err = store.load("bad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.registry().dir().join("bad.json.corrupted").exists());
    }

    #[test]
    fn test_load_is_idempotent() {
        let (_dir, store) = store();
        create(&store, "twice");

        let first = store.load("twice").unwrap();
        let pid = lock_session(&first).windows[0].pid;
        assert!(lock_session(&first).windows[0].is_alive());

        let second = store.load("twice").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock_session(&second).windows[0].pid, pid);
        assert!(lock_session(&second).windows[0].is_alive());
        store.delete("twice").unwrap();
    }

    // ==== Detach / reattach ====

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detach_then_reattach_from_second_store() {
        let dir = TempDir::new().unwrap();
        let first = SessionStore::open(dir.path());
        let session = create(&first, "demo");
        let pid = lock_session(&session).windows[0].pid.unwrap();

        // Detach: this test stands in for the keeper and holds the master.
        let held_master = lock_session(&session).windows[0].pty().unwrap();
        first.force_detach("demo").unwrap();
        assert!(crate::pty::sys::process_alive(pid));

        let second = SessionStore::open(dir.path());
        let listed = second.list();
        assert!(listed.iter().any(|s| s.id == "demo"));

        let loaded = second.load("demo").unwrap();
        {
            let loaded = lock_session(&loaded);
            let window = loaded.current().unwrap();
            assert_eq!(window.pid, Some(pid));
            assert!(window.pty().is_some());
            assert!(window.is_alive());
        }

        second.delete("demo").unwrap();
        drop(held_master);
    }

    #[test]
    fn test_list_merges_memory_and_disk() {
        let (_dir, store) = store();
        create(&store, "live");
        store.registry().save(&Session::new("cold", "alice")).unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert!(ids.contains(&"live".to_string()));
        assert!(ids.contains(&"cold".to_string()));
        assert_eq!(ids.iter().filter(|id| *id == "live").count(), 1);
        store.delete("live").unwrap();
    }

    #[test]
    fn test_cleanup_removes_dead_records() {
        let (_dir, store) = store();

        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();

        let mut record = Session::new("stale", "alice");
        let pty = PtyHandle::start("sleep", &["30".to_string()], &HashMap::new()).unwrap();
        let mut window = Window::new(0, "sleep", &[], pty);
        window.kill().unwrap();
        window.clear_pty();
        window.pid = Some(dead_pid);
        record.windows.push(window);
        store.registry().save(&record).unwrap();

        create(&store, "kept");

        let removed = store.cleanup_orphans().unwrap();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(!store.registry().exists("stale"));
        assert!(store.registry().exists("kept"));
        store.delete("kept").unwrap();
    }

    // ==== Window mutators ====

    #[test]
    fn test_window_renumbering_through_store() {
        let (_dir, store) = store();
        create(&store, "win");
        let config = SessionConfig::default();
        for _ in 0..3 {
            store.create_window("win", "sleep", &sleep_args(), &config).unwrap();
        }
        assert_eq!(window_count(&store, "win"), 4);

        store.switch_to_window("win", "1").unwrap();
        store.kill_current_window("win").unwrap();
        store.kill_current_window("win").unwrap();

        let record = store.registry().load("win").unwrap();
        let labels: Vec<&str> = record.windows.iter().map(|w| w.number.as_str()).collect();
        assert_eq!(labels, vec!["0", "1"]);
        assert!(record.current_window < 2);
        store.delete("win").unwrap();
    }

    #[test]
    fn test_killed_window_is_gone_in_memory_and_on_disk() {
        let (_dir, store) = store();
        create(&store, "reap");
        store
            .create_window("reap", "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap();
        let pid = lock_session(&store.get("reap").unwrap()).current().unwrap().pid.unwrap();

        store.kill_current_window("reap").unwrap();

        let memory: Vec<Option<u32>> = lock_session(&store.get("reap").unwrap())
            .windows
            .iter()
            .map(|w| w.pid)
            .collect();
        let disk: Vec<Option<u32>> = store.registry().load("reap").unwrap().windows.iter().map(|w| w.pid).collect();
        assert_eq!(memory, disk);
        assert!(!memory.contains(&Some(pid)));
        store.delete("reap").unwrap();
    }

    #[test]
    fn test_names_outside_the_registry_are_rejected() {
        let dir = TempDir::new().unwrap();
        let other = SessionStore::open(dir.path().join("other"));
        let store = SessionStore::open(dir.path().join("sessions"));
        create(&other, "victim");

        let err = store.load("../other/victim").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(store.delete("../other/victim").unwrap_err().kind(), ErrorKind::Invalid);
        assert_eq!(store.rename("../other/victim", "mine").unwrap_err().kind(), ErrorKind::Invalid);

        assert!(other.registry().exists("victim"));
        assert!(lock_session(&other.get("victim").unwrap()).windows[0].is_alive());
        other.delete("victim").unwrap();
    }

    #[test]
    fn test_master_fds_cover_every_window() {
        let (_dir, store) = store();
        create(&store, "fds");
        store
            .create_window("fds", "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap();
        assert_eq!(store.master_fds("fds").len(), 2);
        assert!(store.master_fds("missing").is_empty());

        store.force_detach("fds").unwrap();
        assert!(store.master_fds("fds").is_empty());
        store.delete("fds").unwrap();
    }

    #[test]
    fn test_kill_last_window_refused() {
        let (_dir, store) = store();
        create(&store, "solo");
        let err = store.kill_current_window("solo").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LastWindow);
        assert_eq!(window_count(&store, "solo"), 1);
        store.delete("solo").unwrap();
    }

    #[test]
    fn test_navigation_is_persisted() {
        let (_dir, store) = store();
        create(&store, "nav");
        store
            .create_window("nav", "sleep", &sleep_args(), &SessionConfig::default())
            .unwrap();
        store.next_window("nav").unwrap();
        assert_eq!(store.registry().load("nav").unwrap().current_window, 0);
        store.toggle_last_window("nav").unwrap();
        assert_eq!(store.registry().load("nav").unwrap().current_window, 1);
        store.prev_window("nav").unwrap();
        assert_eq!(store.current_window("nav").unwrap().number, "0");

        store.set_title("nav", "editor").unwrap();
        assert_eq!(store.get_window("nav", "0").unwrap().title, "editor");
        store.delete("nav").unwrap();
    }

    #[test]
    fn test_rename() {
        let (_dir, store) = store();
        create(&store, "old");
        create(&store, "taken");

        let err = store.rename("old", "taken").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        store.rename("old", "new").unwrap();
        assert!(store.get("old").is_none());
        assert!(!store.registry().exists("old"));
        assert_eq!(store.registry().load("new").unwrap().id, "new");

        store.delete("new").unwrap();
        store.delete("taken").unwrap();
    }

    #[test]
    fn test_acl_is_persisted() {
        let (_dir, store) = store();
        create(&store, "shared");
        store.add_user("shared", "bob").unwrap();
        assert_eq!(
            store.registry().load("shared").unwrap().allowed_users,
            vec!["bob".to_string()]
        );
        store.remove_user("shared", "bob").unwrap();
        assert!(store.registry().load("shared").unwrap().allowed_users.is_empty());
        store.delete("shared").unwrap();
    }

    // ==== Paste buffer ====

    #[test]
    fn test_paste_buffer_files() {
        let (dir, store) = store();
        let path = dir.path().join("paste.txt");

        store.set_paste_buffer(b"hello".to_vec());
        store.write_paste_buffer(&path).unwrap();
        store.set_paste_buffer(Vec::new());
        store.read_paste_buffer(&path).unwrap();
        assert_eq!(store.paste_buffer(), b"hello".to_vec());

        let err = store.read_paste_buffer(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dump_scrollback() {
        let (dir, store) = store();
        let buffer = ScrollbackBuffer::new(10);
        buffer.append(b"first".to_vec());
        buffer.append(b"second".to_vec());
        let path = dir.path().join("dump.txt");
        store.dump_scrollback(&buffer, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
