use crate::error::{Error, Result};
use crate::pty::slave_path::native_resolver;
use crate::pty::sys::{self, RawFd};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

enum Endpoint {
    /// Master side of a pair this process opened.
    Master(Box<dyn MasterPty + Send>),
    /// Slave device reopened by path after the original process went away.
    Device(File),
    Closed,
}

/// One pseudoterminal and (when we spawned it) the process on its slave side.
///
/// Shared between the attach loop and its copy tasks behind an `Arc`; every
/// mutable part sits behind its own lock so a blocked read on a cloned reader
/// never stalls resize or liveness checks.
pub struct PtyHandle {
    endpoint: Mutex<Endpoint>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    process_id: Option<u32>,
    pts_path: Option<PathBuf>,
    raw_fd: Option<RawFd>,
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.process_id)
            .field("pts_path", &self.pts_path)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PtyHandle {
    /// Spawn `program` on a new PTY in its own session/process group.
    ///
    /// `env` entries override the inherited environment. Failing to resolve
    /// the slave path is not an error; the handle simply has no `pts_path`.
    pub fn start(program: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        Self::start_sized(program, args, env, DEFAULT_ROWS, DEFAULT_COLS)
    }

    pub fn start_sized(
        program: &str,
        args: &[String],
        env: &HashMap<String, String>,
        rows: u16,
        cols: u16,
    ) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Spawn(format!("failed to open PTY: {e}")))?;

        let (program, args) = wrap_for_detach(program, args);
        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(format!("failed to spawn {program}: {e}")))?;
        // The slave stays open only in the child from here on.
        drop(pair.slave);

        let killer = child.clone_killer();
        let process_id = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Spawn(format!("failed to take PTY writer: {e}")))?;

        let pts_path = match native_resolver().resolve(pair.master.as_ref()) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("pty: slave path unavailable: {e}");
                None
            }
        };

        #[cfg(unix)]
        let raw_fd = pair.master.as_raw_fd();
        #[cfg(not(unix))]
        let raw_fd = None;

        debug!(?process_id, ?pts_path, "pty: started {program}");

        Ok(Self {
            endpoint: Mutex::new(Endpoint::Master(pair.master)),
            writer: Mutex::new(writer),
            child: Mutex::new(Some(child)),
            killer: Mutex::new(Some(killer)),
            process_id,
            pts_path,
            raw_fd,
        })
    }

    /// Reopen an existing slave device. No process is spawned and the
    /// returned handle has no process reference.
    #[cfg(unix)]
    pub fn reconnect(pts_path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        if !pts_path.exists() {
            return Err(Error::NotFound(format!("PTY device {}", pts_path.display())));
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(pts_path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("PTY device {}", pts_path.display()))
                }
                _ => Error::io(format!("failed to open {}", pts_path.display()), e),
            })?;
        let writer = file
            .try_clone()
            .map_err(|e| Error::io("failed to clone PTY device", e))?;
        let raw_fd = file.as_raw_fd();

        debug!(path = %pts_path.display(), "pty: reconnected");

        Ok(Self {
            endpoint: Mutex::new(Endpoint::Device(file)),
            writer: Mutex::new(Box::new(writer)),
            child: Mutex::new(None),
            killer: Mutex::new(None),
            process_id: None,
            pts_path: Some(pts_path.to_path_buf()),
            raw_fd: Some(raw_fd),
        })
    }

    #[cfg(not(unix))]
    pub fn reconnect(_pts_path: &Path) -> Result<Self> {
        Err(Error::Unsupported("PTY reconnection".to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.process_id
    }

    pub fn pts_path(&self) -> Option<&Path> {
        self.pts_path.as_deref()
    }

    /// Master (or reopened device) descriptor, if still open.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match *lock(&self.endpoint) {
            Endpoint::Closed => None,
            _ => self.raw_fd,
        }
    }

    /// The master descriptor, only when this process opened the pair. A
    /// reopened slave device needs no keeper: one already holds its master.
    pub fn master_fd(&self) -> Option<RawFd> {
        match *lock(&self.endpoint) {
            Endpoint::Master(_) => self.raw_fd,
            _ => None,
        }
    }

    pub fn is_alive(&self) -> bool {
        if let Some(pid) = self.process_id {
            if let Some(child) = lock(&self.child).as_mut() {
                if let Ok(Some(_)) = child.try_wait() {
                    return false;
                }
            }
            return sys::process_alive(pid);
        }

        // Reconnected handle: all we can tell is whether the device is open.
        match self.raw_fd() {
            Some(fd) => sys::fd_is_open(fd),
            None => false,
        }
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        match &*lock(&self.endpoint) {
            Endpoint::Master(master) => master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| Error::Unavailable(format!("PTY resize failed: {e}"))),
            #[cfg(unix)]
            Endpoint::Device(file) => {
                use std::os::unix::io::AsRawFd;
                sys::set_winsize(file.as_raw_fd(), rows, cols)
                    .map_err(|e| Error::Unavailable(format!("PTY resize failed: {e}")))
            }
            #[cfg(not(unix))]
            Endpoint::Device(_) => Err(Error::Unsupported("PTY resize".to_string())),
            Endpoint::Closed => Err(Error::Unavailable("PTY is closed".to_string())),
        }
    }

    /// A fresh reader over the PTY output. Each attach iteration takes its own.
    pub fn reader(&self) -> Result<Box<dyn Read + Send>> {
        match &*lock(&self.endpoint) {
            Endpoint::Master(master) => master
                .try_clone_reader()
                .map_err(|e| Error::Unavailable(format!("failed to clone PTY reader: {e}"))),
            Endpoint::Device(file) => file
                .try_clone()
                .map(|f| Box::new(f) as Box<dyn Read + Send>)
                .map_err(|e| Error::io("failed to clone PTY device", e)),
            Endpoint::Closed => Err(Error::Unavailable("PTY is closed".to_string())),
        }
    }

    pub fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()
    }

    /// Block until the descriptor has data (or hung up), up to `timeout`.
    pub fn wait_readable(&self, timeout: Duration) -> std::io::Result<bool> {
        match self.raw_fd() {
            Some(fd) => sys::wait_readable(fd, timeout),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "PTY is closed",
            )),
        }
    }

    #[cfg(unix)]
    pub fn signal(&self, signal: i32) -> std::io::Result<()> {
        match self.process_id {
            Some(pid) => sys::signal_pid(pid, signal),
            None => Ok(()),
        }
    }

    /// Kill the process group. A no-op for reconnected handles.
    pub fn kill(&self) -> Result<()> {
        #[cfg(unix)]
        if let Some(pgid) = self.process_id.filter(|pid| *pid > 0) {
            // portable-pty uses setsid() on spawn, so pid == pgid for the child.
            if sys::signal_group(pgid, libc::SIGKILL).is_ok() {
                return Ok(());
            }
        }

        if let Some(killer) = lock(&self.killer).as_mut() {
            killer
                .kill()
                .map_err(|e| Error::io("failed to kill PTY process", e))?;
        }
        Ok(())
    }

    /// Wait for the process to exit and return its exit code. Returns `None`
    /// immediately when there is no process reference.
    pub fn wait(&self) -> Result<Option<u32>> {
        let child = lock(&self.child).take();
        match child {
            Some(mut child) => {
                let status = child
                    .wait()
                    .map_err(|e| Error::io("failed to wait for PTY process", e))?;
                Ok(Some(status.exit_code()))
            }
            None => Ok(None),
        }
    }

    /// Drop the master side in this process.
    pub fn close(&self) {
        *lock(&self.endpoint) = Endpoint::Closed;
    }
}

/// Interactive shells are started under `nohup` so foreground jobs survive a
/// hangup if the master ever does get closed.
fn wrap_for_detach(program: &str, args: &[String]) -> (String, Vec<String>) {
    let base = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
        .to_lowercase();
    let is_shell = matches!(base.as_str(), "zsh" | "bash" | "sh" | "ksh" | "fish");
    let interactive = args.is_empty() || args.iter().any(|a| a == "-i" || a == "--interactive");

    if cfg!(unix) && is_shell && interactive {
        let mut wrapped = Vec::with_capacity(args.len() + 1);
        wrapped.push(program.to_string());
        wrapped.extend(args.iter().cloned());
        return ("nohup".to_string(), wrapped);
    }
    (program.to_string(), args.to_vec())
}

/// Returns the user's default shell, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
