//! Keeps a PTY master open after the attaching process exits.
//!
//! There is no daemon. On detach the attach process re-executes itself with
//! [`KEEPER_ENV`] set, handing over the master descriptor as fd 3 and a
//! readiness pipe as fd 4. The new process acknowledges on fd 4 and then
//! does nothing but hold fd 3, so the program on the slave side never sees a
//! hangup and a later attach can reopen the slave device by path. It exits
//! once nothing has the slave side open any more.

use crate::error::{Error, Result};
use crate::pty::sys::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const KEEPER_ENV: &str = "RESCREEN_DETACH_KEEPER";
pub const HOLD_FD_ENV: &str = "RESCREEN_HOLD_FD";
pub const READY_FD_ENV: &str = "RESCREEN_READY_FD";

const HOLD_FD: RawFd = 3;
const READY_FD: RawFd = 4;
const READY_BYTE: u8 = b'R';
const READY_TIMEOUT: Duration = Duration::from_millis(500);

/// Transfers ownership of a descriptor to something that outlives us.
/// Returns the pid of the holder when there is one.
pub trait HandOff: Send + Sync {
    fn hand_off(&self, fd: RawFd) -> Result<Option<u32>>;
}

/// Turn this process into a keeper if the environment says so. Never returns
/// in that case. Must run before logging or the async runtime start.
pub fn run_if_requested() {
    if std::env::var(KEEPER_ENV).as_deref() != Ok("1") {
        return;
    }
    #[cfg(unix)]
    hold_until_hangup();
}

/// Hold the descriptor until the slave side has no users left, then exit.
#[cfg(unix)]
fn hold_until_hangup() -> ! {
    let fd_from_env = |key: &str, default: RawFd| {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse::<RawFd>().ok())
            .filter(|fd| *fd > 0)
            .unwrap_or(default)
    };
    let hold = fd_from_env(HOLD_FD_ENV, HOLD_FD);
    let ready = fd_from_env(READY_FD_ENV, READY_FD);

    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
        // A single byte is the whole acknowledgement.
        let ack = READY_BYTE;
        libc::write(ready, &ack as *const u8 as *const libc::c_void, 1);
        libc::close(ready);
    }
    // No events requested: poll only wakes for hangup or error.
    let mut pfd = libc::pollfd {
        fd: hold,
        events: 0,
        revents: 0,
    };
    loop {
        let n = unsafe { libc::poll(&mut pfd, 1, -1) };
        if n > 0 && pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            std::process::exit(0);
        }
    }
}

/// Re-executes a program (by default the current executable) as a keeper.
#[derive(Debug, Clone)]
pub struct ReexecKeeper {
    program: PathBuf,
    args: Vec<String>,
}

impl ReexecKeeper {
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::io("locating the current executable", e))?;
        Ok(Self::with_program(program, &[]))
    }

    pub fn with_program(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Spawn the keeper and wait briefly for its acknowledgement. Returns the
    /// keeper pid and whether it acknowledged in time.
    #[cfg(unix)]
    fn spawn(&self, fd: RawFd) -> Result<(u32, bool)> {
        use std::os::fd::AsRawFd;
        use std::os::unix::process::CommandExt;
        use std::process::{Command, Stdio};

        let (ready_read, ready_write) =
            crate::pty::sys::pipe().map_err(|e| Error::io("creating keeper readiness pipe", e))?;
        let ready_raw = ready_write.as_raw_fd();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(KEEPER_ENV, "1")
            .env(HOLD_FD_ENV, HOLD_FD.to_string())
            .env(READY_FD_ENV, READY_FD.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Only async-signal-safe calls between fork and exec. Both sources are
        // first moved above the target range so dup2 cannot clobber them.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                let hold = libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 10);
                let ready = libc::fcntl(ready_raw, libc::F_DUPFD_CLOEXEC, 10);
                if hold == -1 || ready == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::dup2(hold, HOLD_FD) == -1 || libc::dup2(ready, READY_FD) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("keeper {}: {e}", self.program.display())))?;
        drop(ready_write);

        let ready = wait_ready(ready_read);
        Ok((child.id(), ready))
    }
}

#[cfg(unix)]
fn wait_ready(read: std::os::fd::OwnedFd) -> bool {
    use std::io::Read;
    use std::os::fd::AsRawFd;

    match crate::pty::sys::wait_readable(read.as_raw_fd(), READY_TIMEOUT) {
        Ok(true) => {
            let mut byte = [0u8; 1];
            matches!(std::fs::File::from(read).read(&mut byte), Ok(1)) && byte[0] == READY_BYTE
        }
        Ok(false) => false,
        Err(e) => {
            debug!("keeper: waiting for readiness failed: {e}");
            false
        }
    }
}

impl HandOff for ReexecKeeper {
    #[cfg(unix)]
    fn hand_off(&self, fd: RawFd) -> Result<Option<u32>> {
        let (pid, ready) = self.spawn(fd)?;
        if ready {
            debug!(pid, fd, "keeper: holding descriptor");
        } else {
            warn!(pid, "keeper: no readiness signal within {READY_TIMEOUT:?}");
        }
        Ok(Some(pid))
    }

    #[cfg(not(unix))]
    fn hand_off(&self, _fd: RawFd) -> Result<Option<u32>> {
        Err(Error::Unsupported("descriptor hand-off".to_string()))
    }
}

/// Runs a [`HandOff`] for each open PTY master at most once per attachment.
pub struct DetachHook {
    handoff: Box<dyn HandOff>,
    fired: AtomicBool,
}

impl DetachHook {
    pub fn new(handoff: Box<dyn HandOff>) -> Self {
        Self {
            handoff,
            fired: AtomicBool::new(false),
        }
    }

    /// Hand every descriptor to a keeper. Failures are logged, never
    /// returned: detaching goes ahead regardless. Returns the keeper pids.
    pub fn fire(&self, session_id: &str, fds: &[RawFd]) -> Vec<u32> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        if fds.is_empty() {
            debug!(session = session_id, "keeper: nothing to hold");
            return Vec::new();
        }

        let mut pids = Vec::new();
        for &fd in fds {
            match self.handoff.hand_off(fd) {
                Ok(Some(pid)) => pids.push(pid),
                Ok(None) => {}
                Err(e) => warn!(session = session_id, "keeper: hand-off failed: {e}"),
            }
        }
        info!(session = session_id, keepers = pids.len(), "keeper: detached");
        pids
    }
}
