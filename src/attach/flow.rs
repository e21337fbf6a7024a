use crate::pty::{sys, PtyHandle};
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;

const STOPPED_POLL: Duration = Duration::from_millis(10);
const READ_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowMode {
    #[default]
    Off,
    On,
    Auto,
}

impl FromStr for FlowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "" => Ok(FlowMode::Off),
            "on" => Ok(FlowMode::On),
            "auto" => Ok(FlowMode::Auto),
            other => Err(format!("invalid flow control mode {other:?} (expected on, off or auto)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowControl {
    pub enabled: bool,
    /// Abort the copy on a downstream write error instead of pausing.
    pub interrupt: bool,
}

impl FlowControl {
    pub fn new(mode: FlowMode, interrupt: bool) -> Self {
        Self {
            enabled: mode != FlowMode::Off,
            interrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyEnd {
    Eof,
    Cancelled,
}

/// Copy `src` into `dst` until end of stream or cancellation.
///
/// With flow control enabled, XOFF/XON bytes are removed from the stream and
/// output read between an XOFF and the next XON is discarded. `WouldBlock`
/// from `src` is treated as "nothing yet" so a polling reader can hand
/// control back for the cancellation check.
pub fn copy_output<R: Read, W: Write>(
    src: &mut R,
    dst: &mut W,
    flow: FlowControl,
    cancel: &CancellationToken,
) -> io::Result<CopyEnd> {
    let mut buf = [0u8; 4096];
    let mut stopped = false;

    loop {
        if cancel.is_cancelled() {
            return Ok(CopyEnd::Cancelled);
        }

        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(CopyEnd::Eof),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => return Err(e),
        };

        if !flow.enabled {
            dst.write_all(&buf[..n])?;
            dst.flush()?;
            continue;
        }

        let mut data = Vec::with_capacity(n);
        for &b in &buf[..n] {
            match b {
                XOFF => stopped = true,
                XON => stopped = false,
                _ if !stopped => data.push(b),
                _ => {}
            }
        }

        if stopped {
            std::thread::sleep(STOPPED_POLL);
            continue;
        }
        if data.is_empty() {
            continue;
        }
        if let Err(e) = dst.write_all(&data).and_then(|_| dst.flush()) {
            if flow.interrupt {
                return Err(e);
            }
            stopped = true;
        }
    }
}

/// PTY reader that waits for readiness with a short timeout, returning
/// `WouldBlock` when nothing arrived so the caller can check cancellation.
pub struct PollingReader {
    pty: Arc<PtyHandle>,
    inner: Box<dyn Read + Send>,
    pid: Option<u32>,
}

impl PollingReader {
    pub fn new(pty: Arc<PtyHandle>, inner: Box<dyn Read + Send>) -> Self {
        let pid = pty.pid();
        Self { pty, inner, pid }
    }

    /// Report end of stream once `pid` is gone. A reopened slave device never
    /// sees EOF on its own while a keeper holds the master.
    pub fn watch_pid(mut self, pid: Option<u32>) -> Self {
        if pid.is_some() {
            self.pid = pid;
        }
        self
    }
}

impl Read for PollingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pty.wait_readable(READ_POLL)? {
            if self.pid.is_some_and(|pid| !sys::process_alive(pid)) {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        match self.inner.read(buf) {
            // Linux reports a closed slave side as EIO on the master.
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}
