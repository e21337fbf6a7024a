use crate::error::{Error, Result};
use portable_pty::MasterPty;
use std::path::{Path, PathBuf};

/// Finds the slave device path of a freshly opened PTY pair so a later
/// process can reopen it by name.
pub trait SlavePathResolver: Send + Sync {
    fn resolve(&self, master: &dyn MasterPty) -> Result<PathBuf>;
}

/// Resolver for platforms with named slave devices under `/dev`.
#[cfg(unix)]
pub struct DevPtsResolver;

#[cfg(unix)]
impl SlavePathResolver for DevPtsResolver {
    fn resolve(&self, master: &dyn MasterPty) -> Result<PathBuf> {
        if let Some(name) = master.tty_name() {
            if name.exists() {
                return Ok(name);
            }
        }

        let fd = master
            .as_raw_fd()
            .ok_or_else(|| Error::Unavailable("PTY master has no descriptor".to_string()))?;

        // The fd symlink points at the slave on some systems.
        let link = PathBuf::from("/proc/self/fd").join(fd.to_string());
        if let Ok(target) = std::fs::read_link(&link) {
            if is_pts_path(&target) {
                return Ok(target);
            }
        }

        #[cfg(target_os = "linux")]
        {
            let mut number: libc::c_uint = 0;
            let result = unsafe { libc::ioctl(fd, libc::TIOCGPTN, &mut number) };
            if result == 0 {
                let path = PathBuf::from(format!("/dev/pts/{}", number));
                if path.exists() {
                    return Ok(path);
                }
            }
        }

        Err(Error::NotFound("PTY slave path".to_string()))
    }
}

/// Resolver for platforms without named PTY devices.
pub struct UnsupportedResolver;

impl SlavePathResolver for UnsupportedResolver {
    fn resolve(&self, _master: &dyn MasterPty) -> Result<PathBuf> {
        Err(Error::Unsupported("PTY slave path resolution".to_string()))
    }
}

pub fn native_resolver() -> Box<dyn SlavePathResolver> {
    #[cfg(unix)]
    {
        Box::new(DevPtsResolver)
    }
    #[cfg(not(unix))]
    {
        Box::new(UnsupportedResolver)
    }
}

fn is_pts_path(path: &Path) -> bool {
    path.parent() == Some(Path::new("/dev/pts"))
}
