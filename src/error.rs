use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`], used by the CLI for exit codes and
/// by the attach loop when it reports a failure it could not recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Unavailable,
    Unsupported,
    ResourceExhausted,
    Corrupted,
    LastWindow,
    PermissionDenied,
    Fatal,
    Invalid,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::LastWindow => "last window",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Io => "i/o",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    #[error("resource exhaustion while {context}: {source}")]
    ResourceExhausted {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("session record {} is corrupted (preserved as {})", path.display(), backup.display())]
    Corrupted { path: PathBuf, backup: PathBuf },

    #[error("cannot kill the last window")]
    LastWindow,

    #[error("permission denied: user {user} is not allowed to attach to session {session}")]
    PermissionDenied { user: String, session: String },

    #[error("no current window")]
    NoCurrentWindow,

    #[error("maximum number of windows ({}) reached", crate::models::MAX_WINDOWS)]
    WindowLimit,

    #[error("invalid name {0:?}: use letters, digits, '-', '_' or '.'")]
    InvalidName(String),

    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("failed to start PTY: {0}")]
    Spawn(String),

    #[error("terminated by signal: {0}")]
    Fatal(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode session record: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an I/O error, lifting descriptor and disk-space exhaustion into
    /// [`Error::ResourceExhausted`] so callers can retry instead of treating
    /// the failure as corruption.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if is_resource_exhausted(&source) {
            Error::ResourceExhausted { context, source }
        } else {
            Error::Io { context, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Unavailable(_) | Error::NoCurrentWindow => ErrorKind::Unavailable,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Error::Corrupted { .. } => ErrorKind::Corrupted,
            Error::LastWindow => ErrorKind::LastWindow,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::WindowLimit | Error::InvalidName(_) | Error::Config { .. } => ErrorKind::Invalid,
            Error::Spawn(_) | Error::Io { .. } | Error::Serialization(_) => ErrorKind::Io,
        }
    }
}

pub fn is_resource_exhausted(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::ENOSPC) | Some(libc::EMFILE) | Some(libc::ENFILE)
        )
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}
