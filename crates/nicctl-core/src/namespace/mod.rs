//! Network namespace handles.
//!
//! A [`NetNs`] wraps an open descriptor on a namespace file such as
//! `/proc/<pid>/ns/net`. Holding the descriptor keeps the namespace alive
//! for as long as any clone of the handle exists, even after the owning
//! process has exited.

pub mod guard;

use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nicctl_common::error::{NicError, Result};

pub use guard::NetnsGuard;

/// Namespace file of the calling thread.
pub const THREAD_SELF_NET_NS: &str = "/proc/thread-self/ns/net";

/// Opaque handle to a network namespace.
///
/// Two handles compare equal when they refer to the same namespace inode,
/// regardless of which path they were opened through.
#[derive(Clone)]
pub struct NetNs {
    inner: Arc<Inner>,
}

struct Inner {
    file: File,
    dev: u64,
    ino: u64,
    origin: PathBuf,
}

impl NetNs {
    /// Opens the namespace file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or inspected.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| NicError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let meta = file.metadata().map_err(|e| NicError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                file,
                dev: meta.dev(),
                ino: meta.ino(),
                origin: path.to_path_buf(),
            }),
        })
    }

    /// Returns the namespace the calling thread currently runs in.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc/thread-self/ns/net` cannot be opened.
    pub fn current() -> Result<Self> {
        Self::open(Path::new(THREAD_SELF_NET_NS))
    }

    /// Returns the namespace of process `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or its namespace
    /// file is not accessible.
    pub fn from_pid(pid: u32) -> Result<Self> {
        Self::open(&PathBuf::from(format!("/proc/{pid}/ns/net")))
    }

    /// Path this handle was opened from.
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.inner.origin
    }

    /// Inode number identifying the namespace.
    #[must_use]
    pub fn inode(&self) -> u64 {
        self.inner.ino
    }
}

impl AsFd for NetNs {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.file.as_fd()
    }
}

impl AsRawFd for NetNs {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.file.as_raw_fd()
    }
}

impl PartialEq for NetNs {
    fn eq(&self, other: &Self) -> bool {
        self.inner.dev == other.inner.dev && self.inner.ino == other.inner.ino
    }
}

impl Eq for NetNs {}

impl Hash for NetNs {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.dev.hash(state);
        self.inner.ino.hash(state);
    }
}

impl fmt::Debug for NetNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetNs")
            .field("ino", &self.inner.ino)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

impl fmt::Display for NetNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:[{}]", self.inner.ino)
    }
}
