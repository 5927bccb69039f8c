//! Scoped network namespace switching.
//!
//! The network namespace is per-thread kernel state. [`NetnsGuard`] moves
//! the calling thread into a target namespace and moves it back when the
//! guard is dropped, on every exit path. The guard is `!Send` so the
//! restore always runs on the thread that performed the switch.

use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

use nicctl_common::error::{NicError, Result};

use super::{NetNs, THREAD_SELF_NET_NS};

/// Keeps the calling thread inside a network namespace until dropped.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
    target: u64,
    _not_send: PhantomData<*const ()>,
}

impl NetnsGuard {
    /// Switches the calling thread into `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current namespace cannot be recorded or
    /// `setns(2)` into `target` fails. The thread's namespace is unchanged
    /// on error.
    pub fn enter(target: &NetNs) -> Result<Self> {
        let original = File::open(THREAD_SELF_NET_NS).map_err(|e| NicError::Io {
            path: Path::new(THREAD_SELF_NET_NS).to_path_buf(),
            source: e,
        })?;
        set_thread_netns(target)?;
        tracing::trace!(ns = %target, "entered network namespace");
        Ok(Self {
            original,
            target: target.inode(),
            _not_send: PhantomData,
        })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = set_thread_netns(&self.original) {
            tracing::error!(
                error = %e,
                from = self.target,
                "failed to restore original network namespace"
            );
        } else {
            tracing::trace!(from = self.target, "restored original network namespace");
        }
    }
}

#[cfg(target_os = "linux")]
fn set_thread_netns(fd: impl std::os::fd::AsFd) -> Result<()> {
    use nix::sched::{CloneFlags, setns};

    setns(fd, CloneFlags::CLONE_NEWNET).map_err(|e| NicError::Namespace {
        message: format!("setns NET failed: {e}"),
    })
}

#[cfg(not(target_os = "linux"))]
fn set_thread_netns(_fd: impl std::os::fd::AsFd) -> Result<()> {
    Err(NicError::Config {
        message: "Linux required for network namespace operations".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_a_non_namespace_file_fails_cleanly() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let bogus = NetNs::open(file.path()).unwrap();
        let err = NetnsGuard::enter(&bogus).unwrap_err();
        assert!(matches!(
            err,
            NicError::Namespace { .. } | NicError::Config { .. }
        ));
    }

    /// Unprivileged runners may not call `setns(2)` at all.
    #[cfg(target_os = "linux")]
    fn not_permitted(e: &NicError) -> bool {
        let message = e.to_string();
        message.contains("EPERM") || message.contains("Operation not permitted")
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_guard_restores_thread_namespace() {
        let before = NetNs::current().unwrap();
        match NetnsGuard::enter(&before) {
            Ok(guard) => drop(guard),
            Err(e) if not_permitted(&e) => return,
            Err(e) => panic!("entering own namespace failed: {e}"),
        }
        assert_eq!(NetNs::current().unwrap(), before);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn early_error_return_restores_thread_namespace() {
        fn abort_inside(ns: &NetNs) -> Result<()> {
            let _guard = NetnsGuard::enter(ns)?;
            Err(NicError::Worker {
                message: "aborted inside namespace".into(),
            })
        }

        let before = NetNs::current().unwrap();
        match abort_inside(&before) {
            Err(NicError::Worker { .. }) => {}
            Err(e) if not_permitted(&e) => return,
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(NetNs::current().unwrap(), before);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_enter_leaves_thread_namespace_untouched() {
        let before = NetNs::current().unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        let bogus = NetNs::open(file.path()).unwrap();
        let _ = NetnsGuard::enter(&bogus);
        assert_eq!(NetNs::current().unwrap(), before);
    }
}
