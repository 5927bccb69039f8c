//! Fixed pool of host links.
//!
//! The pool is populated once at startup and never grows or shrinks. It is
//! not synchronized on its own: the binding table keeps it behind the same
//! lock as the bindings so allocation and binding happen as one step.

use std::fmt;

use nicctl_core::link::Link;
use serde::Serialize;

/// Allocation state of a pooled link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Resident in the controller's namespace and free to hand out.
    Available,
    /// Granted to a workload.
    Allocated,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Allocated => write!(f, "allocated"),
        }
    }
}

/// Every link in the pool is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no available link found")]
pub struct NoLinkAvailable;

/// Registry of the host links and their allocation state.
#[derive(Debug, Default)]
pub struct LinkPool {
    entries: Vec<(Link, LinkState)>,
}

impl LinkPool {
    /// Creates a pool with every link `Available`. Duplicate names are
    /// collapsed into one entry.
    #[must_use]
    pub fn new(links: impl IntoIterator<Item = Link>) -> Self {
        let mut entries: Vec<(Link, LinkState)> = Vec::new();
        for link in links {
            if entries.iter().any(|(l, _)| *l == link) {
                tracing::warn!(link = %link, "duplicate link ignored");
                continue;
            }
            entries.push((link, LinkState::Available));
        }
        Self { entries }
    }

    /// Marks the first available link allocated and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`NoLinkAvailable`] when every link is allocated.
    pub fn allocate(&mut self) -> Result<Link, NoLinkAvailable> {
        let (link, state) = self
            .entries
            .iter_mut()
            .find(|(_, s)| *s == LinkState::Available)
            .ok_or(NoLinkAvailable)?;
        *state = LinkState::Allocated;
        tracing::debug!(link = %link, "link allocated");
        Ok(link.clone())
    }

    /// Marks `link` available again. Returns whether the state changed.
    ///
    /// Releasing a link that is unknown or already available is a caller
    /// bug; it is logged and leaves the pool untouched.
    pub fn release(&mut self, link: &Link) -> bool {
        match self.entries.iter_mut().find(|(l, _)| l == link) {
            Some((_, state @ LinkState::Allocated)) => {
                *state = LinkState::Available;
                tracing::debug!(link = %link, "link released");
                true
            }
            Some((_, LinkState::Available)) => {
                tracing::error!(link = %link, "release of a link that is already available");
                false
            }
            None => {
                tracing::error!(link = %link, "release of a link that is not in the pool");
                false
            }
        }
    }

    /// Like [`release`](Self::release), but also moves `link` behind every
    /// other entry. Later allocations then prefer links that did not just
    /// fail a migration.
    pub fn release_to_back(&mut self, link: &Link) -> bool {
        if !self.release(link) {
            return false;
        }
        if let Some(pos) = self.entries.iter().position(|(l, _)| l == link) {
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        }
        true
    }

    /// State of `link`, or `None` if it is not pooled.
    #[must_use]
    pub fn state_of(&self, link: &Link) -> Option<LinkState> {
        self.entries.iter().find(|(l, _)| l == link).map(|(_, s)| *s)
    }

    /// Number of links currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, s)| *s == LinkState::Available)
            .count()
    }

    /// Total number of pooled links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no links at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every link and its state.
    pub fn iter(&self) -> impl Iterator<Item = (&Link, LinkState)> {
        self.entries.iter().map(|(l, s)| (l, *s))
    }
}
