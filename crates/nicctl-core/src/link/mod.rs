//! Host links and the kernel capability set used to manipulate them.
//!
//! Links are identified by interface name. The kernel may hand a link a
//! different index after it changes namespace, so the index recorded at
//! discovery is informational only.

pub mod memory;
#[cfg(target_os = "linux")]
pub mod netlink;

use std::fmt;
use std::hash::{Hash, Hasher};

use nicctl_common::error::Result;

use crate::namespace::NetNs;

/// A host network interface eligible for assignment to a workload.
#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    index: u32,
}

impl Link {
    /// Creates a link from its interface name and discovery-time index.
    #[must_use]
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    /// Interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface index observed when the link was discovered.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Kernel operations on links inside network namespaces.
///
/// Implementors must leave the calling thread in the namespace it started
/// in when any method returns, whether it succeeded or not.
pub trait LinkDriver: Send + Sync {
    /// Lists every link visible in `ns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be entered or queried.
    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>>;

    /// Reassigns `link`, currently resident in `from`, to namespace `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is not found in `from` or the kernel
    /// rejects the reassignment.
    fn move_link(&self, link: &Link, from: &NetNs, to: &NetNs) -> Result<()>;

    /// Sets `link` administratively up inside `ns`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is not found in `ns` or the kernel
    /// rejects the request.
    fn set_link_up(&self, link: &Link, ns: &NetNs) -> Result<()>;
}

/// Lists the links in `ns` whose name starts with `prefix`.
///
/// # Errors
///
/// Returns an error if the driver cannot list links in `ns`.
pub fn discover_links(driver: &dyn LinkDriver, ns: &NetNs, prefix: &str) -> Result<Vec<Link>> {
    let links: Vec<Link> = driver
        .list_links(ns)?
        .into_iter()
        .filter(|l| l.name().starts_with(prefix))
        .collect();
    if links.is_empty() {
        tracing::warn!(prefix, ns = %ns, "no network interfaces with prefix found");
    } else {
        tracing::info!(prefix, count = links.len(), "discovered host links");
    }
    Ok(links)
}
