//! Workload-to-link bindings.
//!
//! [`BindingTable`] is the only holder of mutable controller state. The
//! link pool and the binding map live behind a single mutex that is held
//! for the whole allocate-and-migrate (or migrate-and-release) sequence, so
//! two workloads can never race for the same link.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use nicctl_common::types::WorkloadId;
use nicctl_core::link::{Link, LinkDriver};
use nicctl_core::migrate::{self, Direction, MigrationConfig, MigrationError};
use nicctl_core::namespace::NetNs;
use serde::Serialize;
use thiserror::Error;

use crate::pool::{LinkPool, LinkState};

/// A link granted to a workload and the namespace it was moved into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Namespace of the workload.
    pub namespace: NetNs,
    /// Link resident in that namespace.
    pub link: Link,
}

/// Successful result of [`BindingTable::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// A link was migrated into the workload namespace.
    Bound(Link),
    /// The workload already held this link; nothing was done.
    AlreadyBound(Link),
}

/// Successful result of [`BindingTable::unbind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbindOutcome {
    /// The link was returned home and is available again.
    Released(Link),
    /// The workload held no link; nothing was done.
    NotFound,
}

/// Failures of bind and unbind.
#[derive(Debug, Error)]
pub enum BindError {
    /// The pool is exhausted.
    #[error("no link available for workload {workload}")]
    NoLinkAvailable {
        /// Workload left without a link.
        workload: WorkloadId,
    },

    /// Moving the link failed.
    #[error("link migration for workload {workload} failed: {source}")]
    Migration {
        /// Workload whose event failed.
        workload: WorkloadId,
        /// Protocol step that failed.
        source: MigrationError,
    },

    /// A previous holder of the table lock panicked.
    #[error("binding table lock poisoned")]
    LockPoisoned,
}

#[derive(Debug)]
struct TableState {
    pool: LinkPool,
    bindings: BTreeMap<WorkloadId, Binding>,
}

/// Point-in-time view of the pool and bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSnapshot {
    /// Each link name with its state.
    pub links: Vec<(String, LinkState)>,
    /// Each bound workload with its link name and namespace inode.
    pub bindings: Vec<BindingView>,
}

/// One row of [`TableSnapshot::bindings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingView {
    /// Bound workload.
    pub workload: WorkloadId,
    /// Name of the link it holds.
    pub link: String,
    /// Inode of the workload namespace.
    pub namespace: u64,
}

impl TableSnapshot {
    /// Number of links in the `Available` state.
    #[must_use]
    pub fn available(&self) -> usize {
        self.links
            .iter()
            .filter(|(_, s)| *s == LinkState::Available)
            .count()
    }
}

/// Binds workloads to pooled links and moves the links accordingly.
pub struct BindingTable {
    state: Mutex<TableState>,
    home: NetNs,
    driver: Arc<dyn LinkDriver>,
    migration: MigrationConfig,
}

impl BindingTable {
    /// Builds the table from the links discovered in `home`.
    #[must_use]
    pub fn new(
        links: Vec<Link>,
        home: NetNs,
        driver: Arc<dyn LinkDriver>,
        migration: MigrationConfig,
    ) -> Self {
        let pool = LinkPool::new(links);
        tracing::info!(links = pool.len(), home = %home, "binding table initialised");
        Self {
            state: Mutex::new(TableState {
                pool,
                bindings: BTreeMap::new(),
            }),
            home,
            driver,
            migration,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TableState>, BindError> {
        self.state.lock().map_err(|_| BindError::LockPoisoned)
    }

    /// Grants `workload` a link moved into `namespace`.
    ///
    /// A workload that is already bound keeps its link and no migration is
    /// attempted, whatever `namespace` is passed.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NoLinkAvailable`] when the pool is exhausted and
    /// [`BindError::Migration`] when the link could not be moved. In both
    /// cases no binding is recorded and the pool's available count is the
    /// same as before the call.
    pub fn bind(&self, workload: &WorkloadId, namespace: &NetNs) -> Result<BindOutcome, BindError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.bindings.get(workload) {
            tracing::debug!(workload = %workload, link = %existing.link, "workload already bound");
            return Ok(BindOutcome::AlreadyBound(existing.link.clone()));
        }

        let Ok(link) = state.pool.allocate() else {
            tracing::error!(workload = %workload, "no available link for workload");
            return Err(BindError::NoLinkAvailable {
                workload: workload.clone(),
            });
        };

        match migrate::migrate(
            self.driver.as_ref(),
            &link,
            &self.home,
            namespace,
            Direction::Attach,
            &self.migration,
        ) {
            Ok(report) => {
                tracing::info!(
                    workload = %workload,
                    link = %link,
                    ns = %namespace,
                    probes = report.probes,
                    "link bound to workload"
                );
                let _ = state.bindings.insert(
                    workload.clone(),
                    Binding {
                        namespace: namespace.clone(),
                        link: link.clone(),
                    },
                );
                Ok(BindOutcome::Bound(link))
            }
            Err(e) => {
                if !matches!(e, MigrationError::NamespaceAssignFailed { .. }) {
                    tracing::warn!(
                        workload = %workload,
                        link = %link,
                        ns = %namespace,
                        "link returned to pool but may still reside outside the home namespace"
                    );
                }
                let _ = state.pool.release_to_back(&link);
                Err(BindError::Migration {
                    workload: workload.clone(),
                    source: e,
                })
            }
        }
    }

    /// Returns the link held by `workload` to the home namespace.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::Migration`] when the link could not be moved
    /// home. The binding is kept and the link stays allocated, so a link
    /// that may still sit in a workload namespace is never handed out.
    pub fn unbind(&self, workload: &WorkloadId) -> Result<UnbindOutcome, BindError> {
        let mut state = self.lock()?;
        let Some(binding) = state.bindings.get(workload).cloned() else {
            tracing::debug!(workload = %workload, "workload holds no link");
            return Ok(UnbindOutcome::NotFound);
        };

        let report = migrate::migrate(
            self.driver.as_ref(),
            &binding.link,
            &binding.namespace,
            &self.home,
            Direction::Detach,
            &self.migration,
        )
        .map_err(|e| {
            tracing::error!(
                workload = %workload,
                link = %binding.link,
                ns = %binding.namespace,
                "link could not be returned; keeping it allocated"
            );
            BindError::Migration {
                workload: workload.clone(),
                source: e,
            }
        })?;

        let _ = state.pool.release(&binding.link);
        let _ = state.bindings.remove(workload);
        tracing::info!(
            workload = %workload,
            link = %binding.link,
            probes = report.probes,
            "link released from workload"
        );
        Ok(UnbindOutcome::Released(binding.link))
    }

    /// Binding currently held by `workload`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::LockPoisoned`] if the table lock is poisoned.
    pub fn binding(&self, workload: &WorkloadId) -> Result<Option<Binding>, BindError> {
        Ok(self.lock()?.bindings.get(workload).cloned())
    }

    /// Copies out the pool and binding state.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::LockPoisoned`] if the table lock is poisoned.
    pub fn snapshot(&self) -> Result<TableSnapshot, BindError> {
        let state = self.lock()?;
        Ok(TableSnapshot {
            links: state
                .pool
                .iter()
                .map(|(l, s)| (l.name().to_owned(), s))
                .collect(),
            bindings: state
                .bindings
                .iter()
                .map(|(w, b)| BindingView {
                    workload: w.clone(),
                    link: b.link.name().to_owned(),
                    namespace: b.namespace.inode(),
                })
                .collect(),
        })
    }

    /// The controller's own namespace.
    #[must_use]
    pub const fn home(&self) -> &NetNs {
        &self.home
    }
}

impl std::fmt::Debug for BindingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingTable")
            .field("home", &self.home)
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}
