//! Link migration between network namespaces.
//!
//! A migration moves one link out of a source namespace, waits for the
//! kernel to make it visible in the destination, and sets it up there:
//!
//! ```text
//! Initiated -> Moved -> Verifying -> Confirmed
//!        \________\__________\______> Failed
//! ```
//!
//! The protocol holds no state between calls and never retries. Once the
//! reassignment has been issued the kernel owns the outcome; a failure
//! after that point leaves the link wherever the kernel put it.

use std::fmt;
use std::time::{Duration, Instant};

use nicctl_common::constants;
use nicctl_common::error::NicError;
use thiserror::Error;

use crate::link::{Link, LinkDriver};
use crate::namespace::NetNs;

/// Timing parameters for the appearance poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Delay between two probes of the destination namespace.
    pub poll_interval: Duration,
    /// Total time the link is given to appear in the destination.
    pub timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(constants::DEFAULT_LINK_TIMEOUT_SECS),
        }
    }
}

/// Which way a link travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the controller's namespace into a workload namespace.
    Attach,
    /// From a workload namespace back to the controller's namespace.
    Detach,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
        }
    }
}

/// Progress of a single migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Nothing has been sent to the kernel yet.
    Initiated,
    /// The namespace reassignment was accepted.
    Moved,
    /// Waiting for the link to show up in the destination.
    Verifying,
    /// The link is visible and up in the destination.
    Confirmed,
    /// The protocol stopped on an error.
    Failed,
}

/// Failures of the migration protocol. None of them are retried here.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The link was not where the caller believed it to be.
    #[error("link {link} is missing from source namespace {ns}")]
    LinkMissingFromSource {
        /// Name of the missing link.
        link: String,
        /// Namespace that was expected to hold it.
        ns: String,
    },

    /// The source namespace could not be inspected before moving.
    #[error("cannot inspect source namespace {ns} for link {link}: {source}")]
    SourceInspectionFailed {
        /// Name of the link being migrated.
        link: String,
        /// Namespace that could not be listed.
        ns: String,
        /// Underlying driver error.
        source: NicError,
    },

    /// The kernel rejected the namespace reassignment.
    #[error("failed to assign link {link} to namespace {ns}: {source}")]
    NamespaceAssignFailed {
        /// Name of the link being migrated.
        link: String,
        /// Destination namespace.
        ns: String,
        /// Underlying driver error.
        source: NicError,
    },

    /// The link never became visible in the destination.
    #[error("link {link} did not appear in namespace {ns} within {timeout:?}")]
    LinkAppearanceTimeout {
        /// Name of the link being migrated.
        link: String,
        /// Destination namespace.
        ns: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The link appeared but could not be set up.
    #[error("failed to bring link {link} up in namespace {ns}: {source}")]
    LinkActivationFailed {
        /// Name of the link being migrated.
        link: String,
        /// Destination namespace.
        ns: String,
        /// Underlying driver error.
        source: NicError,
    },
}

/// Outcome of a confirmed migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Number of destination probes performed.
    pub probes: u32,
    /// Wall time from reassignment to confirmation.
    pub elapsed: Duration,
}

/// Moves `link` from `from` to `to` and waits until it is up there.
///
/// On [`Direction::Detach`] the link's presence in `from` is checked first:
/// the workload namespace may have been torn down under it.
///
/// # Errors
///
/// Returns the [`MigrationError`] of the step that failed.
pub fn migrate(
    driver: &dyn LinkDriver,
    link: &Link,
    from: &NetNs,
    to: &NetNs,
    direction: Direction,
    config: &MigrationConfig,
) -> Result<MigrationReport, MigrationError> {
    let mut state = MigrationState::Initiated;
    tracing::debug!(link = %link, from = %from, to = %to, %direction, ?state, "migration started");

    let result = run(driver, link, from, to, direction, config, &mut state);
    match &result {
        Ok(report) => tracing::debug!(
            link = %link,
            %direction,
            probes = report.probes,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "migration confirmed"
        ),
        Err(e) => tracing::error!(
            link = %link,
            from = %from,
            to = %to,
            %direction,
            reached = ?state,
            error = %e,
            "migration failed"
        ),
    }
    result
}

fn run(
    driver: &dyn LinkDriver,
    link: &Link,
    from: &NetNs,
    to: &NetNs,
    direction: Direction,
    config: &MigrationConfig,
    state: &mut MigrationState,
) -> Result<MigrationReport, MigrationError> {
    if direction == Direction::Detach {
        check_present(driver, link, from).inspect_err(|_| *state = MigrationState::Failed)?;
    }

    if let Err(e) = driver.move_link(link, from, to) {
        *state = MigrationState::Failed;
        return Err(MigrationError::NamespaceAssignFailed {
            link: link.name().to_owned(),
            ns: to.to_string(),
            source: e,
        });
    }
    *state = MigrationState::Moved;
    let moved_at = Instant::now();

    *state = MigrationState::Verifying;
    let probes = wait_for_link(driver, link, to, config).inspect_err(|_| *state = MigrationState::Failed)?;

    if let Err(e) = driver.set_link_up(link, to) {
        *state = MigrationState::Failed;
        return Err(MigrationError::LinkActivationFailed {
            link: link.name().to_owned(),
            ns: to.to_string(),
            source: e,
        });
    }
    *state = MigrationState::Confirmed;

    Ok(MigrationReport {
        probes,
        elapsed: moved_at.elapsed(),
    })
}

fn check_present(driver: &dyn LinkDriver, link: &Link, ns: &NetNs) -> Result<(), MigrationError> {
    let links = driver
        .list_links(ns)
        .map_err(|e| MigrationError::SourceInspectionFailed {
            link: link.name().to_owned(),
            ns: ns.to_string(),
            source: e,
        })?;
    if links.contains(link) {
        Ok(())
    } else {
        Err(MigrationError::LinkMissingFromSource {
            link: link.name().to_owned(),
            ns: ns.to_string(),
        })
    }
}

/// Probes `ns` until `link` is listed or the timeout elapses. Returns the
/// number of probes made.
fn wait_for_link(
    driver: &dyn LinkDriver,
    link: &Link,
    ns: &NetNs,
    config: &MigrationConfig,
) -> Result<u32, MigrationError> {
    let started = Instant::now();
    let mut probes = 0_u32;
    loop {
        probes += 1;
        match driver.list_links(ns) {
            Ok(links) if links.contains(link) => return Ok(probes),
            Ok(_) => tracing::trace!(link = %link, ns = %ns, probes, "link not visible yet"),
            Err(e) => tracing::debug!(link = %link, ns = %ns, error = %e, "probe failed"),
        }
        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            return Err(MigrationError::LinkAppearanceTimeout {
                link: link.name().to_owned(),
                ns: ns.to_string(),
                timeout: config.timeout,
            });
        }
        std::thread::sleep(config.poll_interval.min(config.timeout - elapsed));
    }
}
