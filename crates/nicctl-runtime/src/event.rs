//! Workload lifecycle notifications.
//!
//! Events arrive as newline-delimited JSON records, one per notification,
//! from whatever watches the cluster on the controller's behalf.

use std::collections::BTreeMap;
use std::io::BufRead;

use nicctl_common::error::{NicError, Result};
use nicctl_common::types::{WorkloadId, WorkloadPhase};
use serde::{Deserialize, Serialize};

/// What happened to the workload object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The workload was created or first observed.
    Added,
    /// The workload changed.
    Updated,
    /// The workload was deleted.
    Deleted,
}

/// Runtime status of one container in a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Runtime-qualified container ID, e.g. `containerd://4f2a...`.
    pub id: String,
    /// Whether the container is currently running.
    #[serde(default)]
    pub running: bool,
    /// Whether this is an init container.
    #[serde(default)]
    pub init: bool,
}

/// One workload lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadEvent {
    /// Kind of change.
    pub kind: EventKind,
    /// Stable workload identity.
    pub uid: WorkloadId,
    /// Cluster namespace of the workload.
    #[serde(default)]
    pub namespace: String,
    /// Workload name.
    #[serde(default)]
    pub name: String,
    /// IP of the host the workload is scheduled on; empty if unscheduled.
    #[serde(default)]
    pub host_ip: String,
    /// Lifecycle phase.
    pub phase: WorkloadPhase,
    /// Workload labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Container statuses, init containers included.
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    /// Version of the object this event carries.
    #[serde(default)]
    pub resource_version: String,
    /// Version of the object before an update, if known.
    #[serde(default)]
    pub previous_resource_version: Option<String>,
}

impl WorkloadEvent {
    /// `namespace/name` of the workload, for logs.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Parses a single JSON event record.
///
/// # Errors
///
/// Returns [`NicError::Serialization`] if the record is malformed.
pub fn parse_event(line: &str) -> Result<WorkloadEvent> {
    Ok(serde_json::from_str(line)?)
}

/// Reads events from `reader` and passes each to `sink` until the input
/// ends or `sink` returns `false`. Blank and malformed lines are skipped.
/// Returns the number of events delivered.
///
/// # Errors
///
/// Returns an error if reading from `reader` fails.
pub fn read_events<R, F>(reader: R, mut sink: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(WorkloadEvent) -> bool,
{
    let mut delivered = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| NicError::Io {
            path: "<event feed>".into(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event(&line) {
            Ok(event) => {
                delivered += 1;
                if !sink(event) {
                    break;
                }
            }
            Err(e) => tracing::warn!(line = lineno + 1, error = %e, "skipping malformed event"),
        }
    }
    Ok(delivered)
}
