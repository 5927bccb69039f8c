//! Workload to network namespace resolution.
//!
//! A workload's namespace is found by locating the process of one of its
//! running containers in the cgroup pids hierarchy and opening
//! `/proc/<pid>/ns/net`.

use std::fs;
use std::path::{Path, PathBuf};

use nicctl_common::constants::{CGROUP_PROCS, CONTAINER_ID_PREFIX_LEN};
use nicctl_common::error::{NicError, Result};
use nicctl_common::types::WorkloadPhase;
use nicctl_core::namespace::NetNs;

use crate::event::WorkloadEvent;

/// Result of resolving a workload's namespace.
#[derive(Debug)]
pub enum Resolution {
    /// The workload's namespace.
    Ready(NetNs),
    /// The workload has no running process yet; a later event will retry.
    NotReady(String),
}

/// Finds the network namespace of a workload.
pub trait NamespaceResolver: Send + Sync {
    /// Resolves the namespace of the workload described by `event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails, as opposed to the
    /// workload simply not being ready.
    fn resolve(&self, event: &WorkloadEvent) -> Result<Resolution>;
}

/// Resolver walking a cgroup v1 pids hierarchy.
#[derive(Debug, Clone)]
pub struct CgroupResolver {
    root: PathBuf,
}

impl CgroupResolver {
    /// Creates a resolver rooted at `root`, e.g. `/sys/fs/cgroup/pids`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl NamespaceResolver for CgroupResolver {
    fn resolve(&self, event: &WorkloadEvent) -> Result<Resolution> {
        let Some(id) = container_id(event) else {
            return Ok(Resolution::NotReady(format!(
                "no container of {} is running yet",
                event.display_name()
            )));
        };
        tracing::debug!(workload = %event.uid, container = id, "resolving container pid");
        let Some(pid) = find_container_pid(&self.root, id)? else {
            return Ok(Resolution::NotReady(format!("no process found for container {id}")));
        };
        let ns = NetNs::from_pid(pid)?;
        tracing::debug!(workload = %event.uid, pid, ns = %ns, "workload namespace resolved");
        Ok(Resolution::Ready(ns))
    }
}

/// Short container ID of the container whose namespace stands for the
/// workload: the first regular container once active, or a running init
/// container while pending.
#[must_use]
pub fn container_id(event: &WorkloadEvent) -> Option<&str> {
    let status = match event.phase {
        WorkloadPhase::Active => event.containers.iter().find(|c| !c.init),
        WorkloadPhase::Pending => event.containers.iter().find(|c| c.init && c.running),
        WorkloadPhase::Terminating | WorkloadPhase::Removed => None,
    }?;
    let (_, raw) = status.id.split_once("://")?;
    if raw.is_empty() {
        return None;
    }
    Some(raw.get(..CONTAINER_ID_PREFIX_LEN).unwrap_or(raw))
}

/// Depth-first search under `dir` for a cgroup directory whose name
/// contains `container_id`; returns the first PID listed in its
/// `cgroup.procs`.
///
/// # Errors
///
/// Returns an error if a directory cannot be read or the PID is malformed.
pub fn find_container_pid(dir: &Path, container_id: &str) -> Result<Option<u32>> {
    let entries = fs::read_dir(dir).map_err(|e| NicError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| NicError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();

    for sub in subdirs {
        let matches = sub
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(container_id));
        if matches {
            return first_pid(&sub);
        }
        if let Some(pid) = find_container_pid(&sub, container_id)? {
            return Ok(Some(pid));
        }
    }
    Ok(None)
}

fn first_pid(cgroup: &Path) -> Result<Option<u32>> {
    let path = cgroup.join(CGROUP_PROCS);
    let content = fs::read_to_string(&path).map_err(|e| NicError::Io {
        path: path.clone(),
        source: e,
    })?;
    let Some(line) = content.lines().next().map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    line.parse().map(Some).map_err(|_| NicError::Config {
        message: format!("invalid pid {line:?} in {}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use nicctl_common::types::WorkloadId;

    use super::*;
    use crate::event::{ContainerStatus, EventKind};

    fn event(phase: WorkloadPhase, containers: Vec<ContainerStatus>) -> WorkloadEvent {
        WorkloadEvent {
            kind: EventKind::Updated,
            uid: WorkloadId::new("u-1"),
            namespace: "infra".into(),
            name: "vpp-0".into(),
            host_ip: "10.0.0.7".into(),
            phase,
            labels: std::collections::BTreeMap::new(),
            containers,
            resource_version: "1".into(),
            previous_resource_version: None,
        }
    }

    fn container(id: &str, running: bool, init: bool) -> ContainerStatus {
        ContainerStatus {
            id: id.into(),
            running,
            init,
        }
    }

    fn cgroup(root: &Path, rel: &str, procs: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CGROUP_PROCS), procs).unwrap();
    }

    #[test]
    fn active_workload_uses_first_regular_container() {
        let e = event(
            WorkloadPhase::Active,
            vec![
                container("containerd://aaaaaaaaaaaaaaaa", false, true),
                container("docker://0123456789abcdef0123", true, false),
            ],
        );
        assert_eq!(container_id(&e), Some("0123456789ab"));
    }

    #[test]
    fn pending_workload_uses_running_init_container() {
        let e = event(
            WorkloadPhase::Pending,
            vec![
                container("containerd://1111111111111111", false, true),
                container("containerd://2222222222222222", true, true),
            ],
        );
        assert_eq!(container_id(&e), Some("222222222222"));
    }

    #[test]
    fn pending_without_running_init_is_not_ready() {
        let e = event(
            WorkloadPhase::Pending,
            vec![container("containerd://1111111111111111", false, true)],
        );
        assert_eq!(container_id(&e), None);
    }

    #[test]
    fn id_without_runtime_scheme_is_rejected() {
        let e = event(WorkloadPhase::Active, vec![container("0123456789abcdef", true, false)]);
        assert_eq!(container_id(&e), None);
    }

    #[test]
    fn short_ids_are_kept_whole() {
        let e = event(WorkloadPhase::Active, vec![container("cri-o://abc", true, false)]);
        assert_eq!(container_id(&e), Some("abc"));
    }

    #[test]
    fn finds_pid_in_nested_cgroup() {
        let root = tempfile::tempdir().unwrap();
        cgroup(root.path(), "kubepods/besteffort/pod-x/other", "77\n");
        cgroup(
            root.path(),
            "kubepods/besteffort/pod-x/docker-0123456789ab.scope",
            "4242\n4243\n",
        );

        let pid = find_container_pid(root.path(), "0123456789ab").unwrap();
        assert_eq!(pid, Some(4242));
    }

    #[test]
    fn missing_container_yields_none() {
        let root = tempfile::tempdir().unwrap();
        cgroup(root.path(), "kubepods/pod-x/ffffffffffff", "1\n");
        assert_eq!(find_container_pid(root.path(), "0123456789ab").unwrap(), None);
    }

    #[test]
    fn empty_procs_file_is_not_ready() {
        let root = tempfile::tempdir().unwrap();
        cgroup(root.path(), "kubepods/0123456789ab", "");
        assert_eq!(find_container_pid(root.path(), "0123456789ab").unwrap(), None);
    }

    #[test]
    fn malformed_pid_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        cgroup(root.path(), "kubepods/0123456789ab", "abc\n");
        assert!(find_container_pid(root.path(), "0123456789ab").is_err());
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let err = find_container_pid(Path::new("/nonexistent/cgroup"), "x").unwrap_err();
        assert!(matches!(err, NicError::Io { .. }));
    }

    #[test]
    fn resolver_reports_not_ready_without_container() {
        let root = tempfile::tempdir().unwrap();
        let resolver = CgroupResolver::new(root.path());
        let e = event(WorkloadPhase::Pending, vec![]);
        assert!(matches!(resolver.resolve(&e).unwrap(), Resolution::NotReady(_)));
    }

    #[test]
    fn resolver_reports_not_ready_without_process() {
        let root = tempfile::tempdir().unwrap();
        let resolver = CgroupResolver::new(root.path());
        let e = event(
            WorkloadPhase::Active,
            vec![container("containerd://0123456789abcdef", true, false)],
        );
        assert!(matches!(resolver.resolve(&e).unwrap(), Resolution::NotReady(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resolver_opens_namespace_of_found_process() {
        let root = tempfile::tempdir().unwrap();
        cgroup(root.path(), "kubepods/0123456789ab", &format!("{}\n", std::process::id()));
        let resolver = CgroupResolver::new(root.path());
        let e = event(
            WorkloadPhase::Active,
            vec![container("containerd://0123456789abcdef", true, false)],
        );
        match resolver.resolve(&e).unwrap() {
            Resolution::Ready(ns) => assert_eq!(ns, NetNs::from_pid(std::process::id()).unwrap()),
            Resolution::NotReady(why) => panic!("unexpected not-ready: {why}"),
        }
    }
}
