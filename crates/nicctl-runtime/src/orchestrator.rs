//! Workload event handling.
//!
//! Filters events down to the workloads this host serves and turns each
//! remaining one into a bind or unbind on the [`BindingTable`].

use std::fmt;
use std::sync::Arc;

use nicctl_common::config::ControllerConfig;
use nicctl_common::types::WorkloadPhase;

use crate::bindings::{BindError, BindOutcome, BindingTable, UnbindOutcome};
use crate::event::{EventKind, WorkloadEvent};
use crate::resolver::{NamespaceResolver, Resolution};

/// Why an event was not acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The workload has not been placed on a host yet.
    Unscheduled,
    /// The workload runs on another host.
    OtherHost(String),
    /// An update that did not change the object.
    UnchangedVersion,
    /// The workload does not carry the selector label.
    NotSelected,
    /// The workload's namespace cannot be located yet.
    NotReady(String),
    /// Looking up the workload's namespace failed.
    ResolveFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unscheduled => write!(f, "not scheduled yet"),
            Self::OtherHost(host) => write!(f, "runs on host {host}"),
            Self::UnchangedVersion => write!(f, "resource version unchanged"),
            Self::NotSelected => write!(f, "selector label missing"),
            Self::NotReady(why) => write!(f, "not ready: {why}"),
            Self::ResolveFailed(why) => write!(f, "namespace lookup failed: {why}"),
        }
    }
}

/// What handling an event amounted to.
#[derive(Debug)]
pub enum Disposition {
    /// The event was filtered out.
    Skipped(SkipReason),
    /// A bind was performed or found already in place.
    Bound(BindOutcome),
    /// An unbind was performed or found unnecessary.
    Unbound(UnbindOutcome),
    /// The bind or unbind failed.
    Failed(BindError),
}

/// Routes workload events to the binding table.
pub struct Orchestrator {
    node_ip: String,
    selector: Option<(String, String)>,
    table: Arc<BindingTable>,
    resolver: Box<dyn NamespaceResolver>,
}

impl Orchestrator {
    /// Creates an orchestrator serving workloads scheduled on `config.node_ip`.
    #[must_use]
    pub fn new(
        config: &ControllerConfig,
        table: Arc<BindingTable>,
        resolver: Box<dyn NamespaceResolver>,
    ) -> Self {
        Self {
            node_ip: config.node_ip.clone(),
            selector: config.selector.clone(),
            table,
            resolver,
        }
    }

    /// The binding table events are applied to.
    #[must_use]
    pub const fn table(&self) -> &Arc<BindingTable> {
        &self.table
    }

    /// Handles one event to completion.
    pub fn handle(&self, event: &WorkloadEvent) -> Disposition {
        if let Some(reason) = self.filter(event) {
            tracing::debug!(
                workload = %event.uid,
                name = %event.display_name(),
                kind = ?event.kind,
                %reason,
                "event skipped"
            );
            return Disposition::Skipped(reason);
        }

        if wants_link(event) {
            self.bind(event)
        } else {
            tracing::debug!(workload = %event.uid, phase = %event.phase, "workload leaving");
            match self.table.unbind(&event.uid) {
                Ok(outcome) => Disposition::Unbound(outcome),
                Err(e) => {
                    tracing::error!(workload = %event.uid, error = %e, "unbind failed");
                    Disposition::Failed(e)
                }
            }
        }
    }

    fn filter(&self, event: &WorkloadEvent) -> Option<SkipReason> {
        if event.host_ip.is_empty() {
            return Some(SkipReason::Unscheduled);
        }
        if event.host_ip != self.node_ip {
            return Some(SkipReason::OtherHost(event.host_ip.clone()));
        }
        if event.kind == EventKind::Updated
            && event.previous_resource_version.as_deref() == Some(event.resource_version.as_str())
        {
            return Some(SkipReason::UnchangedVersion);
        }
        if let Some((key, value)) = &self.selector {
            if event.labels.get(key) != Some(value) {
                return Some(SkipReason::NotSelected);
            }
        }
        None
    }

    fn bind(&self, event: &WorkloadEvent) -> Disposition {
        // Already bound workloads short-circuit without touching /proc.
        match self.table.binding(&event.uid) {
            Ok(Some(binding)) => {
                return Disposition::Bound(BindOutcome::AlreadyBound(binding.link));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(workload = %event.uid, error = %e, "binding lookup failed");
                return Disposition::Failed(e);
            }
        }
        let ns = match self.resolver.resolve(event) {
            Ok(Resolution::Ready(ns)) => ns,
            Ok(Resolution::NotReady(why)) => {
                tracing::debug!(workload = %event.uid, %why, "workload namespace not ready");
                return Disposition::Skipped(SkipReason::NotReady(why));
            }
            Err(e) => {
                tracing::error!(workload = %event.uid, error = %e, "failed to resolve workload namespace");
                return Disposition::Skipped(SkipReason::ResolveFailed(e.to_string()));
            }
        };
        match self.table.bind(&event.uid, &ns) {
            Ok(outcome) => Disposition::Bound(outcome),
            Err(e) => {
                tracing::error!(
                    workload = %event.uid,
                    name = %event.display_name(),
                    error = %e,
                    "bind failed"
                );
                Disposition::Failed(e)
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("node_ip", &self.node_ip)
            .field("selector", &self.selector)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Whether the event asks for the workload to hold a link.
fn wants_link(event: &WorkloadEvent) -> bool {
    event.kind != EventKind::Deleted
        && matches!(event.phase, WorkloadPhase::Pending | WorkloadPhase::Active)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use nicctl_common::error::{NicError, Result};
    use nicctl_common::types::WorkloadId;
    use nicctl_core::link::memory::MemoryDriver;
    use nicctl_core::link::{Link, LinkDriver};
    use nicctl_core::migrate::MigrationConfig;
    use nicctl_core::namespace::NetNs;
    use tempfile::NamedTempFile;

    use super::*;

    /// Resolves every workload to a fixed namespace, or to nothing.
    struct FixedResolver {
        ns: Option<NetNs>,
        calls: Arc<AtomicUsize>,
    }

    impl NamespaceResolver for FixedResolver {
        fn resolve(&self, _event: &WorkloadEvent) -> Result<Resolution> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ns.clone().map_or_else(
                || Resolution::NotReady("no process".into()),
                Resolution::Ready,
            ))
        }
    }

    struct FailingResolver;

    impl NamespaceResolver for FailingResolver {
        fn resolve(&self, _event: &WorkloadEvent) -> Result<Resolution> {
            Err(NicError::NotFound {
                kind: "cgroup root",
                id: "/sys/fs/cgroup/pids".into(),
            })
        }
    }

    struct Setup {
        _files: [NamedTempFile; 2],
        pod: NetNs,
        driver: Arc<MemoryDriver>,
        table: Arc<BindingTable>,
    }

    fn setup() -> Setup {
        let files = [NamedTempFile::new().unwrap(), NamedTempFile::new().unwrap()];
        let home = NetNs::open(files[0].path()).unwrap();
        let pod = NetNs::open(files[1].path()).unwrap();
        let driver = Arc::new(MemoryDriver::new());
        driver.add_namespace(&home, ["tor_vlan1"]);
        driver.add_namespace(&pod, ["lo"]);
        let table = Arc::new(BindingTable::new(
            vec![Link::new("tor_vlan1", 1)],
            home,
            driver.clone(),
            MigrationConfig {
                poll_interval: Duration::from_millis(2),
                timeout: Duration::from_millis(20),
            },
        ));
        Setup {
            _files: files,
            pod,
            driver,
            table,
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            node_ip: "10.0.0.7".into(),
            ..ControllerConfig::default()
        }
    }

    fn orchestrator(s: &Setup, ns: Option<NetNs>) -> Orchestrator {
        Orchestrator::new(
            &config(),
            s.table.clone(),
            Box::new(FixedResolver {
                ns,
                calls: Arc::default(),
            }),
        )
    }

    fn event(kind: EventKind, phase: WorkloadPhase) -> WorkloadEvent {
        WorkloadEvent {
            kind,
            uid: WorkloadId::new("u-1"),
            namespace: "infra".into(),
            name: "vpp-0".into(),
            host_ip: "10.0.0.7".into(),
            phase,
            labels: BTreeMap::from([("jalapeno.io/infra-app".into(), "vpp-forwarder".into())]),
            containers: Vec::new(),
            resource_version: "2".into(),
            previous_resource_version: None,
        }
    }

    #[test]
    fn active_local_workload_is_bound() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let d = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        assert!(matches!(d, Disposition::Bound(BindOutcome::Bound(_))));
        assert_eq!(s.driver.links_in(&s.pod), ["lo", "tor_vlan1"]);
    }

    #[test]
    fn unscheduled_workload_is_skipped() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let mut e = event(EventKind::Added, WorkloadPhase::Pending);
        e.host_ip.clear();
        assert!(matches!(o.handle(&e), Disposition::Skipped(SkipReason::Unscheduled)));
    }

    #[test]
    fn remote_workload_is_skipped() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let mut e = event(EventKind::Added, WorkloadPhase::Active);
        e.host_ip = "10.0.0.8".into();
        assert!(matches!(o.handle(&e), Disposition::Skipped(SkipReason::OtherHost(_))));
        assert_eq!(s.driver.move_count(), 0);
    }

    #[test]
    fn unchanged_update_is_skipped() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let mut e = event(EventKind::Updated, WorkloadPhase::Active);
        e.previous_resource_version = Some("2".into());
        assert!(matches!(
            o.handle(&e),
            Disposition::Skipped(SkipReason::UnchangedVersion)
        ));
    }

    #[test]
    fn unselected_workload_is_skipped() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let mut e = event(EventKind::Added, WorkloadPhase::Active);
        e.labels.clear();
        assert!(matches!(o.handle(&e), Disposition::Skipped(SkipReason::NotSelected)));
    }

    #[test]
    fn unresolvable_namespace_is_skipped() {
        let s = setup();
        let o = orchestrator(&s, None);
        let d = o.handle(&event(EventKind::Added, WorkloadPhase::Pending));
        assert!(matches!(d, Disposition::Skipped(SkipReason::NotReady(_))));
        assert_eq!(s.table.snapshot().unwrap().available(), 1);
    }

    #[test]
    fn resolver_failure_is_skipped() {
        let s = setup();
        let o = Orchestrator::new(&config(), s.table.clone(), Box::new(FailingResolver));
        let d = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        assert!(matches!(d, Disposition::Skipped(SkipReason::ResolveFailed(_))));
    }

    #[test]
    fn terminating_workload_is_unbound() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let _ = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        let d = o.handle(&event(EventKind::Updated, WorkloadPhase::Terminating));
        assert!(matches!(d, Disposition::Unbound(UnbindOutcome::Released(_))));
        assert_eq!(s.table.snapshot().unwrap().available(), 1);
    }

    #[test]
    fn redelivered_delete_is_harmless() {
        let s = setup();
        let o = orchestrator(&s, Some(s.pod.clone()));
        let _ = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        let first = o.handle(&event(EventKind::Deleted, WorkloadPhase::Active));
        let second = o.handle(&event(EventKind::Deleted, WorkloadPhase::Active));
        assert!(matches!(first, Disposition::Unbound(UnbindOutcome::Released(_))));
        assert!(matches!(second, Disposition::Unbound(UnbindOutcome::NotFound)));
        assert_eq!(s.driver.move_count(), 2);
    }

    #[test]
    fn bound_workload_skips_resolution() {
        let s = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = FixedResolver {
            ns: Some(s.pod.clone()),
            calls: calls.clone(),
        };
        let o = Orchestrator::new(&config(), s.table.clone(), Box::new(resolver));
        let _ = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        let d = o.handle(&event(EventKind::Updated, WorkloadPhase::Active));
        assert!(matches!(d, Disposition::Bound(BindOutcome::AlreadyBound(_))));
        assert_eq!(s.driver.move_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Panics on every move, poisoning the table lock held around it.
    struct PanickingDriver;

    impl LinkDriver for PanickingDriver {
        fn list_links(&self, _ns: &NetNs) -> Result<Vec<Link>> {
            Ok(Vec::new())
        }

        fn move_link(&self, link: &Link, _from: &NetNs, _to: &NetNs) -> Result<()> {
            panic!("move of {link} aborted");
        }

        fn set_link_up(&self, _link: &Link, _ns: &NetNs) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn poisoned_table_fails_before_resolution() {
        let s = setup();
        let table = Arc::new(BindingTable::new(
            vec![Link::new("tor_vlan1", 1)],
            s.pod.clone(),
            Arc::new(PanickingDriver),
            MigrationConfig::default(),
        ));
        let panicked = std::thread::scope(|sc| {
            sc.spawn(|| table.bind(&WorkloadId::new("other"), &s.pod))
                .join()
                .is_err()
        });
        assert!(panicked);

        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = FixedResolver {
            ns: Some(s.pod.clone()),
            calls: calls.clone(),
        };
        let o = Orchestrator::new(&config(), table, Box::new(resolver));
        let d = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        assert!(matches!(d, Disposition::Failed(BindError::LockPoisoned)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bind_failure_is_reported() {
        let s = setup();
        s.driver.fail_moves_of("tor_vlan1");
        let o = orchestrator(&s, Some(s.pod.clone()));
        let d = o.handle(&event(EventKind::Added, WorkloadPhase::Active));
        assert!(matches!(d, Disposition::Failed(BindError::Migration { .. })));
    }
}
