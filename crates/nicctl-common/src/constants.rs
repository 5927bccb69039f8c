//! System-wide constants and defaults.

/// Default name prefix of the host links handed out to workloads.
pub const DEFAULT_INTERFACE_PREFIX: &str = "tor_vlan";

/// Kernel limit on interface name length (`IFNAMSIZ - 1`).
pub const INTERFACE_NAME_MAX_LENGTH: usize = 15;

/// Interval between link-appearance probes while migrating, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Ceiling on how long a migrated link may take to appear, in seconds.
pub const DEFAULT_LINK_TIMEOUT_SECS: u64 = 30;

/// Root of the cgroup pids hierarchy walked to find container processes.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/pids";

/// Per-cgroup file listing member process IDs.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// Number of leading container ID characters used in cgroup directory names.
pub const CONTAINER_ID_PREFIX_LEN: usize = 12;

/// Label key selecting the workloads this controller serves.
pub const DEFAULT_SELECTOR_KEY: &str = "jalapeno.io/infra-app";

/// Label value selecting the workloads this controller serves.
pub const DEFAULT_SELECTOR_VALUE: &str = "vpp-forwarder";
