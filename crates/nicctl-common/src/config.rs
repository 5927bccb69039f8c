//! Controller configuration model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{NicError, Result};

/// Root configuration for the controller process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name prefix identifying the host links in the pool.
    pub interface_prefix: String,
    /// Host IP of this node; events scheduled elsewhere are ignored.
    pub node_ip: String,
    /// Interval between link-appearance probes, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on link appearance after a move, in seconds.
    pub link_timeout_secs: u64,
    /// Root of the cgroup pids hierarchy.
    pub cgroup_root: PathBuf,
    /// Label (key, value) a workload must carry to be served.
    pub selector: Option<(String, String)>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interface_prefix: constants::DEFAULT_INTERFACE_PREFIX.into(),
            node_ip: String::new(),
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            link_timeout_secs: constants::DEFAULT_LINK_TIMEOUT_SECS,
            cgroup_root: PathBuf::from(constants::DEFAULT_CGROUP_ROOT),
            selector: Some((
                constants::DEFAULT_SELECTOR_KEY.into(),
                constants::DEFAULT_SELECTOR_VALUE.into(),
            )),
        }
    }
}

impl ControllerConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NicError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Interval between link-appearance probes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound on link appearance after a move.
    #[must_use]
    pub const fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_secs)
    }

    /// Checks the configuration for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`NicError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.interface_prefix.is_empty() {
            return Err(NicError::Config {
                message: "interface prefix must not be empty".into(),
            });
        }
        if self.interface_prefix.len() > constants::INTERFACE_NAME_MAX_LENGTH {
            return Err(NicError::Config {
                message: format!(
                    "interface prefix {:?} exceeds {} bytes",
                    self.interface_prefix,
                    constants::INTERFACE_NAME_MAX_LENGTH
                ),
            });
        }
        if self.node_ip.is_empty() {
            return Err(NicError::Config {
                message: "node IP must be set".into(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(NicError::Config {
                message: "poll interval must be greater than zero".into(),
            });
        }
        if self.link_timeout() < self.poll_interval() {
            return Err(NicError::Config {
                message: "link timeout must not be shorter than the poll interval".into(),
            });
        }
        Ok(())
    }
}
