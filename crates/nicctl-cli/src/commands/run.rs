//! `nicctl run` — Run the controller.

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use clap::Args;
use nicctl_common::config::ControllerConfig;
use nicctl_core::link::discover_links;
use nicctl_core::migrate::MigrationConfig;
use nicctl_core::namespace::NetNs;
use nicctl_runtime::bindings::BindingTable;
use nicctl_runtime::event::read_events;
use nicctl_runtime::orchestrator::Orchestrator;
use nicctl_runtime::resolver::CgroupResolver;
use nicctl_runtime::worker::{Message, Worker};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// IP address of this node; events for other hosts are ignored.
    #[arg(long, env = "NICCTL_NODE_IP")]
    pub node_ip: Option<String>,

    /// Newline-delimited JSON workload events; `-` reads standard input.
    #[arg(long, default_value = "-")]
    pub events: String,

    /// Interval between link-appearance probes, in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Time a migrated link is given to appear, in seconds.
    #[arg(long)]
    pub link_timeout_secs: Option<u64>,

    /// Root of the cgroup pids hierarchy.
    #[arg(long)]
    pub cgroup_root: Option<PathBuf>,

    /// Only serve workloads carrying this `key=value` label.
    #[arg(long, value_parser = parse_selector, conflicts_with = "all_workloads")]
    pub selector: Option<(String, String)>,

    /// Serve every local workload regardless of labels.
    #[arg(long)]
    pub all_workloads: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut ControllerConfig) {
        if let Some(ip) = &self.node_ip {
            config.node_ip.clone_from(ip);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = self.link_timeout_secs {
            config.link_timeout_secs = secs;
        }
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        if self.all_workloads {
            config.selector = None;
        } else if let Some(selector) = &self.selector {
            config.selector = Some(selector.clone());
        }
    }
}

fn parse_selector(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the host links cannot
/// be discovered, or the worker fails.
pub fn execute(args: RunArgs, mut config: ControllerConfig) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let home = NetNs::current()?;
    tracing::debug!(ns = %home, "controller namespace");
    let driver = super::links::link_driver()?;
    let links = discover_links(driver.as_ref(), &home, &config.interface_prefix)?;

    let table = Arc::new(BindingTable::new(
        links,
        home,
        driver,
        MigrationConfig {
            poll_interval: config.poll_interval(),
            timeout: config.link_timeout(),
        },
    ));
    let orchestrator = Orchestrator::new(
        &config,
        table.clone(),
        Box::new(CgroupResolver::new(config.cgroup_root.clone())),
    );
    let worker = Worker::spawn(orchestrator)?;
    tracing::info!(node_ip = %config.node_ip, "starting nic controller");

    let stop = worker.sender();
    ctrlc::set_handler(move || {
        tracing::info!("received stop signal, shutting down controller");
        let _ = stop.send(Message::Shutdown);
    })
    .map_err(|e| anyhow::anyhow!("failed to set signal handler: {e}"))?;

    spawn_feed(args.events, worker.sender())?;

    let stats = worker.join()?;
    let snapshot = table.snapshot()?;
    tracing::info!(
        handled = stats.handled,
        failed = stats.failed,
        bindings = %serde_json::to_string(&snapshot.bindings)?,
        available = snapshot.available(),
        "controller stopped"
    );
    Ok(())
}

/// Streams events from `source` into the worker on a separate thread.
/// The worker is asked to stop once the feed ends.
fn spawn_feed(source: String, sender: Sender<Message>) -> anyhow::Result<()> {
    let _feed = std::thread::Builder::new()
        .name("nicctl-feed".into())
        .spawn(move || {
            let sink = |event| sender.send(Message::Event(Box::new(event))).is_ok();
            let result = if source == "-" {
                read_events(std::io::stdin().lock(), sink)
            } else {
                match std::fs::File::open(&source) {
                    Ok(file) => read_events(BufReader::new(file), sink),
                    Err(e) => {
                        tracing::error!(path = %source, error = %e, "cannot open event feed");
                        Ok(0)
                    }
                }
            };
            match result {
                Ok(count) => tracing::info!(events = count, "event feed closed"),
                Err(e) => tracing::error!(error = %e, "event feed failed"),
            }
            let _ = sender.send(Message::Shutdown);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            node_ip: Some("10.0.0.7".into()),
            events: "-".into(),
            poll_interval_ms: Some(100),
            link_timeout_secs: None,
            cgroup_root: None,
            selector: None,
            all_workloads: false,
        }
    }

    #[test]
    fn flags_override_config() {
        let mut config = ControllerConfig::default();
        args().apply(&mut config);
        assert_eq!(config.node_ip, "10.0.0.7");
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.link_timeout_secs, 30);
        assert!(config.selector.is_some());
    }

    #[test]
    fn all_workloads_drops_selector() {
        let mut config = ControllerConfig::default();
        RunArgs {
            all_workloads: true,
            ..args()
        }
        .apply(&mut config);
        assert!(config.selector.is_none());
    }

    #[test]
    fn selector_parses_key_value() {
        assert_eq!(
            parse_selector("app=vpp"),
            Ok(("app".to_owned(), "vpp".to_owned()))
        );
        assert!(parse_selector("=vpp").is_err());
        assert!(parse_selector("novalue").is_err());
    }
}
