//! `nicctl links` — List the host links the controller would manage.

use std::io::Write;
use std::sync::Arc;

use clap::Args;
use nicctl_common::config::ControllerConfig;
use nicctl_core::link::{LinkDriver, discover_links};
use nicctl_core::namespace::NetNs;

use crate::output;

/// Arguments for the `links` command.
#[derive(Args, Debug)]
pub struct LinksArgs {
    /// Print names only, one per line.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Returns the kernel link driver for this platform.
///
/// # Errors
///
/// Returns an error on platforms without network namespaces.
pub fn link_driver() -> anyhow::Result<Arc<dyn LinkDriver>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(nicctl_core::link::netlink::NetlinkDriver::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!("network namespaces require Linux")
    }
}

/// Executes the `links` command.
///
/// # Errors
///
/// Returns an error if the links cannot be listed.
pub fn execute(args: &LinksArgs, config: &ControllerConfig) -> anyhow::Result<()> {
    let home = NetNs::current()?;
    let driver = link_driver()?;
    let links = discover_links(driver.as_ref(), &home, &config.interface_prefix)?;

    let mut out = std::io::stdout().lock();
    if !args.quiet {
        writeln!(out, "{}", output::link_header())?;
    }
    for link in &links {
        if args.quiet {
            writeln!(out, "{}", link.name())?;
        } else {
            writeln!(out, "{}", output::link_row(link.index(), link.name()))?;
        }
    }
    Ok(())
}
