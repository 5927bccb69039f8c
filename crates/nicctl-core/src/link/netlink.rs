//! rtnetlink-backed link driver.
//!
//! Every request runs on the calling thread: the thread enters the
//! namespace the request targets, opens a fresh netlink socket there, and
//! drives it to completion on a current-thread tokio runtime before the
//! namespace guard restores the original namespace.

use std::future::Future;
use std::os::fd::AsRawFd;

use futures::TryStreamExt;
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use nicctl_common::error::{NicError, Result};
use rtnetlink::Handle;

use super::{Link, LinkDriver};
use crate::namespace::{NetNs, NetnsGuard};

/// Link driver issuing rtnetlink requests from inside each namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkDriver;

impl NetlinkDriver {
    /// Creates a new driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Runs `op` against a netlink socket opened inside `ns`.
fn with_handle<T, F, Fut>(ns: &NetNs, op: F) -> Result<T>
where
    F: FnOnce(Handle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let _guard = NetnsGuard::enter(ns)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(|e| NicError::Netlink {
            message: format!("failed to build netlink runtime: {e}"),
        })?;
    runtime.block_on(async move {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| NicError::Netlink {
            message: format!("failed to open netlink socket in {ns}: {e}"),
        })?;
        let _connection = tokio::spawn(connection);
        op(handle).await
    })
}

fn netlink_error(context: &str, e: &rtnetlink::Error) -> NicError {
    NicError::Netlink {
        message: format!("{context}: {e}"),
    }
}

fn link_from_message(msg: &LinkMessage) -> Option<Link> {
    msg.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(Link::new(name.clone(), msg.header.index)),
        _ => None,
    })
}

async fn dump_links(handle: &Handle) -> Result<Vec<Link>> {
    let mut stream = handle.link().get().execute();
    let mut links = Vec::new();
    while let Some(msg) = stream
        .try_next()
        .await
        .map_err(|e| netlink_error("link dump failed", &e))?
    {
        if let Some(link) = link_from_message(&msg) {
            links.push(link);
        }
    }
    Ok(links)
}

/// Resolves the current index of `link` in the namespace `handle` talks to.
async fn current_index(handle: &Handle, link: &Link) -> Result<u32> {
    dump_links(handle)
        .await?
        .into_iter()
        .find(|l| l == link)
        .map(|l| l.index())
        .ok_or_else(|| NicError::NotFound {
            kind: "link",
            id: link.name().to_owned(),
        })
}

impl LinkDriver for NetlinkDriver {
    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>> {
        with_handle(ns, |handle| async move { dump_links(&handle).await })
    }

    fn move_link(&self, link: &Link, from: &NetNs, to: &NetNs) -> Result<()> {
        let dest_fd = to.as_raw_fd();
        with_handle(from, |handle| async move {
            let index = current_index(&handle, link).await?;
            handle
                .link()
                .set(index)
                .setns_by_fd(dest_fd)
                .execute()
                .await
                .map_err(|e| netlink_error(&format!("setns of {link} to {to} failed"), &e))
        })?;
        tracing::debug!(link = %link, from = %from, to = %to, "link namespace reassigned");
        Ok(())
    }

    fn set_link_up(&self, link: &Link, ns: &NetNs) -> Result<()> {
        with_handle(ns, |handle| async move {
            let index = current_index(&handle, link).await?;
            handle
                .link()
                .set(index)
                .up()
                .execute()
                .await
                .map_err(|e| netlink_error(&format!("setting {link} up failed"), &e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_permitted(e: &NicError) -> bool {
        let message = e.to_string();
        message.contains("EPERM") || message.contains("Operation not permitted")
    }

    #[test]
    fn failing_request_restores_thread_namespace() {
        let before = NetNs::current().unwrap();
        let result: Result<()> = with_handle(&before, |_handle| async {
            Err(NicError::NotFound {
                kind: "link",
                id: "tor_vlan9".into(),
            })
        });
        match result {
            Err(NicError::NotFound { id, .. }) => assert_eq!(id, "tor_vlan9"),
            Err(e) if not_permitted(&e) => return,
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(NetNs::current().unwrap(), before);
    }
}
