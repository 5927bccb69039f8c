//! In-memory link driver.
//!
//! Models a set of namespaces and the links resident in each without
//! touching the kernel. Used by the test suites. Failure injection hooks
//! let callers reproduce every migration failure mode.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nicctl_common::error::{NicError, Result};

use super::{Link, LinkDriver};
use crate::namespace::NetNs;

#[derive(Debug, Default)]
struct State {
    namespaces: HashMap<NetNs, Vec<Link>>,
    up: HashSet<String>,
    in_transit: Vec<Link>,
    fail_move: HashSet<String>,
    hold_in_transit: HashSet<String>,
    fail_up: HashSet<String>,
    next_index: u32,
    moves: usize,
}

/// Link driver backed by in-memory namespace tables.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<State>,
}

impl MemoryDriver {
    /// Creates a driver that knows no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `ns` holding links named `names`, in order.
    pub fn add_namespace<I, S>(&self, ns: &NetNs, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        let mut links = Vec::new();
        for name in names {
            state.next_index += 1;
            links.push(Link::new(name, state.next_index));
        }
        state.namespaces.entry(ns.clone()).or_default().extend(links);
    }

    /// Names of the links currently resident in `ns`.
    #[must_use]
    pub fn links_in(&self, ns: &NetNs) -> Vec<String> {
        self.state()
            .namespaces
            .get(ns)
            .map(|links| links.iter().map(|l| l.name().to_owned()).collect())
            .unwrap_or_default()
    }

    /// Whether the link named `name` has been set up since it last moved.
    #[must_use]
    pub fn is_up(&self, name: &str) -> bool {
        self.state().up.contains(name)
    }

    /// Number of successful namespace reassignments issued so far.
    #[must_use]
    pub fn move_count(&self) -> usize {
        self.state().moves
    }

    /// Makes every future move of `name` fail.
    pub fn fail_moves_of(&self, name: &str) {
        let _ = self.state().fail_move.insert(name.to_owned());
    }

    /// Makes future moves of `name` succeed without the link ever showing
    /// up in the destination.
    pub fn hold_in_transit(&self, name: &str) {
        let _ = self.state().hold_in_transit.insert(name.to_owned());
    }

    /// Makes every future attempt to set `name` up fail.
    pub fn fail_activation_of(&self, name: &str) {
        let _ = self.state().fail_up.insert(name.to_owned());
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_move.clear();
        state.hold_in_transit.clear();
        state.fail_up.clear();
    }

    /// Destroys the link named `name` wherever it currently resides.
    pub fn remove_link(&self, name: &str) {
        let mut state = self.state();
        for links in state.namespaces.values_mut() {
            links.retain(|l| l.name() != name);
        }
        state.in_transit.retain(|l| l.name() != name);
        let _ = state.up.remove(name);
    }
}

impl LinkDriver for MemoryDriver {
    fn list_links(&self, ns: &NetNs) -> Result<Vec<Link>> {
        self.state()
            .namespaces
            .get(ns)
            .cloned()
            .ok_or_else(|| NicError::NotFound {
                kind: "network namespace",
                id: ns.to_string(),
            })
    }

    fn move_link(&self, link: &Link, from: &NetNs, to: &NetNs) -> Result<()> {
        let mut state = self.state();
        if state.fail_move.contains(link.name()) {
            return Err(NicError::Netlink {
                message: format!("injected failure moving {link}"),
            });
        }
        if !state.namespaces.contains_key(to) {
            return Err(NicError::NotFound {
                kind: "network namespace",
                id: to.to_string(),
            });
        }
        let source = state.namespaces.get_mut(from).ok_or_else(|| NicError::NotFound {
            kind: "network namespace",
            id: from.to_string(),
        })?;
        let pos = source
            .iter()
            .position(|l| l == link)
            .ok_or_else(|| NicError::NotFound {
                kind: "link",
                id: link.name().to_owned(),
            })?;
        let moved = source.remove(pos);
        let _ = state.up.remove(moved.name());
        state.moves += 1;
        if state.hold_in_transit.contains(moved.name()) {
            state.in_transit.push(moved);
        } else if let Some(dest) = state.namespaces.get_mut(to) {
            dest.push(moved);
        }
        Ok(())
    }

    fn set_link_up(&self, link: &Link, ns: &NetNs) -> Result<()> {
        let mut state = self.state();
        if state.fail_up.contains(link.name()) {
            return Err(NicError::Netlink {
                message: format!("injected failure setting {link} up"),
            });
        }
        let present = state
            .namespaces
            .get(ns)
            .is_some_and(|links| links.contains(link));
        if !present {
            return Err(NicError::NotFound {
                kind: "link",
                id: link.name().to_owned(),
            });
        }
        let _ = state.up.insert(link.name().to_owned());
        Ok(())
    }
}
