//! # nicctl-core
//!
//! Low-level Linux primitives for handing host links to workload network
//! namespaces.
//!
//! This crate provides:
//! - **Namespaces**: opaque network namespace handles and a scoped guard
//!   that switches the calling thread into a namespace and restores the
//!   previous one on drop.
//! - **Links**: the [`link::LinkDriver`] capability set (list, move, set up)
//!   with an rtnetlink implementation and an in-memory one.
//! - **Migration**: the move, poll, and activate protocol that relocates a
//!   link between two namespaces.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod link;
pub mod migrate;
pub mod namespace;
