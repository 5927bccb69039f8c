//! Link allocation and workload event handling for the nicctl controller.
//!
//! The [`bindings::BindingTable`] owns the [`pool::LinkPool`] and every
//! workload-to-link binding behind one lock. The
//! [`orchestrator::Orchestrator`] turns workload events into bind and
//! unbind calls, and the [`worker::Worker`] runs it on a dedicated thread
//! so that namespace switches never leak into unrelated work.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod bindings;
pub mod event;
pub mod orchestrator;
pub mod pool;
pub mod resolver;
pub mod worker;
