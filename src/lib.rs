// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Embeds a single-threaded JavaScript runtime (with a cooperative event loop) inside a
//! multi-threaded host, and exposes two cooperating libraries to scripts: a behavior tree
//! execution kernel (`osm:bt`) and a partial-order planner (`osm:pabt`).
//!
//! The [`Bridge`] is the single thread-safe doorway into the runtime; host-side tickers drive
//! trees whose leaves are authored in script, with the leaf adapters translating synchronous
//! ticks into event-loop dispatches.

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

mod bridge;
pub mod bt;
mod error;
mod externs;
pub mod pabt;

pub use blackboard::Blackboard;
pub use bridge::{Bridge, ModuleRegistry};
pub use error::Error;
pub use evloop::{EventLoop, Scope, ScriptHandle};
pub use latch::Latch;

#[cfg(test)]
mod leaf_tests;
#[cfg(test)]
pub(crate) mod testutil;
