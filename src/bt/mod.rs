// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The behavior tree execution kernel: status values, the node/tick model, native composites and
//! decorators, script-leaf adapters, and the tickers that drive trees from host threads.

mod blocking;
pub(crate) mod composites;
mod leaf;
mod node;
mod run_leaf;
mod status;
mod ticker;

pub use blocking::BlockingJsLeaf;
pub use composites::{async_, fork, interval, memorize, not, selector, sequence};
pub use leaf::JsLeaf;
pub use node::{Node, Tick, TickFn, TickResult};
pub use run_leaf::{default_ctx_fetcher, CtxFetcher};
pub use status::Status;
pub use ticker::{Manager, Ticker};

#[cfg(test)]
mod composites_tests;
#[cfg(test)]
mod ticker_tests;
