// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

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

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

///
/// A Latch is a simple condition that can be triggered once to release any threads that are
/// waiting for it.
///
/// Should be roughly equivalent to Java's CountDownLatch with a count of 1, or to a cancellation
/// token's done channel: triggering the latch closes the channel that all observers hold, and the
/// condition cannot be cleared afterward.
///
/// Internally this is a zero-capacity crossbeam channel that never carries a message: triggering
/// drops the only `Sender`, which disconnects the channel and releases every `Receiver`. Because
/// observers are plain crossbeam `Receiver`s, a Latch can participate directly in
/// `crossbeam_channel::select!` alongside other channels.
///
#[derive(Clone)]
pub struct Latch {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Latch {
    pub fn new() -> Latch {
        let (sender, receiver) = bounded(0);
        Latch {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    ///
    /// Mark this latch triggered, releasing all threads that are waiting for it to trigger.
    ///
    /// All calls to trigger after the first one are noops.
    ///
    pub fn trigger(&self) {
        // To trigger the latch, we drop the Sender.
        self.sender.lock().take();
    }

    ///
    /// Block the calling thread until another thread triggers this latch.
    ///
    pub fn triggered(&self) {
        // The channel never carries a message, so recv returns (with RecvError) exactly when the
        // Sender has been dropped.
        let _ = self.receiver.recv();
    }

    ///
    /// As `triggered`, but gives up after the given duration. Returns true if the latch was
    /// triggered before the deadline.
    ///
    pub fn triggered_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    ///
    /// Return a Receiver that disconnects when the latch triggers, for use in
    /// `crossbeam_channel::select!`.
    ///
    pub fn observer(&self) -> Receiver<()> {
        self.receiver.clone()
    }

    ///
    /// Return true if the latch has been triggered.
    ///
    pub fn poll_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[cfg(test)]
mod tests;
