// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::time::Duration;

///
/// The error taxonomy of the scripting engine. Display strings are part of the contract: hosts
/// and tests match on them, and the script boundary reports them verbatim.
///
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // Lifecycle.
    #[error("event loop not running")]
    LoopNotRunning,
    #[error("event loop terminated")]
    LoopTerminated,
    #[error("bridge stopped")]
    BridgeStopped,
    #[error("bridge stopped before completion")]
    StoppedBeforeCompletion,

    // Timeout of a synchronous dispatch.
    #[error("synchronous dispatch timed out after {0:?}")]
    DispatchTimeout(Duration),

    // Caller or parent cancellation.
    #[error("execution cancelled")]
    Cancelled,

    // Script compile/runtime failures, surfaced with the runtime's message.
    #[error("{0}")]
    Script(String),

    // Wrong arity/type at the module boundary.
    #[error("type error: {0}")]
    TypeContract(String),

    // Policy: an asynchronous script function where only a synchronous one can complete.
    #[error("async function used as a synchronous tick; use createLeafNode for asynchronous leaves")]
    AsyncTickRejected,
    #[error("async JS function cannot be executed synchronously on event loop")]
    AsyncLeafOnLoop,

    // A host-side panic while running a script leaf, contained to a tick failure.
    #[error("panic in JS leaf")]
    LeafPanic,
}

impl Error {
    pub fn script(message: impl std::fmt::Display) -> Error {
        Error::Script(message.to_string())
    }

    pub fn type_contract(message: impl Into<String>) -> Error {
        Error::TypeContract(message.into())
    }
}
