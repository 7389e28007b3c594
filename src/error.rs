// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The error taxonomy of the codec adapter core.
//!
//! See the error handling design section of the project specification for the full table this
//! enum implements: each variant here corresponds to exactly one row.

use std::fmt::Debug;

/// Errors surfaced by [`crate::CodecCore`]'s public operations.
///
/// `B` and `S` are the backend's and upstream source's own error types, carried through rather
/// than erased, so callers can match on them if they need to.
#[derive(Debug, thiserror::Error)]
pub enum CoreError<B, S>
where
    B: std::error::Error + Send + Sync + 'static,
    S: std::error::Error + Send + Sync + 'static,
{
    /// Configuration requested a profile, level, color format, or similar parameter combination
    /// the component does not support. Configuration is refused; the core never enters
    /// `Executing`.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    /// The backend rejected a parameter set during configuration.
    #[error("backend rejected parameter during configuration: {0}")]
    ParameterRejected(B),

    /// Buffer allocation failed during `init()`; the core enters `Error`.
    #[error("buffer allocation failed")]
    NoMemory,

    /// A public operation was called while the lifecycle state machine was not in a state that
    /// supports it (e.g. `pause()` outside `Executing`). Never forces the `Error` state.
    #[error("operation not valid in the current state: {0}")]
    InvalidState(&'static str),

    /// The upstream source reported a non-recoverable read error. `signalled_eos` and
    /// `final_status` are set; this is surfaced to a subsequent `read()` as end-of-stream
    /// carrying this error rather than as an immediate failure of the read that discovered it.
    #[error("upstream source error: {0}")]
    Source(S),

    /// A source buffer exceeded the destination input buffer's remaining capacity at offset
    /// zero; there was no way to make room for it by coalescing less.
    #[error("oversized input at offset 0: {needed} bytes into a buffer with {available} bytes free")]
    OversizeInput { needed: usize, available: usize },

    /// The backend reported a command, parameter, or buffer operation failure outside of
    /// configuration.
    #[error("backend error: {0}")]
    Backend(B),

    /// The backend delivered `Event(Error)` or entered `OMX_StateInvalid`; the core is now in
    /// the terminal `Error` state and all subsequent public operations fail with this variant.
    #[error("codec entered the error state")]
    UnknownError,
}

impl<B, S> CoreError<B, S>
where
    B: std::error::Error + Send + Sync + 'static,
    S: std::error::Error + Send + Sync + 'static,
{
    /// `true` for errors that force the lifecycle state machine into the terminal `Error` state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoMemory | Self::OversizeInput { .. } | Self::UnknownError)
    }
}
