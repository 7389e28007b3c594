// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! Construction-time configuration: quirks, per-port allocation strategy, and the handful of
//! magic constants the original hardcodes.
//!
//! Nothing here is process-global. A [`CodecCore`](crate::CodecCore) is handed its `AdapterConfig`
//! once, at construction, and never consults anything outside it.

use crate::def::Quirks;

/// Default coalescing window: pack source frames into one input buffer as long as the span
/// between the first and most recent frame's timestamps stays under this. The original hardcodes
/// 250ms without stated rationale; this crate exposes it as configuration per the open question
/// this leaves on the table.
pub const DEFAULT_COALESCE_DURATION_US: i64 = 250_000;

/// Whether this instance decodes or encodes. Used only to pick default quirks and to decide
/// whether `stop()` needs to drive an explicit-EOS input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Decoder,
    Encoder,
}

/// How a port's buffers are allocated, chosen per the component's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAllocationStrategy {
    /// The backend allocates and owns the memory; we read its returned view.
    BackendAllocated,
    /// We provide caller-side memory as a backup and the backend returns a handle bound to it.
    BackendAllocatedWithBackup,
    /// We provide the memory outright; the backend only references it.
    UseBuffer,
}

/// Construction-time configuration for a [`crate::CodecCore`].
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub component_kind: ComponentKind,
    pub mime: String,
    pub quirks: Quirks,
    pub input_allocation: PortAllocationStrategy,
    pub output_allocation: PortAllocationStrategy,
    /// The backend fills in `bound_media_buffer`'s backing pointer lazily, on the first
    /// `FillBufferDone`, rather than at allocation time.
    pub defers_output_allocation: bool,
    /// See [`DEFAULT_COALESCE_DURATION_US`].
    pub coalesce_duration_us: i64,
    /// Caps how many input buffers `drain_input_buffers` tops up in one sweep. `None` means no
    /// cap (drain every buffer not owned by the component). Generalizes the original's
    /// `CAMERA_BUFFERS` device-string lookup into plain configuration.
    pub max_buffers_to_drain: Option<usize>,
}

impl AdapterConfig {
    pub fn new(component_kind: ComponentKind, mime: impl Into<String>, quirks: Quirks) -> Self {
        Self {
            component_kind,
            mime: mime.into(),
            quirks,
            input_allocation: PortAllocationStrategy::BackendAllocated,
            output_allocation: PortAllocationStrategy::BackendAllocated,
            defers_output_allocation: false,
            coalesce_duration_us: DEFAULT_COALESCE_DURATION_US,
            max_buffers_to_drain: None,
        }
    }
}
