// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! An asynchronous codec component adapter core.
//!
//! # About
//!
//! This crate mediates between a pull-based media source and a pull-based consumer through a
//! buffer-oriented, event-driven codec component backend. It does not itself decode, encode, or
//! parse any bitstream format — it owns the lifecycle state machine, the per-port buffer
//! ownership bookkeeping, and the cross-thread event protocol that any such backend needs
//! wrapped around it to be driven safely from more than one thread.
//!
//! # Roles
//!
//! Three traits define the boundary of what this crate provides versus what a caller plugs in:
//!
//! * [`ComponentBackend`] — the opaque, asynchronous codec component being adapted. Implement
//!   this over whatever actually does the decoding or encoding.
//! * [`UpstreamSource`] — a blocking, pull-based producer of timestamped byte ranges.
//! * [`CodecCore`] — constructed from the two above plus an [`AdapterConfig`], this is the type
//!   applications actually call `start`/`pause`/`stop`/`read`/`signal_buffer_returned` on.
//!
//! # Concurrency
//!
//! A single monitor lock and two condition variables guard all mutable state shared between the
//! caller's thread and the backend's own event-callback thread; see the [`core`] module docs for
//! the details. Public operations block until the requested transition completes or the core
//! enters its terminal `Error` state.
//!
//! # Quirks and configuration
//!
//! Real codec components diverge from nominal behavior in a handful of well-known ways — flush
//! semantics around shutdown, whether EOS is ever echoed on the output port, zero-copy input
//! buffer handling, and so on. None of that is looked up from a global table keyed by component
//! name; it is all just [`Quirks`] bits passed into [`AdapterConfig`] at construction.

mod backend;
mod buffer;
mod config;
mod core;
mod csd;
mod def;
mod deliverable;
mod error;
mod format;
mod input_pump;
mod output_pump;
mod source;

pub use crate::backend::{
    BackendEvent, BufferHandle, CmdComplete, ComponentBackend, EventSink, FillBufferDoneEvent, LocalBufferView,
    PortDefinition, SharedBufferMemory, StateAck,
};
pub use crate::config::{AdapterConfig, ComponentKind, PortAllocationStrategy, DEFAULT_COALESCE_DURATION_US};
pub use crate::core::{CodecCore, ReadOutcome};
pub use crate::csd::{CodecSpecificDataStore, CsdParseError};
pub use crate::def::{BufferFlags, Command, LifecycleState, Port, PortStatus, Quirks, TargetState};
pub use crate::deliverable::{Deliverable, DeliverableMeta, Payload};
pub use crate::error::CoreError;
pub use crate::format::{
    format_has_notably_changed, AudioFormat, OutputFormat, VideoFormat, AVC_NAL_START_CODE, MIME_VIDEO_AVC,
};
pub use crate::source::{ReadOptions, SeekMode, SourceBuffer, SourceReadError, StartOptions, UpstreamSource};
