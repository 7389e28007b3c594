// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! Core enums and bitsets shared across the crate: port identity, port status, the lifecycle
//! state machine, buffer flags and quirks.

use bitflags::bitflags;

/// Identifies one of the component's two data endpoints, or both at once.
///
/// `Both` is kept as an explicit variant rather than folded into a magic index or an
/// `Option<Port>`: some backends only support flush/disable/enable addressed at both ports in a
/// single command, and giving that case its own name keeps the command-submission call sites
/// honest about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Input,
    Output,
    Both,
}

impl Port {
    /// `true` if `self` names `port` directly or via `Both`.
    pub fn covers(self, port: Port) -> bool {
        self == Port::Both || self == port
    }
}

/// Per-port lifecycle, independent of the main state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Enabled,
    Disabling,
    Disabled,
    Enabling,
    ShuttingDown,
}

/// The codec's main lifecycle state.
///
/// Transitions: `Loaded -> LoadedToIdle -> IdleToExecuting -> Executing -> {Reconfiguring,
/// ExecutingToIdle, Paused} -> IdleToLoaded -> Loaded -> Dead`, with a terminal `Error` reachable
/// from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Loaded,
    LoadedToIdle,
    IdleToExecuting,
    Executing,
    Reconfiguring,
    ExecutingToIdle,
    Paused,
    IdleToLoaded,
    Dead,
    Error,
}

impl LifecycleState {
    /// Intermediate states that the public operation surface must not observe: a caller that
    /// finds the core in one of these waits on `async_completion` rather than proceeding.
    pub fn is_intermediate(self) -> bool {
        matches!(
            self,
            Self::LoadedToIdle
                | Self::IdleToExecuting
                | Self::ExecutingToIdle
                | Self::IdleToLoaded
                | Self::Reconfiguring
        )
    }
}

bitflags! {
    /// Flags accompanying a buffer submitted to or returned from the backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        /// The buffer completes a frame (as opposed to a partial fragment).
        const END_OF_FRAME = 1 << 0;
        /// This is the final buffer of the stream.
        const EOS          = 1 << 1;
        /// The buffer carries codec-specific configuration data, not payload.
        const CODEC_CONFIG = 1 << 2;
        /// The payload is a sync frame (keyframe).
        const SYNC_FRAME   = 1 << 3;
    }
}

bitflags! {
    /// Construction-time component quirks.
    ///
    /// Modeled on the quirk bitset the original looks up from a static component-name table
    /// (`findCodecQuirks` and friends in `OMXCodec.cpp`). Here it is simply a value passed to
    /// [`crate::CodecCore::new`]; there is no process-global lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quirks: u32 {
        /// Accepts multiple coalesced source frames per input buffer.
        const COALESCE_INPUT              = 1 << 0;
        /// Input is AVC and wants raw NAL units rather than a `00 00 00 01`-prefixed stream.
        const WANTS_NAL_FRAGMENTS         = 1 << 1;
        /// Submit `StateSet(Idle)` only after input/output buffers are allocated, rather than
        /// before.
        const LOADED_TO_IDLE_AFTER_ALLOC  = 1 << 2;
        /// Flush both ports before submitting `StateSet(Idle)` on a normal stop.
        const FLUSH_BEFORE_SHUTDOWN       = 1 << 3;
        /// An encoder that must receive an explicit EOS input buffer before it will complete its
        /// own idle transition on `stop()`.
        const REQUIRES_EOS_ON_STOP        = 1 << 4;
        /// The component never emits an output EOS flag; rely on the "we own every buffer"
        /// shortcut instead ([`crate::output_pump`]).
        const NO_OUTPUT_EOS               = 1 << 5;
        /// Single-frame decode: append EOS to the very first input buffer and suppress the
        /// "we own every buffer" shortcut so exactly one output buffer is produced.
        const THUMBNAIL_MODE              = 1 << 6;
        /// Input buffers reference upstream source memory directly rather than being memcpy'd
        /// into, deferring the source buffer's release until `EmptyBufferDone`.
        const ZERO_COPY_INPUT             = 1 << 7;
        /// Like `ZERO_COPY_INPUT`, but the referenced memory is an opaque metadata handle rather
        /// than raw bytes. Distinguished from it only for logging/testing; both reuse the
        /// `source_buffer` pinning mechanism.
        const STORE_METADATA_IN_INPUT     = 1 << 8;
        /// `flush_port` may skip the backend `Flush` command and synthesize completion in place
        /// when we already own every buffer on the affected port.
        const EMULATE_FLUSH_IF_IDLE       = 1 << 9;
        /// Flush the output port before disabling it on a port-settings-changed reconfiguration,
        /// rather than disabling directly.
        const FLUSH_BEFORE_DISABLE        = 1 << 10;
    }
}

/// A command submitted to the backend via [`crate::backend::ComponentBackend::send_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StateSet(TargetState),
    PortDisable(Port),
    PortEnable(Port),
    Flush(Port),
}

/// The subset of [`LifecycleState`]-adjacent states a `StateSet` command may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Idle,
    Executing,
    Loaded,
    Pause,
}
