// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The backend interface: the opaque, asynchronous codec component this crate adapts.
//!
//! The backend is an external collaborator. It exposes buffer allocation primitives, command
//! submission, and parameter get/set, and it reports back by invoking whatever [`EventSink`] it
//! was last handed through [`ComponentBackend::set_event_sink`] — never by holding a reference
//! back into the core itself. The core registers itself as the sink once, at construction, and
//! explicitly revokes it during teardown by passing `None`; see the module docs on
//! [`crate::core`] for why.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::def::{Command, Port};

/// Opaque buffer identifier, as handed back by [`ComponentBackend::allocate_buffer`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferHandle(pub u64);

/// The state a `CmdComplete(StateSet, ...)` event acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAck {
    Idle,
    Executing,
    Loaded,
    Pause,
    Invalid,
}

/// The command kind a `CmdComplete` event acknowledges, paired with its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdComplete {
    StateSet(StateAck),
    PortDisable(Port),
    PortEnable(Port),
    Flush(Port),
}

/// Metadata accompanying a `FillBufferDone` event.
#[derive(Debug, Clone)]
pub struct FillBufferDoneEvent {
    pub handle: BufferHandle,
    pub range_offset: usize,
    pub range_length: usize,
    pub flags: crate::def::BufferFlags,
    pub time_us: i64,
    /// Opaque platform-specific payload (e.g. a graphic buffer handle), forwarded to the
    /// deliverable untouched.
    pub platform_data: Option<Arc<dyn Any + Send + Sync>>,
}

/// The one kind of message the backend ever sends, corresponding one-to-one with the callback
/// shape in the original (`Event`, `EmptyBufferDone`, `FillBufferDone`).
#[derive(Debug, Clone)]
pub enum BackendEvent {
    CmdComplete(CmdComplete),
    PortSettingsChanged(Port),
    Error,
    EmptyBufferDone(BufferHandle),
    FillBufferDone(FillBufferDoneEvent),
}

/// The capability the core hands the backend so it can report events back, without the backend
/// ever holding a strong or weak reference to the core's own types.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: BackendEvent);
}

/// The handful of fields the Port Buffer Table needs out of a port's parameter set in order to
/// allocate buffers for it. Everything else about a port's parameters is the Configuration
/// Programmer's (C9) business, not this one's.
#[derive(Debug, Clone, Copy)]
pub struct PortDefinition {
    pub buffer_count_actual: usize,
    pub buffer_size: usize,
}

/// A caller-side memory region backing one buffer, shared between this process and the backend
/// (standing in for the shared-memory handles the original passes across its own process
/// boundary).
pub type SharedBufferMemory = Arc<Mutex<Vec<u8>>>;

/// What an allocation call returns for the local, process-visible view of a buffer's memory.
///
/// `None` means the backend holds the memory privately (the deferred-output-allocation case);
/// the eventual `bound_media_buffer` is constructed lazily once `FillBufferDone` reveals the
/// backend's own pointer via [`FillBufferDoneEvent::platform_data`] or an equivalent mechanism
/// the concrete backend chooses.
pub type LocalBufferView = Option<SharedBufferMemory>;

/// The opaque, asynchronous codec component backend this crate mediates access to.
pub trait ComponentBackend: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register (or, with `None`, revoke) the sink that receives this backend's events.
    fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>);

    /// The current buffer count/size for `port`, as the component reports it.
    fn port_definition(&self, port: Port) -> Result<PortDefinition, Self::Error>;

    /// A snapshot of the output port's current format, used by the Output Pump to detect
    /// notable format changes around a reconfiguration.
    fn output_format(&self) -> Result<crate::format::OutputFormat, Self::Error>;

    /// Override the actual buffer count for `port` ahead of allocation (used by the zero-copy
    /// input quirk to match an upstream producer's own buffer count).
    fn set_port_buffer_count(&self, port: Port, count: usize) -> Result<(), Self::Error>;

    /// Backend-allocated memory: the backend both owns and exposes the buffer.
    fn allocate_buffer(&self, port: Port, size: usize) -> Result<(BufferHandle, LocalBufferView), Self::Error>;

    /// Backend-allocated-with-backup: we provide a caller-side region as backup and the backend
    /// returns a handle that reads/writes through to it.
    fn allocate_buffer_with_backup(&self, port: Port, memory: SharedBufferMemory) -> Result<BufferHandle, Self::Error>;

    /// Use-buffer: we provide the memory outright and the backend merely references it.
    fn use_buffer(&self, port: Port, memory: SharedBufferMemory) -> Result<BufferHandle, Self::Error>;

    fn free_buffer(&self, port: Port, handle: BufferHandle) -> Result<(), Self::Error>;

    /// Repoint an input buffer directly at externally-owned memory instead of our own backing
    /// region, for the zero-copy input quirks (`ZERO_COPY_INPUT` / `STORE_METADATA_IN_INPUT`).
    /// The caller keeps `data` alive (via [`crate::buffer::BufferRecord::source_buffer`]) until
    /// the matching `EmptyBufferDone`.
    fn rebind_buffer_memory(
        &self,
        port: Port,
        handle: BufferHandle,
        data: Arc<[u8]>,
        offset: usize,
        length: usize,
    ) -> Result<(), Self::Error>;

    fn empty_buffer(
        &self,
        handle: BufferHandle,
        offset: usize,
        length: usize,
        flags: crate::def::BufferFlags,
        time_us: i64,
    ) -> Result<(), Self::Error>;

    fn fill_buffer(&self, handle: BufferHandle) -> Result<(), Self::Error>;

    fn send_command(&self, cmd: Command) -> Result<(), Self::Error>;

    fn get_parameter(&self, index: u32, out: &mut [u8]) -> Result<(), Self::Error>;
    fn set_parameter(&self, index: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn get_config(&self, index: u32, out: &mut [u8]) -> Result<(), Self::Error>;
    fn set_config(&self, index: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn get_extension_index(&self, name: &str) -> Result<u32, Self::Error>;

    /// Release the backend node itself, at teardown.
    fn free_node(&self) -> Result<(), Self::Error>;
}
