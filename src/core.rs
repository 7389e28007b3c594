// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The mediator itself: [`CodecCore`], the monitor lock it shares with the backend's callback
//! thread, and the event dispatch that drives the lifecycle state machine.
//!
//! Exactly one lock (`Shared::inner`) and two condvars guard everything here, mirroring a
//! threaded mainloop: the public operation surface and the backend's event callbacks both take
//! the lock before touching any mutable state, `async_completion` wakes a caller waiting on a
//! state transition, and `buffer_filled` wakes a caller blocked in `read()` waiting on queued
//! output, a format change, or end of stream.
//!
//! The backend never holds a reference back into `CodecCore` or `Shared` directly. It is handed
//! an [`EventRouter`] — an [`EventSink`] wrapping an `Arc<Shared<B, S>>` — at construction, and
//! that registration is explicitly revoked with `set_event_sink(None)` when the core is dropped,
//! so a backend that outlives the core (or calls back during teardown) cannot observe a stale or
//! freed core.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::backend::{BackendEvent, CmdComplete as BackendCmdComplete, ComponentBackend, EventSink, StateAck};
use crate::buffer::PortTable;
use crate::config::{AdapterConfig, ComponentKind};
use crate::csd::CodecSpecificDataStore;
use crate::def::{Command, LifecycleState, Port, PortStatus, Quirks, TargetState};
use crate::deliverable::Deliverable;
use crate::error::CoreError;
use crate::format::OutputFormat;
use crate::source::{SourceBuffer, StartOptions, UpstreamSource};
use crate::{input_pump, output_pump};

/// The mutable state guarded by `Shared::inner`.
pub(crate) struct Inner<S: UpstreamSource> {
    pub state: LifecycleState,
    pub input: PortTable,
    pub output: PortTable,
    pub csd: CodecSpecificDataStore,
    pub filled_queue: VecDeque<usize>,
    /// A seek requested by the most recent `read()` call, consumed by the Input Pump's first
    /// upstream read after the resulting flush completes.
    pub seek: Option<(i64, crate::source::SeekMode)>,
    pub skip_time_us: Option<i64>,
    pub target_time_us: Option<i64>,
    pub paused: bool,
    pub is_paused_resumable: bool,
    pub signalled_eos: bool,
    pub no_more_output_data: bool,
    pub final_status: Option<S::Error>,
    pub output_format: Option<OutputFormat>,
    pub output_format_changed: bool,
    pub initial_buffer_submit: bool,
    /// A source buffer read too far ahead to fit in the input buffer being filled; carried over
    /// to the next one.
    pub leftover: Option<SourceBuffer>,
}

impl<S: UpstreamSource> Inner<S> {
    fn new(csd: CodecSpecificDataStore) -> Self {
        Self {
            state: LifecycleState::Loaded,
            input: PortTable::new(Port::Input),
            output: PortTable::new(Port::Output),
            csd,
            filled_queue: VecDeque::new(),
            seek: None,
            skip_time_us: None,
            target_time_us: None,
            paused: false,
            is_paused_resumable: false,
            signalled_eos: false,
            no_more_output_data: false,
            final_status: None,
            output_format: None,
            output_format_changed: false,
            initial_buffer_submit: false,
            leftover: None,
        }
    }
}

/// Everything the caller thread and the backend's callback thread both touch.
pub(crate) struct Shared<B: ComponentBackend, S: UpstreamSource> {
    inner: Mutex<Inner<S>>,
    pub(crate) async_completion: Condvar,
    pub(crate) buffer_filled: Condvar,
    pub(crate) backend: B,
    pub(crate) source: S,
    pub(crate) config: AdapterConfig,
}

impl<B: ComponentBackend, S: UpstreamSource> Shared<B, S> {
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builds a bare `Shared` with no registered event sink, for driving pump functions in
    /// isolation without going through `CodecCore::new`/`start`.
    #[cfg(test)]
    pub(crate) fn new_for_test(backend: B, source: S, config: AdapterConfig, csd: CodecSpecificDataStore) -> Self {
        Self { inner: Mutex::new(Inner::new(csd)), async_completion: Condvar::new(), buffer_filled: Condvar::new(), backend, source, config }
    }

    #[cfg(test)]
    pub(crate) fn lock_for_test(&self) -> MutexGuard<'_, Inner<S>> {
        self.lock()
    }

    pub(crate) fn set_state(&self, inner: &mut Inner<S>, state: LifecycleState) {
        tracing::debug!(from = ?inner.state, to = ?state, "lifecycle state transition");
        inner.state = state;
        self.async_completion.notify_all();
        self.buffer_filled.notify_all();
    }

    pub(crate) fn port_table_mut<'a>(&self, inner: &'a mut Inner<S>, port: Port) -> &'a mut PortTable {
        match port {
            Port::Input => &mut inner.input,
            Port::Output => &mut inner.output,
            Port::Both => unreachable!("a single port table is never addressed as Both"),
        }
    }

    /// `disablePortAsync`: only ever applies to the output port, in response to a port-settings
    /// change.
    fn disable_port_async(&self, inner: &mut Inner<S>, port: Port) -> Result<(), B::Error> {
        debug_assert_eq!(port, Port::Output);

        let previous = inner.output_format.clone();
        inner.output_format = self.backend.output_format().ok();
        inner.output_format_changed =
            crate::format::format_has_notably_changed(previous.as_ref(), inner.output_format.as_ref());

        inner.output.status = PortStatus::Disabling;
        self.backend.send_command(Command::PortDisable(port))?;
        inner.output.free_output_port_if_all_are_with_us(&self.backend)
    }

    fn enable_port_async(&self, inner: &mut Inner<S>, port: Port) -> Result<(), B::Error> {
        let table = self.port_table_mut(inner, port);
        debug_assert_eq!(table.status, PortStatus::Disabled);
        table.status = PortStatus::Enabling;
        self.backend.send_command(Command::PortEnable(port))
    }

    /// `true` if an actual `Flush` command went to the backend; `false` if completion was
    /// synthesized in place because every buffer on the port is already ours.
    pub(crate) fn flush_port_async(&self, inner: &mut Inner<S>, port: Port) -> Result<bool, B::Error> {
        if port == Port::Both {
            inner.input.status = PortStatus::ShuttingDown;
            inner.output.status = PortStatus::ShuttingDown;
        } else {
            let table = self.port_table_mut(inner, port);
            debug_assert_eq!(table.status, PortStatus::Enabled);
            table.status = PortStatus::ShuttingDown;
            if self.config.quirks.contains(Quirks::EMULATE_FLUSH_IF_IDLE) && table.count_we_own() == table.buffers.len() {
                return Ok(false);
            }
        }
        self.backend.send_command(Command::Flush(port))?;
        Ok(true)
    }

    /// What a `CmdComplete(Flush(port))` event does, also invoked in place when
    /// `flush_port_async` synthesizes completion under `EMULATE_FLUSH_IF_IDLE`.
    pub(crate) fn on_flush_complete(&self, inner: &mut Inner<S>, port: Port) {
        if inner.state == LifecycleState::Error {
            return;
        }

        if port == Port::Both {
            inner.input.status = PortStatus::Enabled;
            inner.output.status = PortStatus::Enabled;
            debug_assert_eq!(inner.input.count_we_own(), inner.input.buffers.len());
            debug_assert_eq!(inner.output.count_we_own(), inner.output.buffers.len());
        } else {
            let table = self.port_table_mut(inner, port);
            debug_assert_eq!(table.count_we_own(), table.buffers.len());
            table.status = PortStatus::Enabled;
        }

        match inner.state {
            LifecycleState::Reconfiguring => {
                debug_assert_eq!(port, Port::Output);
                if let Err(e) = self.disable_port_async(inner, Port::Output) {
                    tracing::error!(error = %e, "disabling output port after flush failed");
                    self.set_state(inner, LifecycleState::Error);
                }
            }
            LifecycleState::ExecutingToIdle => {
                if inner.input.status == PortStatus::Enabled && inner.output.status == PortStatus::Enabled {
                    inner.input.status = PortStatus::ShuttingDown;
                    inner.output.status = PortStatus::ShuttingDown;
                    if let Err(e) = self.backend.send_command(Command::StateSet(TargetState::Idle)) {
                        tracing::error!(error = %e, "requesting idle after shutdown flush failed");
                        self.set_state(inner, LifecycleState::Error);
                    }
                }
            }
            _ => {
                // A seek-triggered flush: resume pulling from the source once both ports have
                // come all the way back to `Enabled`.
                if inner.input.status == PortStatus::Enabled && inner.output.status == PortStatus::Enabled {
                    inner.paused = false;
                    if let Err(e) = input_pump::drain_input_buffers(self, inner) {
                        tracing::error!(error = %e, "refilling input after seek failed");
                        self.set_state(inner, LifecycleState::Error);
                    } else if inner.state == LifecycleState::Executing {
                        if let Err(e) = output_pump::fill_output_buffers(self, inner) {
                            tracing::error!(error = %e, "refilling output after seek failed");
                            self.set_state(inner, LifecycleState::Error);
                        }
                    }
                    self.buffer_filled.notify_all();
                }
            }
        }
    }

    /// The single entry point the backend's callback thread ever calls into, via
    /// [`EventRouter`]. Dispatches on the event kind, taking the monitor lock for the duration.
    fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::CmdComplete(BackendCmdComplete::StateSet(ack)) => {
                let mut inner = self.lock();
                self.on_state_ack(&mut inner, ack);
            }
            BackendEvent::CmdComplete(BackendCmdComplete::PortDisable(port)) => {
                let mut inner = self.lock();
                self.on_port_disable_complete(&mut inner, port);
            }
            BackendEvent::CmdComplete(BackendCmdComplete::PortEnable(port)) => {
                let mut inner = self.lock();
                self.on_port_enable_complete(&mut inner, port);
            }
            BackendEvent::CmdComplete(BackendCmdComplete::Flush(port)) => {
                let mut inner = self.lock();
                self.on_flush_complete(&mut inner, port);
            }
            BackendEvent::PortSettingsChanged(port) => {
                let mut inner = self.lock();
                self.on_port_settings_changed(&mut inner, port);
            }
            BackendEvent::Error => {
                let mut inner = self.lock();
                self.set_state(&mut inner, LifecycleState::Error);
            }
            BackendEvent::EmptyBufferDone(handle) => {
                let mut inner = self.lock();
                self.on_empty_buffer_done(&mut inner, handle);
            }
            BackendEvent::FillBufferDone(ev) => {
                let mut inner = self.lock();
                self.on_fill_buffer_done(&mut inner, ev);
            }
        }
    }

    fn on_state_ack(&self, inner: &mut Inner<S>, ack: StateAck) {
        match ack {
            StateAck::Idle => {
                if inner.state == LifecycleState::LoadedToIdle {
                    if let Err(e) = self.backend.send_command(Command::StateSet(TargetState::Executing)) {
                        tracing::error!(error = %e, "requesting executing after idle failed");
                        self.set_state(inner, LifecycleState::Error);
                        return;
                    }
                    self.set_state(inner, LifecycleState::IdleToExecuting);
                } else {
                    debug_assert_eq!(inner.state, LifecycleState::ExecutingToIdle);
                    debug_assert_eq!(inner.input.count_we_own(), inner.input.buffers.len());
                    debug_assert_eq!(inner.output.count_we_own(), inner.output.buffers.len());

                    if let Err(e) = self.backend.send_command(Command::StateSet(TargetState::Loaded)) {
                        tracing::error!(error = %e, "requesting loaded after idle failed");
                        self.set_state(inner, LifecycleState::Error);
                        return;
                    }
                    if let Err(e) = inner.input.free(&self.backend, false) {
                        tracing::error!(error = %e, "freeing input buffers on teardown failed");
                    }
                    if let Err(e) = inner.output.free(&self.backend, false) {
                        tracing::error!(error = %e, "freeing output buffers on teardown failed");
                    }
                    inner.input.status = PortStatus::Enabled;
                    inner.output.status = PortStatus::Enabled;
                    self.set_state(inner, LifecycleState::IdleToLoaded);
                }
            }
            StateAck::Executing => {
                debug_assert_eq!(inner.state, LifecycleState::IdleToExecuting);
                self.set_state(inner, LifecycleState::Executing);
            }
            StateAck::Loaded => {
                debug_assert_eq!(inner.state, LifecycleState::IdleToLoaded);
                self.set_state(inner, LifecycleState::Loaded);
            }
            StateAck::Pause => {
                debug_assert_eq!(inner.state, LifecycleState::ExecutingToIdle);
                self.set_state(inner, LifecycleState::Paused);
            }
            StateAck::Invalid => {
                self.set_state(inner, LifecycleState::Error);
            }
        }
    }

    fn on_port_disable_complete(&self, inner: &mut Inner<S>, port: Port) {
        if inner.state == LifecycleState::Error {
            return;
        }
        debug_assert!(matches!(inner.state, LifecycleState::Executing | LifecycleState::Reconfiguring));

        {
            let table = self.port_table_mut(inner, port);
            debug_assert_eq!(table.status, PortStatus::Disabling);
            debug_assert!(table.buffers.is_empty());
            table.status = PortStatus::Disabled;
        }

        if inner.state == LifecycleState::Reconfiguring {
            debug_assert_eq!(port, Port::Output);
            if let Err(e) = self.enable_port_async(inner, Port::Output) {
                tracing::error!(error = %e, "re-enabling output port failed");
                self.set_state(inner, LifecycleState::Error);
                return;
            }
            if let Err(e) = inner.output.allocate(&self.backend, &self.config) {
                tracing::error!(error = %e, "reallocating output buffers failed");
                self.set_state(inner, LifecycleState::Error);
            }
        }
    }

    fn on_port_enable_complete(&self, inner: &mut Inner<S>, port: Port) {
        if inner.state == LifecycleState::Error {
            return;
        }
        {
            let table = self.port_table_mut(inner, port);
            debug_assert_eq!(table.status, PortStatus::Enabling);
            table.status = PortStatus::Enabled;
        }

        if inner.state == LifecycleState::Reconfiguring {
            debug_assert_eq!(port, Port::Output);
            self.set_state(inner, LifecycleState::Executing);
            if let Err(e) = output_pump::fill_output_buffers(self, inner) {
                tracing::error!(error = %e, "refilling output after reconfiguration failed");
                self.set_state(inner, LifecycleState::Error);
            }
        }
    }

    fn on_port_settings_changed(&self, inner: &mut Inner<S>, port: Port) {
        if inner.state != LifecycleState::Executing {
            tracing::warn!(?port, state = ?inner.state, "ignoring port settings change outside Executing");
            return;
        }
        debug_assert_eq!(port, Port::Output);
        self.set_state(inner, LifecycleState::Reconfiguring);

        let needs_flush_first = self.config.quirks.contains(Quirks::FLUSH_BEFORE_DISABLE);

        if needs_flush_first {
            match self.flush_port_async(inner, Port::Output) {
                Ok(true) => {}
                Ok(false) => self.on_flush_complete(inner, Port::Output),
                Err(e) => {
                    tracing::error!(error = %e, "flushing output before disable failed");
                    self.set_state(inner, LifecycleState::Error);
                }
            }
        } else if let Err(e) = self.disable_port_async(inner, Port::Output) {
            tracing::error!(error = %e, "disabling output port failed");
            self.set_state(inner, LifecycleState::Error);
        }
    }

    fn on_empty_buffer_done(&self, inner: &mut Inner<S>, handle: crate::backend::BufferHandle) {
        let Some(idx) = inner.input.find_by_handle(handle) else {
            tracing::warn!("empty buffer done for an unknown handle");
            return;
        };
        if inner.input.buffers[idx].owned_by_component {
            inner.input.buffers[idx].owned_by_component = false;
        } else {
            tracing::warn!("empty buffer done for a buffer we already own");
        }
        inner.input.buffers[idx].source_buffer = None;

        match inner.input.status {
            PortStatus::Disabling => {
                if let Err(e) = self.backend.free_buffer(Port::Input, handle) {
                    tracing::error!(error = %e, "freeing input buffer during port disable failed");
                    self.set_state(inner, LifecycleState::Error);
                    return;
                }
                inner.input.buffers.remove(idx);
            }
            PortStatus::ShuttingDown => {}
            _ => {
                if inner.state != LifecycleState::Error {
                    debug_assert_eq!(inner.input.status, PortStatus::Enabled);
                    if let Err(e) = input_pump::drain_input_buffer(self, inner, idx) {
                        tracing::error!(error = %e, "refilling input buffer failed");
                        self.set_state(inner, LifecycleState::Error);
                    }
                }
            }
        }
    }

    fn on_fill_buffer_done(&self, inner: &mut Inner<S>, ev: crate::backend::FillBufferDoneEvent) {
        let Some(idx) = inner.output.find_by_handle(ev.handle) else {
            tracing::warn!("fill buffer done for an unknown handle");
            return;
        };
        if inner.output.buffers[idx].owned_by_component {
            inner.output.buffers[idx].owned_by_component = false;
        } else {
            tracing::warn!("fill buffer done for a buffer we already own");
        }

        match inner.output.status {
            PortStatus::Disabling => {
                if let Err(e) = inner.output.free_output_port_if_all_are_with_us(&self.backend) {
                    tracing::error!(error = %e, "freeing output buffer during port disable failed");
                    self.set_state(inner, LifecycleState::Error);
                }
            }
            PortStatus::ShuttingDown => {}
            _ => {
                debug_assert_eq!(inner.output.status, PortStatus::Enabled);
                output_pump::handle_fill_buffer_done(self, inner, idx, ev);
            }
        }
    }
}

/// The capability handed to the backend: an `EventSink` that forwards straight into
/// [`Shared::handle_event`], taking the monitor lock for the duration of the call.
pub(crate) struct EventRouter<B: ComponentBackend, S: UpstreamSource>(pub(crate) Arc<Shared<B, S>>);

impl<B: ComponentBackend + 'static, S: UpstreamSource + 'static> EventSink for EventRouter<B, S> {
    fn on_event(&self, event: BackendEvent) {
        self.0.handle_event(event);
    }
}

/// What `read()` hands back.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// An output buffer, ready for the consumer.
    Data(Deliverable),
    /// The output format changed; call `output_format()` and re-issue `read()`.
    FormatChanged,
    /// No more output will ever arrive on this run.
    EndOfStream,
}

/// The asynchronous mediator between a pull-based upstream source and a pull-based consumer,
/// through a buffer-oriented, event-driven codec component backend.
pub struct CodecCore<B: ComponentBackend + 'static, S: UpstreamSource + 'static> {
    shared: Arc<Shared<B, S>>,
}

impl<B: ComponentBackend + 'static, S: UpstreamSource + 'static> CodecCore<B, S> {
    /// Construct a core over `backend` and `source`, registering this core as the backend's
    /// event sink. `csd` seeds the Codec Specific Data Store; pass
    /// [`CodecSpecificDataStore::default`] if the stream carries none.
    pub fn new(backend: B, source: S, config: AdapterConfig, csd: CodecSpecificDataStore) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::new(csd)),
            async_completion: Condvar::new(),
            buffer_filled: Condvar::new(),
            backend,
            source,
            config,
        });
        shared.backend.set_event_sink(Some(Arc::new(EventRouter(Arc::clone(&shared)))));
        Self { shared }
    }

    /// A snapshot of the output port's current format.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.shared.lock().output_format.clone()
    }

    fn init(&self, mut inner: MutexGuard<'_, Inner<S>>) -> Result<(), CoreError<B::Error, S::Error>> {
        let after_alloc = self.shared.config.quirks.contains(Quirks::LOADED_TO_IDLE_AFTER_ALLOC);

        if !after_alloc {
            self.shared
                .backend
                .send_command(Command::StateSet(TargetState::Idle))
                .map_err(CoreError::Backend)?;
            self.shared.set_state(&mut inner, LifecycleState::LoadedToIdle);
        }

        if inner.input.allocate(&self.shared.backend, &self.shared.config).is_err() {
            self.shared.set_state(&mut inner, LifecycleState::Error);
            return Err(CoreError::NoMemory);
        }
        if inner.output.allocate(&self.shared.backend, &self.shared.config).is_err() {
            self.shared.set_state(&mut inner, LifecycleState::Error);
            return Err(CoreError::NoMemory);
        }

        if after_alloc {
            self.shared
                .backend
                .send_command(Command::StateSet(TargetState::Idle))
                .map_err(CoreError::Backend)?;
            self.shared.set_state(&mut inner, LifecycleState::LoadedToIdle);
        }

        while !matches!(inner.state, LifecycleState::Executing | LifecycleState::Error) {
            inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
        }

        if inner.state == LifecycleState::Error {
            Err(CoreError::UnknownError)
        } else {
            Ok(())
        }
    }

    /// `start()`: begins, or resumes from `pause()`, decoding/encoding.
    pub fn start(&self, options: StartOptions) -> Result<(), CoreError<B::Error, S::Error>> {
        let mut inner = self.shared.lock();

        if inner.is_paused_resumable {
            while inner.state.is_intermediate() {
                inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
            }
            debug_assert_eq!(inner.state, LifecycleState::Paused);

            self.shared
                .backend
                .send_command(Command::StateSet(TargetState::Executing))
                .map_err(CoreError::Backend)?;
            self.shared.set_state(&mut inner, LifecycleState::IdleToExecuting);
            inner.is_paused_resumable = false;
            inner.paused = false;

            while !matches!(inner.state, LifecycleState::Executing | LifecycleState::Error) {
                inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
            }
            return if inner.state == LifecycleState::Error { Err(CoreError::UnknownError) } else { Ok(()) };
        }

        if inner.state != LifecycleState::Loaded {
            return Err(CoreError::InvalidState("start() requires the Loaded state"));
        }

        self.shared.source.start(options).map_err(CoreError::Source)?;

        inner.csd.reset_cursor();
        inner.initial_buffer_submit = true;
        inner.signalled_eos = false;
        inner.no_more_output_data = false;
        inner.output_format_changed = false;
        inner.seek = None;
        inner.skip_time_us = None;
        inner.target_time_us = None;
        inner.final_status = None;
        inner.filled_queue.clear();
        inner.paused = false;

        self.init(inner)
    }

    /// `pause()`: suspends delivery, keeping buffers allocated for a cheap `start()` resume.
    pub fn pause(&self) -> Result<(), CoreError<B::Error, S::Error>> {
        let mut inner = self.shared.lock();
        if inner.state != LifecycleState::Executing {
            return Err(CoreError::InvalidState("pause() requires the Executing state"));
        }

        self.shared
            .backend
            .send_command(Command::StateSet(TargetState::Pause))
            .map_err(CoreError::Backend)?;
        self.shared.set_state(&mut inner, LifecycleState::ExecutingToIdle);
        inner.is_paused_resumable = true;
        inner.paused = true;

        while !matches!(inner.state, LifecycleState::Paused | LifecycleState::Error) {
            inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
        }
        if inner.state == LifecycleState::Error { Err(CoreError::UnknownError) } else { Ok(()) }
    }

    /// `stop()`: tears down to `Loaded`, freeing buffers. A no-op from `Loaded` or `Error`.
    pub fn stop(&self) -> Result<(), CoreError<B::Error, S::Error>> {
        let mut inner = self.shared.lock();
        while inner.state.is_intermediate() {
            inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
        }

        match inner.state {
            LifecycleState::Loaded | LifecycleState::Error => {}
            LifecycleState::Paused | LifecycleState::Executing => {
                if self.shared.config.component_kind == ComponentKind::Encoder
                    && self.shared.config.quirks.contains(Quirks::REQUIRES_EOS_ON_STOP)
                {
                    inner = input_pump::send_explicit_eos(&self.shared, inner).map_err(CoreError::Backend)?;
                }

                self.shared.set_state(&mut inner, LifecycleState::ExecutingToIdle);
                inner.is_paused_resumable = false;

                if self.shared.config.quirks.contains(Quirks::FLUSH_BEFORE_SHUTDOWN) {
                    match self.shared.flush_port_async(&mut inner, Port::Both) {
                        Ok(true) => {}
                        Ok(false) => self.shared.on_flush_complete(&mut inner, Port::Both),
                        Err(e) => return Err(CoreError::Backend(e)),
                    }
                } else {
                    inner.input.status = PortStatus::ShuttingDown;
                    inner.output.status = PortStatus::ShuttingDown;
                    self.shared
                        .backend
                        .send_command(Command::StateSet(TargetState::Idle))
                        .map_err(CoreError::Backend)?;
                }

                while !matches!(inner.state, LifecycleState::Loaded | LifecycleState::Error) {
                    inner = self.shared.async_completion.wait(inner).unwrap_or_else(|p| p.into_inner());
                }
            }
            other => unreachable!("stop() observed the intermediate state {other:?} after waiting"),
        }

        inner.leftover = None;
        drop(inner);
        self.shared.source.stop();
        Ok(())
    }

    /// `read()`: pull the next output buffer, optionally first seeking and/or skipping ahead.
    pub fn read(&self, options: crate::source::ReadOptions) -> Result<ReadOutcome, CoreError<B::Error, S::Error>> {
        let mut inner = self.shared.lock();
        if !matches!(inner.state, LifecycleState::Executing | LifecycleState::Reconfiguring) {
            return Err(CoreError::InvalidState("read() requires Executing or Reconfiguring"));
        }

        let mut seeking = options.seek.is_some();
        if seeking {
            inner.seek = options.seek;
        }
        inner.skip_time_us = options.skip_time_us;

        if inner.initial_buffer_submit {
            inner.initial_buffer_submit = false;
            if seeking {
                // Nothing has been submitted yet, so there is nothing to flush: the seek bookmark
                // is simply consumed by the first drain below instead of via a flush round-trip.
                seeking = false;
                inner.paused = false;
            }
            input_pump::drain_input_buffers(&self.shared, &mut inner)?;
            if inner.state == LifecycleState::Executing {
                output_pump::fill_output_buffers(&self.shared, &mut inner)?;
            }
        }

        if seeking {
            inner.signalled_eos = false;
            inner.no_more_output_data = false;
            inner.filled_queue.clear();
            debug_assert_eq!(inner.state, LifecycleState::Executing);

            match self.shared.flush_port_async(&mut inner, Port::Both) {
                Ok(true) => {}
                Ok(false) => self.shared.on_flush_complete(&mut inner, Port::Both),
                Err(e) => return Err(CoreError::Backend(e)),
            }

            while inner.input.status != PortStatus::Enabled || inner.output.status != PortStatus::Enabled {
                if inner.state == LifecycleState::Error {
                    return Err(CoreError::UnknownError);
                }
                inner = self.shared.buffer_filled.wait(inner).unwrap_or_else(|p| p.into_inner());
            }
        }

        while inner.state != LifecycleState::Error
            && !inner.no_more_output_data
            && !inner.output_format_changed
            && inner.filled_queue.is_empty()
        {
            inner = self.shared.buffer_filled.wait(inner).unwrap_or_else(|p| p.into_inner());
        }

        if inner.state == LifecycleState::Error {
            return Err(CoreError::UnknownError);
        }

        if inner.output_format_changed {
            inner.output_format_changed = false;
            return Ok(ReadOutcome::FormatChanged);
        }

        if let Some(idx) = inner.filled_queue.pop_front() {
            inner.output.buffers[idx].delivered = true;
            let deliverable = inner.output.buffers[idx]
                .bound_media_buffer
                .clone()
                .expect("a queued output buffer always carries a bound deliverable");
            return Ok(ReadOutcome::Data(deliverable));
        }

        match inner.final_status.take() {
            Some(e) => Err(CoreError::Source(e)),
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    /// Return a previously delivered buffer, making it eligible for refill.
    pub fn signal_buffer_returned(&self, deliverable: &Deliverable) -> Result<(), CoreError<B::Error, S::Error>> {
        let mut inner = self.shared.lock();
        let idx = deliverable.buffer_index;
        if idx >= inner.output.buffers.len() || inner.output.buffers[idx].handle != deliverable.meta.buffer_id {
            return Err(CoreError::InvalidState("signal_buffer_returned() for a stale deliverable"));
        }

        debug_assert!(inner.output.buffers[idx].delivered);
        inner.output.buffers[idx].delivered = false;

        match inner.output.status {
            PortStatus::Enabled => {
                output_pump::fill_output_buffer(&self.shared, &mut inner, idx).map_err(CoreError::Backend)?;
            }
            PortStatus::Disabling => {
                inner.output.free_output_port_if_all_are_with_us(&self.shared.backend).map_err(CoreError::Backend)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl<B: ComponentBackend + 'static, S: UpstreamSource + 'static> Drop for CodecCore<B, S> {
    fn drop(&mut self) {
        self.shared.backend.set_event_sink(None);
        if let Err(e) = self.shared.backend.free_node() {
            tracing::error!(error = %e, "freeing backend node on teardown failed");
        }
    }
}
