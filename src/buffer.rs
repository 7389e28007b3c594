// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The Port Buffer Table (C1) and Port Status Tracker (C2): per-port buffer records, strict
//! ownership accounting, and the status state machine layered over a port's buffers.

use std::sync::Arc;
use std::sync::Mutex;

use crate::backend::{BufferHandle, ComponentBackend, SharedBufferMemory};
use crate::config::{AdapterConfig, PortAllocationStrategy};
use crate::def::{Port, PortStatus};
use crate::deliverable::Deliverable;
use crate::source::SourceBuffer;

/// One allocated buffer on a port.
pub struct BufferRecord {
    pub handle: BufferHandle,
    /// Our process-visible view of the buffer's memory, or `None` when the backend holds it
    /// privately (deferred output allocation).
    pub data: Option<SharedBufferMemory>,
    pub capacity: usize,
    /// Invariant: exactly one of `{we, the component}` owns a buffer at any moment.
    pub owned_by_component: bool,
    /// Set on the output port once the backend's pointer is known; carries payload/metadata to
    /// the consumer and round-trips back via `signal_buffer_returned`.
    pub bound_media_buffer: Option<Deliverable>,
    /// `true` while this buffer's deliverable is out with the consumer, not yet returned.
    pub delivered: bool,
    /// Pins the upstream buffer whose lifetime must extend until the component signals
    /// completion, for the zero-copy input quirks.
    pub source_buffer: Option<SourceBuffer>,
}

impl BufferRecord {
    fn new(handle: BufferHandle, data: Option<SharedBufferMemory>, capacity: usize) -> Self {
        Self {
            handle,
            data,
            capacity,
            owned_by_component: false,
            bound_media_buffer: None,
            delivered: false,
            source_buffer: None,
        }
    }
}

/// A port's buffer table plus its status.
pub struct PortTable {
    pub port: Port,
    pub status: PortStatus,
    pub buffers: Vec<BufferRecord>,
}

impl PortTable {
    pub fn new(port: Port) -> Self {
        Self { port, status: PortStatus::Enabled, buffers: Vec::new() }
    }

    pub fn find_by_handle(&self, handle: BufferHandle) -> Option<usize> {
        self.buffers.iter().position(|b| b.handle == handle)
    }

    pub fn count_we_own(&self) -> usize {
        self.buffers.iter().filter(|b| !b.owned_by_component).count()
    }

    /// Allocate buffers per the component's reported count/size, choosing an allocation mode
    /// from `config` for this port.
    pub fn allocate<B: ComponentBackend>(&mut self, backend: &B, config: &AdapterConfig) -> Result<(), B::Error> {
        let def = backend.port_definition(self.port)?;
        let strategy = match self.port {
            Port::Input => config.input_allocation,
            Port::Output => config.output_allocation,
            Port::Both => unreachable!("a single port table is never addressed as Both"),
        };

        for _ in 0..def.buffer_count_actual {
            let (handle, data) = match strategy {
                PortAllocationStrategy::BackendAllocated => backend.allocate_buffer(self.port, def.buffer_size)?,
                PortAllocationStrategy::BackendAllocatedWithBackup => {
                    let mem: SharedBufferMemory = Arc::new(Mutex::new(vec![0u8; def.buffer_size]));
                    let handle = backend.allocate_buffer_with_backup(self.port, Arc::clone(&mem))?;
                    (handle, Some(mem))
                }
                PortAllocationStrategy::UseBuffer => {
                    let mem: SharedBufferMemory = Arc::new(Mutex::new(vec![0u8; def.buffer_size]));
                    let handle = backend.use_buffer(self.port, Arc::clone(&mem))?;
                    (handle, Some(mem))
                }
            };

            let mut record = BufferRecord::new(handle, data, def.buffer_size);

            if self.port == Port::Output && !config.defers_output_allocation {
                record.bound_media_buffer = Some(Deliverable {
                    buffer_index: self.buffers.len(),
                    payload: crate::deliverable::Payload::Opaque,
                    range_offset: 0,
                    range_length: 0,
                    meta: crate::deliverable::DeliverableMeta { buffer_id: handle, ..Default::default() },
                });
            }

            self.buffers.push(record);
        }

        tracing::debug!(port = ?self.port, count = def.buffer_count_actual, size = def.buffer_size, "allocated port buffers");
        Ok(())
    }

    /// Free buffers owned by us, walking in reverse. If `only_owned_by_us` is false, every
    /// buffer must already be ours (the normal teardown path); otherwise component-owned
    /// entries are left untouched (a port-disable in progress).
    pub fn free<B: ComponentBackend>(&mut self, backend: &B, only_owned_by_us: bool) -> Result<(), B::Error> {
        let mut sticky = None;
        for i in (0..self.buffers.len()).rev() {
            if only_owned_by_us && self.buffers[i].owned_by_component {
                continue;
            }
            debug_assert!(!self.buffers[i].owned_by_component);
            debug_assert!(!self.buffers[i].delivered, "freeing a buffer with a live deliverable");

            let handle = self.buffers[i].handle;
            if let Err(e) = backend.free_buffer(self.port, handle) {
                sticky = Some(e);
            }
            self.buffers.remove(i);
        }

        if !only_owned_by_us {
            debug_assert!(self.buffers.is_empty());
        }

        match sticky {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `freeBuffersOnOutPortIfAllAreWithUs`: only meaningful on the output port. Sweeps the
    /// whole port in one call, but only once every buffer is back with us, including any still
    /// out with a live deliverable.
    pub fn free_output_port_if_all_are_with_us<B: ComponentBackend>(&mut self, backend: &B) -> Result<(), B::Error> {
        debug_assert_eq!(self.port, Port::Output);

        if self.count_we_own() != self.buffers.len() {
            tracing::trace!("some output buffers are still with the component");
            return Ok(());
        }
        if self.buffers.iter().any(|b| b.delivered) {
            tracing::trace!("some output buffers are still with the consumer");
            return Ok(());
        }
        self.free(backend, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentKind;
    use crate::def::BufferFlags;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Just enough of a `ComponentBackend` to drive `PortTable::allocate`/`free` in isolation;
    /// every method `PortTable` never calls is left unimplemented.
    struct StubBackend {
        next_handle: AtomicU64,
        buffer_count: usize,
        buffer_size: usize,
    }

    impl ComponentBackend for StubBackend {
        type Error = std::convert::Infallible;

        fn set_event_sink(&self, _sink: Option<Arc<dyn crate::backend::EventSink>>) {}

        fn port_definition(&self, _port: Port) -> Result<crate::backend::PortDefinition, Self::Error> {
            Ok(crate::backend::PortDefinition { buffer_count_actual: self.buffer_count, buffer_size: self.buffer_size })
        }

        fn output_format(&self) -> Result<crate::format::OutputFormat, Self::Error> {
            unimplemented!()
        }

        fn set_port_buffer_count(&self, _port: Port, _count: usize) -> Result<(), Self::Error> {
            unimplemented!()
        }

        fn allocate_buffer(&self, _port: Port, size: usize) -> Result<(BufferHandle, crate::backend::LocalBufferView), Self::Error> {
            let handle = BufferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            Ok((handle, Some(Arc::new(Mutex::new(vec![0u8; size])))))
        }

        fn allocate_buffer_with_backup(&self, _port: Port, _memory: SharedBufferMemory) -> Result<BufferHandle, Self::Error> {
            unimplemented!()
        }

        fn use_buffer(&self, _port: Port, _memory: SharedBufferMemory) -> Result<BufferHandle, Self::Error> {
            unimplemented!()
        }

        fn free_buffer(&self, _port: Port, _handle: BufferHandle) -> Result<(), Self::Error> {
            Ok(())
        }

        fn rebind_buffer_memory(
            &self,
            _port: Port,
            _handle: BufferHandle,
            _data: Arc<[u8]>,
            _offset: usize,
            _length: usize,
        ) -> Result<(), Self::Error> {
            unimplemented!()
        }

        fn empty_buffer(&self, _handle: BufferHandle, _offset: usize, _length: usize, _flags: BufferFlags, _time_us: i64) -> Result<(), Self::Error> {
            unimplemented!()
        }

        fn fill_buffer(&self, _handle: BufferHandle) -> Result<(), Self::Error> {
            unimplemented!()
        }

        fn send_command(&self, _cmd: crate::def::Command) -> Result<(), Self::Error> {
            unimplemented!()
        }

        fn get_parameter(&self, _index: u32, _out: &mut [u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn set_parameter(&self, _index: u32, _data: &[u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn get_config(&self, _index: u32, _out: &mut [u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn set_config(&self, _index: u32, _data: &[u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn get_extension_index(&self, _name: &str) -> Result<u32, Self::Error> {
            unimplemented!()
        }
        fn free_node(&self) -> Result<(), Self::Error> {
            unimplemented!()
        }
    }

    fn config_with(input_count: usize, buffer_size: usize) -> (AdapterConfig, StubBackend) {
        let config = AdapterConfig::new(ComponentKind::Decoder, "audio/raw", crate::def::Quirks::empty());
        let backend = StubBackend { next_handle: AtomicU64::new(1), buffer_count: input_count, buffer_size };
        (config, backend)
    }

    proptest! {
        /// However many buffers the backend reports, `allocate` produces exactly that many
        /// records, all starting out owned by us, and `free` empties the table back out again
        /// once none of them are held by the component or delivered.
        #[test]
        fn allocate_then_free_round_trips_cleanly(count in 1usize..16, size in 1usize..256) {
            let (config, backend) = config_with(count, size);
            let mut table = PortTable::new(Port::Input);

            table.allocate(&backend, &config).unwrap();
            prop_assert_eq!(table.buffers.len(), count);
            prop_assert!(table.buffers.iter().all(|b| !b.owned_by_component));
            prop_assert_eq!(table.count_we_own(), count);

            table.free(&backend, false).unwrap();
            prop_assert!(table.buffers.is_empty());
        }

        /// Buffers the component still owns are left untouched by a partial free.
        #[test]
        fn partial_free_only_reclaims_buffers_we_own(count in 2usize..16, size in 1usize..256) {
            let (config, backend) = config_with(count, size);
            let mut table = PortTable::new(Port::Input);
            table.allocate(&backend, &config).unwrap();

            table.buffers[0].owned_by_component = true;
            table.free(&backend, true).unwrap();

            prop_assert_eq!(table.buffers.len(), 1);
            prop_assert!(table.buffers[0].owned_by_component);
        }
    }
}
