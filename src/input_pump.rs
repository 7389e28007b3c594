// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The Input Pump (C6): keeps every input buffer not currently owned by the component topped up
//! from the codec-specific-data store and then the upstream source.

use std::sync::MutexGuard;

use crate::backend::ComponentBackend;
use crate::core::{Inner, Shared};
use crate::def::{BufferFlags, LifecycleState, Port, Quirks};
use crate::error::CoreError;
use crate::format::{AVC_NAL_START_CODE, MIME_VIDEO_AVC};
use crate::source::{ReadOptions, SeekMode, SourceReadError, UpstreamSource};

/// Top up every input buffer not owned by the component, capped by
/// [`crate::config::AdapterConfig::max_buffers_to_drain`].
pub(crate) fn drain_input_buffers<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
) -> Result<(), CoreError<B::Error, S::Error>> {
    if inner.signalled_eos {
        return Ok(());
    }

    let mut once_seek = inner.seek.take();
    let mut once_skip = inner.skip_time_us.take();

    let candidates: Vec<usize> = inner
        .input
        .buffers
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.owned_by_component)
        .map(|(i, _)| i)
        .collect();
    let limit = shared.config.max_buffers_to_drain.unwrap_or(candidates.len());

    for idx in candidates.into_iter().take(limit) {
        if inner.signalled_eos {
            break;
        }
        drain_one(shared, inner, idx, &mut once_seek, &mut once_skip)?;
    }
    Ok(())
}

/// Top up a single input buffer, as a response to its own `EmptyBufferDone`.
pub(crate) fn drain_input_buffer<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
    idx: usize,
) -> Result<(), CoreError<B::Error, S::Error>> {
    let mut no_seek = None;
    let mut no_skip = None;
    drain_one(shared, inner, idx, &mut no_seek, &mut no_skip)
}

fn drain_one<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
    idx: usize,
    once_seek: &mut Option<(i64, SeekMode)>,
    once_skip: &mut Option<i64>,
) -> Result<(), CoreError<B::Error, S::Error>> {
    if inner.paused {
        return Ok(());
    }

    if let Some(blob) = inner.csd.take_next() {
        return submit_csd(shared, inner, idx, blob.to_vec());
    }

    if inner.signalled_eos {
        return Ok(());
    }

    let is_avc = shared.config.mime == MIME_VIDEO_AVC;
    let prefix_nal = is_avc && !shared.config.quirks.contains(Quirks::WANTS_NAL_FRAGMENTS);
    let coalesce = shared.config.quirks.contains(Quirks::COALESCE_INPUT);
    let zero_copy = shared.config.quirks.intersects(Quirks::ZERO_COPY_INPUT | Quirks::STORE_METADATA_IN_INPUT);
    debug_assert!(!coalesce || !zero_copy, "zero-copy input is incompatible with coalescing");

    let capacity = inner.input.buffers[idx].capacity;
    let mut offset = 0usize;
    let mut first_time_us = 0i64;
    let mut wrote_any = false;
    let mut flags = BufferFlags::empty();

    let mut leftover = inner.leftover.take();
    if once_seek.is_some() {
        // A pending seek takes priority over a carried-over overflow buffer from a previous
        // coalesce: discard it rather than feeding stale pre-seek data into the post-seek stream.
        leftover = None;
    }

    loop {
        let source_buffer = if let Some(buf) = leftover.take() {
            buf
        } else {
            let options = ReadOptions { seek: once_seek.take(), skip_time_us: once_skip.take() };
            match shared.source.read(options) {
                Ok(buf) => buf,
                Err(SourceReadError::CorruptRecoverable) => continue,
                Err(SourceReadError::Fatal(e)) => {
                    inner.signalled_eos = true;
                    inner.final_status = Some(e);
                    flags |= BufferFlags::EOS;
                    break;
                }
            }
        };

        let frame_time_us = source_buffer.time_us;
        let mut needed = source_buffer.range_length;
        if prefix_nal {
            needed += AVC_NAL_START_CODE.len();
        }

        if offset + needed > capacity {
            if offset == 0 {
                shared.set_state(inner, LifecycleState::Error);
                return Err(CoreError::OversizeInput { needed, available: capacity });
            }
            inner.leftover = Some(source_buffer);
            break;
        }

        if let Some(target) = source_buffer.target_time_us {
            inner.target_time_us = Some(target);
        }

        if zero_copy {
            let data = source_buffer.backing();
            shared
                .backend
                .rebind_buffer_memory(Port::Input, inner.input.buffers[idx].handle, data, source_buffer.range_offset, source_buffer.range_length)
                .map_err(CoreError::Backend)?;
            offset += source_buffer.range_length;
            inner.input.buffers[idx].source_buffer = Some(source_buffer);
        } else {
            let mem = inner.input.buffers[idx]
                .data
                .clone()
                .expect("an input buffer without local memory cannot be written to directly");
            let mut guard = mem.lock().unwrap_or_else(|p| p.into_inner());
            if prefix_nal {
                guard[offset..offset + AVC_NAL_START_CODE.len()].copy_from_slice(&AVC_NAL_START_CODE);
                offset += AVC_NAL_START_CODE.len();
            }
            guard[offset..offset + source_buffer.range_length].copy_from_slice(source_buffer.bytes());
            offset += source_buffer.range_length;
        }

        if !wrote_any {
            first_time_us = frame_time_us;
        }
        wrote_any = true;
        flags |= BufferFlags::END_OF_FRAME;

        if !coalesce {
            break;
        }
        if (frame_time_us - first_time_us).abs() >= shared.config.coalesce_duration_us {
            break;
        }
        if offset >= capacity {
            break;
        }
    }

    if shared.config.quirks.contains(Quirks::THUMBNAIL_MODE) && wrote_any && !inner.signalled_eos {
        flags |= BufferFlags::EOS;
        inner.signalled_eos = true;
    }

    if !wrote_any {
        if inner.signalled_eos {
            if shared.config.quirks.contains(Quirks::NO_OUTPUT_EOS) {
                inner.no_more_output_data = true;
                shared.buffer_filled.notify_all();
                return Ok(());
            }
            let handle = inner.input.buffers[idx].handle;
            inner.input.buffers[idx].owned_by_component = true;
            shared.backend.empty_buffer(handle, 0, 0, flags, first_time_us).map_err(CoreError::Backend)?;
        } else {
            // Nothing read and no leftover carried forward; this only happens if the source
            // returned nothing and nothing was pending, which a blocking source should not do.
            inner.leftover = leftover;
        }
        return Ok(());
    }

    let handle = inner.input.buffers[idx].handle;
    inner.input.buffers[idx].owned_by_component = true;
    shared.backend.empty_buffer(handle, 0, offset, flags, first_time_us).map_err(CoreError::Backend)?;
    Ok(())
}

fn submit_csd<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
    idx: usize,
    blob: Vec<u8>,
) -> Result<(), CoreError<B::Error, S::Error>> {
    let is_avc = shared.config.mime == MIME_VIDEO_AVC;
    let prefix_nal = is_avc && !shared.config.quirks.contains(Quirks::WANTS_NAL_FRAGMENTS);

    let mut payload = Vec::with_capacity(blob.len() + if prefix_nal { AVC_NAL_START_CODE.len() } else { 0 });
    if prefix_nal {
        payload.extend_from_slice(&AVC_NAL_START_CODE);
    }
    payload.extend_from_slice(&blob);

    let mem = inner.input.buffers[idx]
        .data
        .clone()
        .expect("codec-specific-data injection requires a locally writable input buffer");
    {
        let mut guard = mem.lock().unwrap_or_else(|p| p.into_inner());
        let available = guard.len();
        if payload.len() > available {
            drop(guard);
            shared.set_state(inner, LifecycleState::Error);
            return Err(CoreError::OversizeInput { needed: payload.len(), available });
        }
        guard[..payload.len()].copy_from_slice(&payload);
    }

    let handle = inner.input.buffers[idx].handle;
    inner.input.buffers[idx].owned_by_component = true;
    shared
        .backend
        .empty_buffer(handle, 0, payload.len(), BufferFlags::CODEC_CONFIG, 0)
        .map_err(CoreError::Backend)
}

/// `stop()` on an encoder with `REQUIRES_EOS_ON_STOP`: wait for an input buffer to be ours, then
/// submit it carrying nothing but the EOS flag.
pub(crate) fn send_explicit_eos<'a, B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    mut inner: MutexGuard<'a, Inner<S>>,
) -> Result<MutexGuard<'a, Inner<S>>, B::Error> {
    loop {
        if let Some(idx) = inner.input.buffers.iter().position(|b| !b.owned_by_component) {
            let handle = inner.input.buffers[idx].handle;
            shared.backend.empty_buffer(handle, 0, 0, BufferFlags::END_OF_FRAME | BufferFlags::EOS, 0)?;
            inner.input.buffers[idx].owned_by_component = true;
            inner.signalled_eos = true;
            return Ok(inner);
        }
        inner = shared.buffer_filled.wait(inner).unwrap_or_else(|p| p.into_inner());
    }
}
