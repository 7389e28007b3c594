// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The Output Pump (C7/C8): keeps every output buffer not owned by the component, and not out
//! with the consumer, queued up for filling; binds a `FillBufferDone` to a deliverable and
//! applies target-time skip-ahead after a seek.

use std::sync::Arc;

use crate::backend::{ComponentBackend, FillBufferDoneEvent};
use crate::core::{Inner, Shared};
use crate::def::{BufferFlags, PortStatus, Quirks};
use crate::deliverable::{Deliverable, DeliverableMeta, Payload};
use crate::error::CoreError;
use crate::source::UpstreamSource;

/// Submit every output buffer currently free (neither with the component nor out with the
/// consumer) for filling.
pub(crate) fn fill_output_buffers<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
) -> Result<(), CoreError<B::Error, S::Error>> {
    if inner.output.status != PortStatus::Enabled {
        return Ok(());
    }

    let candidates: Vec<usize> = inner
        .output
        .buffers
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.owned_by_component && !b.delivered)
        .map(|(i, _)| i)
        .collect();

    for idx in candidates {
        fill_output_buffer(shared, inner, idx).map_err(CoreError::Backend)?;
    }
    Ok(())
}

pub(crate) fn fill_output_buffer<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
    idx: usize,
) -> Result<(), B::Error> {
    if inner.output.status != PortStatus::Enabled {
        return Ok(());
    }
    let handle = inner.output.buffers[idx].handle;
    inner.output.buffers[idx].owned_by_component = true;
    shared.backend.fill_buffer(handle)
}

/// A `FillBufferDone` arrived for a buffer the Output Pump owns: bind its payload, apply
/// target-time skip-ahead, and either recycle it immediately or queue it for the consumer.
pub(crate) fn handle_fill_buffer_done<B: ComponentBackend, S: UpstreamSource>(
    shared: &Shared<B, S>,
    inner: &mut Inner<S>,
    idx: usize,
    ev: FillBufferDoneEvent,
) {
    if ev.flags.contains(BufferFlags::EOS) {
        inner.no_more_output_data = true;
        shared.buffer_filled.notify_all();
        if ev.range_length == 0 {
            // A pure end-of-stream marker, carrying no payload: nothing to deliver, and nothing
            // to resubmit either, since no more output will ever arrive on this buffer.
            return;
        }
    }

    // Recycle buffers that land before a pending seek target without ever surfacing them to
    // the consumer.
    if let Some(target) = inner.target_time_us {
        if ev.time_us < target {
            if let Err(e) = fill_output_buffer(shared, inner, idx) {
                tracing::error!(error = %e, "recycling a pre-target output buffer failed");
                shared.set_state(inner, crate::def::LifecycleState::Error);
            }
            return;
        }
        inner.target_time_us = None;
    }

    let handle = inner.output.buffers[idx].handle;
    let payload = match &inner.output.buffers[idx].data {
        Some(mem) => {
            let guard = mem.lock().unwrap_or_else(|p| p.into_inner());
            let start = ev.range_offset.min(guard.len());
            let end = (ev.range_offset + ev.range_length).min(guard.len());
            Payload::Local(Arc::from(&guard[start..end]))
        }
        None => Payload::Opaque,
    };

    inner.output.buffers[idx].bound_media_buffer = Some(Deliverable {
        buffer_index: idx,
        payload,
        range_offset: 0,
        range_length: ev.range_length,
        meta: DeliverableMeta {
            time_us: ev.time_us,
            is_sync_frame: ev.flags.contains(BufferFlags::SYNC_FRAME),
            is_codec_config: ev.flags.contains(BufferFlags::CODEC_CONFIG),
            is_bframe: false,
            is_unreadable: inner.output.buffers[idx].data.is_none(),
            platform_private: ev.platform_data,
            buffer_id: handle,
        },
    });

    // A component that never signals output EOS explicitly: once input is exhausted and every
    // output buffer has come back to us without any further output, there is nothing left to
    // wait for. Thumbnail mode wants exactly one buffer regardless of this shortcut, but it
    // already forces an EOS-carrying input buffer, so `no_more_output_data` is set by the EOS
    // flag check above instead.
    if shared.config.quirks.contains(Quirks::NO_OUTPUT_EOS)
        && !shared.config.quirks.contains(Quirks::THUMBNAIL_MODE)
        && inner.signalled_eos
        && inner.output.count_we_own() == inner.output.buffers.len()
    {
        inner.no_more_output_data = true;
    }

    inner.filled_queue.push_back(idx);
    shared.buffer_filled.notify_all();
}
