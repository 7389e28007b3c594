// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The deliverable: the object handed to the consumer from `read()`, carrying an output
//! buffer's payload range and metadata, and round-tripping back via `signal_buffer_returned`.

use std::any::Any;
use std::sync::Arc;

use crate::backend::BufferHandle;

/// Metadata accompanying a delivered output buffer.
#[derive(Debug, Clone, Default)]
pub struct DeliverableMeta {
    /// Presentation time, in microseconds.
    pub time_us: i64,
    pub is_sync_frame: bool,
    pub is_codec_config: bool,
    pub is_bframe: bool,
    pub is_unreadable: bool,
    pub platform_private: Option<Arc<dyn Any + Send + Sync>>,
    pub buffer_id: BufferHandle,
}

/// The payload an output buffer carries, bound lazily to its backend-owned pointer when the
/// component defers output allocation.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Memory this process can read directly.
    Local(Arc<[u8]>),
    /// The component never handed us readable memory (see
    /// [`crate::def::Quirks::STORE_METADATA_IN_INPUT`]-adjacent output quirks); callers must
    /// resolve `platform_private` themselves.
    Opaque,
}

/// A buffer delivered to the consumer from `read()`.
///
/// Dropping a `Deliverable` without calling
/// [`crate::CodecCore::signal_buffer_returned`] leaves the backing output buffer permanently
/// marked delivered; callers are expected to always return it exactly once, per the round-trip
/// contract this type exists to enforce at the type level is *not* automatic — there is no
/// `Drop` impl here, deliberately, since resubmission requires the monitor lock and a fallible
/// backend call that `Drop` cannot surface.
#[derive(Debug, Clone)]
pub struct Deliverable {
    pub(crate) buffer_index: usize,
    pub payload: Payload,
    pub range_offset: usize,
    pub range_length: usize,
    pub meta: DeliverableMeta,
}

impl Deliverable {
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Local(data) => Some(&data[self.range_offset..self.range_offset + self.range_length]),
            Payload::Opaque => None,
        }
    }
}
