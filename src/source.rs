// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The upstream source interface: a blocking, pull-based producer of timestamped byte ranges.
//!
//! This is an external collaborator, not something this crate implements — see `UpstreamSource`.

use std::fmt::Debug;

/// How a caller-requested seek should be resolved against the source's own sync-frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Land on the sync frame at or before the requested time.
    ClosestSync,
    /// Land on the sample closest to the requested time, sync or not.
    Closest,
    /// Land on the next sync frame at or after the requested time.
    NextSync,
    /// Land on the previous sync frame strictly before the requested time.
    PreviousSync,
}

/// Hints passed to [`UpstreamSource::start`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Start position, in microseconds, if not zero.
    pub time_us: Option<i64>,
    /// `true` if the component consuming this source's output wants raw NAL units rather than
    /// `00 00 00 01`-prefixed ones (mirrors [`crate::def::Quirks::WANTS_NAL_FRAGMENTS`]).
    pub wants_nal_fragments: bool,
}

/// Per-read options: an optional seek and/or forward skip.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub seek: Option<(i64, SeekMode)>,
    pub skip_time_us: Option<i64>,
}

/// An error returned by [`UpstreamSource::read`].
///
/// The split between the two variants matters: `CorruptRecoverable` is swallowed by the Input
/// Pump and the read is retried, while `Fatal` is treated as natural end of stream (see the error
/// handling table this crate's specification defines).
#[derive(Debug, thiserror::Error)]
pub enum SourceReadError<E: std::error::Error + Send + Sync + 'static> {
    /// A single corrupt access unit (e.g. a malformed NAL) was skipped; retry.
    #[error("corrupt input unit, skipped")]
    CorruptRecoverable,
    /// Any other failure, including ordinary end of stream; not distinguished from one another
    /// because both result in the same natural-EOS handling.
    #[error(transparent)]
    Fatal(#[from] E),
}

/// One buffer read from the upstream source.
///
/// `release()` from the interface this models is expressed as ownership: dropping a
/// `SourceBuffer` runs its release callback exactly once.
pub struct SourceBuffer {
    data: std::sync::Arc<[u8]>,
    pub range_offset: usize,
    pub range_length: usize,
    /// Presentation time, in microseconds.
    pub time_us: i64,
    /// Post-seek target time hint, present only on the first buffer read after a seek.
    pub target_time_us: Option<i64>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SourceBuffer {
    /// Build a buffer backed by `data`, to be released via `on_release` when dropped.
    pub fn new(
        data: std::sync::Arc<[u8]>,
        range_offset: usize,
        range_length: usize,
        time_us: i64,
        target_time_us: Option<i64>,
        on_release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            data,
            range_offset,
            range_length,
            time_us,
            target_time_us,
            release: Some(Box::new(on_release)),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[self.range_offset..self.range_offset + self.range_length]
    }

    /// For the zero-copy input quirks: a clone of the backing storage, independent of the
    /// `[range_offset, range_length)` view, kept alive for as long as the component needs it.
    pub fn backing(&self) -> std::sync::Arc<[u8]> {
        std::sync::Arc::clone(&self.data)
    }
}

impl Drop for SourceBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Debug for SourceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBuffer")
            .field("range_offset", &self.range_offset)
            .field("range_length", &self.range_length)
            .field("time_us", &self.time_us)
            .field("target_time_us", &self.target_time_us)
            .finish()
    }
}

/// A blocking, pull-based media source.
///
/// Implementations are expected to be safely callable from the thread that drives the Input
/// Pump; the core never calls into a source concurrently with itself, but does hold its monitor
/// lock across the call (see the concurrency model this crate's specification lays out).
pub trait UpstreamSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn start(&self, options: StartOptions) -> Result<(), Self::Error>;

    fn stop(&self);

    fn read(&self, options: ReadOptions) -> Result<SourceBuffer, SourceReadError<Self::Error>>;
}
