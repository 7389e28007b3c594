// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! Output format snapshots, and the comparison the Output Pump (C7) uses to decide whether a
//! port-settings-change is worth surfacing to the consumer as `FormatChanged`.

pub const MIME_VIDEO_AVC: &str = "video/avc";

/// The four-byte Annex B NAL unit start code prefixed ahead of AVC codec-specific-data and
/// payload when the component does not want raw NAL fragments.
pub const AVC_NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// The observable portion of a video output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: i32,
    pub height: i32,
    pub color_format: i32,
}

/// The observable portion of an audio output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: i32,
    pub sample_rate: i32,
}

/// A snapshot of the output port's format, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub mime: String,
    pub video: Option<VideoFormat>,
    pub audio: Option<AudioFormat>,
}

/// Has the format changed in any way the consumer would need to be aware of?
///
/// MIME always matters; beyond that, only the fields meaningful to raw video/audio output are
/// compared, mirroring the original's `formatHasNotablyChanged`.
pub fn format_has_notably_changed(from: Option<&OutputFormat>, to: Option<&OutputFormat>) -> bool {
    match (from, to) {
        (None, None) => false,
        (None, Some(_)) | (Some(_), None) => true,
        (Some(from), Some(to)) => {
            if !from.mime.eq_ignore_ascii_case(&to.mime) {
                return true;
            }
            match (from.video, to.video) {
                (Some(a), Some(b)) if a != b => return true,
                _ => {}
            }
            match (from.audio, to.audio) {
                (Some(a), Some(b)) if a != b => return true,
                _ => {}
            }
            false
        }
    }
}
