// Copyright 2024 Lyndon Brown
//
// This file is part of the codec adapter core.
//
// Licensed under the MIT license or the Apache license (version 2.0), at your option. You may not
// copy, modify, or distribute this file except in compliance with said license. You can find copies
// of these licenses either in the LICENSE-MIT and LICENSE-APACHE files, or alternatively at
// <http://opensource.org/licenses/MIT> and <http://www.apache.org/licenses/LICENSE-2.0>
// respectively.

//! The codec-specific-data store (C3): an ordered, append-only sequence of pre-stream
//! configuration blobs injected by the Input Pump before any payload.

/// A malformed codec-configuration record.
#[derive(Debug, thiserror::Error)]
pub enum CsdParseError {
    #[error("AVCDecoderConfigurationRecord too short ({0} bytes)")]
    AvcTooShort(usize),
    #[error("unsupported AVCDecoderConfigurationRecord version ({0})")]
    AvcBadVersion(u8),
    #[error("AVCDecoderConfigurationRecord truncated mid SPS/PPS table")]
    AvcTruncated,
}

/// Ordered codec-specific-data blobs and the cursor tracking how many the Input Pump has
/// already emitted.
#[derive(Debug, Default)]
pub struct CodecSpecificDataStore {
    blobs: Vec<Vec<u8>>,
    next_to_emit: usize,
}

impl CodecSpecificDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store directly from one already-extracted blob (the `kKeyRawCodecSpecificData`
    /// case: a single opaque blob, no further parsing).
    pub fn from_single_blob(data: impl Into<Vec<u8>>) -> Self {
        let mut store = Self::new();
        store.push(data.into());
        store
    }

    /// MPEG-4 ESDS decoder-specific-info: already exactly one blob by the time it reaches this
    /// store, so this is a thin alias over [`Self::from_single_blob`] kept distinct for callers
    /// that extracted it from an ESDS box rather than a raw `kKeyRawCodecSpecificData` value.
    pub fn from_esds_decoder_specific_info(data: impl Into<Vec<u8>>) -> Self {
        Self::from_single_blob(data)
    }

    /// Parse an AVCDecoderConfigurationRecord (ISO/IEC 14496-15) into one blob per SPS followed
    /// by one blob per PPS, in order.
    pub fn from_avc_decoder_configuration_record(data: &[u8]) -> Result<Self, CsdParseError> {
        if data.len() < 7 {
            return Err(CsdParseError::AvcTooShort(data.len()));
        }
        if data[0] != 1 {
            return Err(CsdParseError::AvcBadVersion(data[0]));
        }

        let mut store = Self::new();
        let num_sps = (data[5] & 0x1f) as usize;
        let mut cursor = &data[6..];

        for _ in 0..num_sps {
            cursor = take_length_prefixed(cursor, &mut store)?;
        }

        if cursor.is_empty() {
            return Err(CsdParseError::AvcTruncated);
        }
        let num_pps = cursor[0] as usize;
        cursor = &cursor[1..];

        for _ in 0..num_pps {
            cursor = take_length_prefixed(cursor, &mut store)?;
        }

        Ok(store)
    }

    fn push(&mut self, blob: Vec<u8>) {
        self.blobs.push(blob);
    }

    /// The next blob to emit, or `None` if the queue is exhausted. Advances the cursor.
    pub fn take_next(&mut self) -> Option<&[u8]> {
        let blob = self.blobs.get(self.next_to_emit)?;
        self.next_to_emit += 1;
        Some(blob)
    }

    /// `true` once every blob has been handed to `take_next`.
    pub fn is_exhausted(&self) -> bool {
        self.next_to_emit >= self.blobs.len()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Rewind the cursor to the start, for a fresh `start()` cycle.
    pub fn reset_cursor(&mut self) {
        self.next_to_emit = 0;
    }
}

fn take_length_prefixed<'a>(
    cursor: &'a [u8],
    store: &mut CodecSpecificDataStore,
) -> Result<&'a [u8], CsdParseError> {
    if cursor.len() < 2 {
        return Err(CsdParseError::AvcTruncated);
    }
    let length = u16::from_be_bytes([cursor[0], cursor[1]]) as usize;
    let rest = &cursor[2..];
    if rest.len() < length {
        return Err(CsdParseError::AvcTruncated);
    }
    store.push(rest[..length].to_vec());
    Ok(&rest[length..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avcc(sps: &[&[u8]], pps: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![1u8, 0x42, 0x00, 0x1e, 0xff, 0xe0 | sps.len() as u8];
        for s in sps {
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s);
        }
        out.push(pps.len() as u8);
        for p in pps {
            out.extend_from_slice(&(p.len() as u16).to_be_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    #[test]
    fn parses_sps_then_pps_in_order() {
        let record = avcc(&[&[0xAA, 0xBB]], &[&[0xCC], &[0xDD, 0xEE]]);
        let mut store = CodecSpecificDataStore::from_avc_decoder_configuration_record(&record)
            .expect("valid record");
        assert_eq!(store.len(), 3);
        assert_eq!(store.take_next(), Some(&[0xAAu8, 0xBB][..]));
        assert_eq!(store.take_next(), Some(&[0xCCu8][..]));
        assert_eq!(store.take_next(), Some(&[0xDDu8, 0xEE][..]));
        assert!(store.is_exhausted());
    }

    #[test]
    fn rejects_short_record() {
        let err = CodecSpecificDataStore::from_avc_decoder_configuration_record(&[1, 2, 3]);
        assert!(matches!(err, Err(CsdParseError::AvcTooShort(3))));
    }

    #[test]
    fn single_blob_store_emits_once() {
        let mut store = CodecSpecificDataStore::from_single_blob(vec![1, 2, 3]);
        assert_eq!(store.take_next(), Some(&[1u8, 2, 3][..]));
        assert_eq!(store.take_next(), None);
    }
}
