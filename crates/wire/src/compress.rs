// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topology/inventory blob compression.
//!
//! The compression decision travels as an explicit flag packed ahead of
//! the byte object; receivers decompress only when the flag is set and
//! never sniff magic numbers.

use crate::buffer::WireError;

/// Blobs below this size are never worth compressing.
const COMPRESS_THRESHOLD: usize = 512;

/// Compress when beneficial.
///
/// Returns `(true, compressed)` when compression was applied and
/// actually shrank the payload, `(false, original)` otherwise.
pub fn maybe_compress(data: &[u8]) -> (bool, Vec<u8>) {
    if data.len() < COMPRESS_THRESHOLD {
        return (false, data.to_vec());
    }
    match zstd::bulk::compress(data, 0) {
        Ok(compressed) if compressed.len() < data.len() => (true, compressed),
        _ => (false, data.to_vec()),
    }
}

/// Inverse of [`maybe_compress`]; called only when the wire flag says
/// the payload is compressed.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    zstd::stream::decode_all(data).map_err(|_| WireError::Decompress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_blobs_are_left_alone() {
        let data = b"tiny".to_vec();
        let (compressed, out) = maybe_compress(&data);
        assert!(!compressed);
        assert_eq!(out, data);
    }

    #[test]
    fn compressible_blobs_round_trip() {
        let data = vec![7u8; 64 * 1024];
        let (compressed, out) = maybe_compress(&data);
        assert!(compressed);
        assert!(out.len() < data.len());
        assert_eq!(decompress(&out).unwrap(), data);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        assert!(decompress(&[1, 2, 3, 4]).is_err());
    }
}
