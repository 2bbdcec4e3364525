//! Chunk Index Codec
//!
//! A partition file on the distributed store is published together with a
//! sidecar index file holding its chunk-offset table. Readers download the
//! index, pick a `[offset[i], offset[i+1])` byte range, and fetch exactly
//! that range from the data file.
//!
//! ## Wire Format
//!
//! ```text
//! ┌───────────────┬────────────┬────────────┬─────┐
//! │ count         │ offset 0   │ offset 1   │ ... │
//! │ (4 bytes, BE) │ (8 bytes)  │ (8 bytes)  │     │
//! └───────────────┴────────────┴────────────┴─────┘
//! ```
//!
//! Count and offsets are big-endian signed integers. Offsets are
//! monotonically non-decreasing byte positions; the last offset equals the
//! data file length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Encode a chunk-offset table into its sidecar index representation.
pub fn encode_chunk_index(offsets: &[u64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + offsets.len() * 8);
    buf.put_i32(offsets.len() as i32);
    for offset in offsets {
        buf.put_i64(*offset as i64);
    }
    buf.freeze()
}

/// Decode a sidecar index file back into its chunk-offset table.
///
/// The decoder is strict: a truncated buffer, a negative count or offset,
/// and trailing bytes are all rejected.
pub fn decode_chunk_index(data: &[u8]) -> Result<Vec<u64>> {
    let mut buf = data;
    if buf.remaining() < 4 {
        return Err(Error::InvalidIndex(format!(
            "index too short for count: {} bytes",
            data.len()
        )));
    }
    let count = buf.get_i32();
    if count < 0 {
        return Err(Error::InvalidIndex(format!("negative count: {}", count)));
    }
    let count = count as usize;
    if buf.remaining() != count * 8 {
        return Err(Error::InvalidIndex(format!(
            "expected {} offset bytes, found {}",
            count * 8,
            buf.remaining()
        )));
    }
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        let offset = buf.get_i64();
        if offset < 0 {
            return Err(Error::InvalidIndex(format!("negative offset: {}", offset)));
        }
        offsets.push(offset as u64);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_empty() {
        let encoded = encode_chunk_index(&[]);
        assert_eq!(encoded.len(), 4);
        assert_eq!(decode_chunk_index(&encoded).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_roundtrip_single() {
        let offsets = vec![100];
        let encoded = encode_chunk_index(&offsets);
        assert_eq!(encoded.len(), 4 + 8);
        assert_eq!(decode_chunk_index(&encoded).unwrap(), offsets);
    }

    #[test]
    fn test_roundtrip_many() {
        let offsets = vec![3000, 4000, 1 << 33, u64::MAX >> 1];
        let encoded = encode_chunk_index(&offsets);
        assert_eq!(decode_chunk_index(&encoded).unwrap(), offsets);
    }

    #[test]
    fn test_big_endian_layout() {
        let encoded = encode_chunk_index(&[0x0102030405060708]);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 1]);
        assert_eq!(&encoded[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_decode_truncated_count() {
        assert!(decode_chunk_index(&[0, 0]).is_err());
    }

    #[test]
    fn test_decode_truncated_offsets() {
        let mut encoded = encode_chunk_index(&[100, 200]).to_vec();
        encoded.truncate(encoded.len() - 3);
        assert!(decode_chunk_index(&encoded).is_err());
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut encoded = encode_chunk_index(&[100]).to_vec();
        encoded.push(0xFF);
        assert!(decode_chunk_index(&encoded).is_err());
    }

    #[test]
    fn test_decode_negative_count() {
        let encoded = (-1i32).to_be_bytes();
        assert!(decode_chunk_index(&encoded).is_err());
    }
}
