//! Serializer ∘ Compressor codec pipeline.
//!
//! Grounded in `enterprise/cache/codec.rs`'s `BincodeCodec` (the
//! serialize/compress split and the threshold-gated compression flag) and
//! `database/cache.rs`'s `compress`/`decompress` pair (the concrete LZ4
//! crate usage). The core only consumes these two narrow traits — the
//! concrete formats are swappable collaborators, not fixed choices.

use crate::error::{KvError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Object ↔ byte-stream codec. The one required implementation is
/// [`BincodeSerializer`]; callers may supply their own (JSON, protobuf, ...).
pub trait Serializer: Send + Sync {
    /// Serialize `value` to a growable byte buffer.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a byte buffer back into `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Byte-stream ↔ byte-stream compressor.
pub trait Compressor: Send + Sync {
    /// Compress `bytes`.
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>>;

    /// Decompress `bytes` produced by [`Compressor::compress`].
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Default serializer: compact binary encoding via `bincode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| KvError::InvalidArgument(format!("serialization failed: {e}")))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| KvError::InternalStoreError(format!("deserialization failed: {e}")))
    }
}

/// Default compressor: LZ4 block compression.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        // Prefix with the uncompressed length so `decompress` doesn't need
        // the caller to remember it out of band.
        let body = lz4::block::compress(bytes, None, false)
            .map_err(|e| KvError::InternalStoreError(format!("compression failed: {e}")))?;
        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < 4 {
            return Err(KvError::InternalStoreError(
                "compressed payload too short".to_string(),
            ));
        }
        let (len_bytes, body) = bytes.split_at(4);
        let original_len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as i32;
        lz4::block::decompress(body, Some(original_len))
            .map_err(|e| KvError::InternalStoreError(format!("decompression failed: {e}")))
    }
}

/// Encode-then-maybe-compress / maybe-decompress-then-decode pipeline.
///
/// `encode` never fails silently: a serialization failure at write time is
/// the caller's fault (`InvalidArgument`), not the cache's.
pub struct CodecPipeline<S = BincodeSerializer, C = Lz4Compressor> {
    serializer: S,
    compressor: C,
    min_value_length_for_compression: usize,
}

impl<S, C> CodecPipeline<S, C>
where
    S: Serializer,
    C: Compressor,
{
    pub fn new(serializer: S, compressor: C, min_value_length_for_compression: usize) -> Self {
        Self {
            serializer,
            compressor,
            min_value_length_for_compression,
        }
    }

    /// Serialize `value`, compressing the byte stream when it exceeds the
    /// configured threshold. Returns the final bytes plus the `compressed`
    /// flag that must be persisted alongside them.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<(Vec<u8>, bool)> {
        let raw = self.serializer.serialize(value)?;
        if raw.len() > self.min_value_length_for_compression {
            let compressed = self.compressor.compress(&raw)?;
            Ok((compressed, true))
        } else {
            Ok((raw, false))
        }
    }

    /// Mirror of [`CodecPipeline::encode`]: decompress (if flagged) then
    /// deserialize.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> Result<T> {
        let raw = if compressed {
            self.compressor.decompress(bytes)?
        } else {
            bytes.to_vec()
        };
        self.serializer.deserialize(&raw)
    }
}

impl Default for CodecPipeline {
    fn default() -> Self {
        Self::new(BincodeSerializer, Lz4Compressor, 4 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: u64,
        name: String,
    }

    #[test]
    fn small_values_are_not_compressed() {
        let codec = CodecPipeline::new(BincodeSerializer, Lz4Compressor, 1024);
        let (bytes, compressed) = codec.encode(&Widget { id: 1, name: "a".into() }).unwrap();
        assert!(!compressed);
        let decoded: Widget = codec.decode(&bytes, compressed).unwrap();
        assert_eq!(decoded, Widget { id: 1, name: "a".into() });
    }

    #[test]
    fn large_values_are_compressed_and_round_trip() {
        let codec = CodecPipeline::new(BincodeSerializer, Lz4Compressor, 8);
        let big = Widget { id: 2, name: "x".repeat(4096) };
        let (bytes, compressed) = codec.encode(&big).unwrap();
        assert!(compressed);
        let decoded: Widget = codec.decode(&bytes, compressed).unwrap();
        assert_eq!(decoded, big);
    }

    #[test]
    fn lz4_compressor_round_trips_arbitrary_bytes() {
        let c = Lz4Compressor;
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = c.compress(&data).unwrap();
        let restored = c.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }
}
