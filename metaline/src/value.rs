//! Value encoding.
//!
//! The wire carries opaque bytes plus a small integer client flag. A
//! [`ValueCodec`] maps user values to that pair and back; the flag encodes a
//! type tag and a compressed bit so a reader can reconstruct the value
//! without out-of-band schema. The [`StandardCodec`] covers text, integers
//! and raw bytes, zlib-compressing payloads above a threshold.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// A decodable cache value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// UTF-8 text.
    Text(String),
    /// A signed integer, stored as ASCII digits.
    Int(i64),
    /// Raw bytes.
    Bytes(Bytes),
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_owned())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Text(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Int(value)
    }
}

impl From<Bytes> for CacheValue {
    fn from(value: Bytes) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(Bytes::from(value))
    }
}

/// Conversion out of a [`CacheValue`] for the typed getters.
pub trait FromCacheValue: Sized {
    /// Name used in type-mismatch errors.
    const TYPE_NAME: &'static str;

    /// Returns `None` when the value holds a different type.
    fn from_cache_value(value: CacheValue) -> Option<Self>;
}

impl FromCacheValue for String {
    const TYPE_NAME: &'static str = "text";

    fn from_cache_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl FromCacheValue for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_cache_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl FromCacheValue for Bytes {
    const TYPE_NAME: &'static str = "bytes";

    fn from_cache_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Bytes(data) => Some(data),
            _ => None,
        }
    }
}

impl FromCacheValue for Vec<u8> {
    const TYPE_NAME: &'static str = "bytes";

    fn from_cache_value(value: CacheValue) -> Option<Self> {
        match value {
            CacheValue::Bytes(data) => Some(data.to_vec()),
            _ => None,
        }
    }
}

/// A value failed to decode. The read degrades to a miss unless the caller
/// inspects the error directly.
#[derive(Debug, thiserror::Error)]
#[error("codec error: {0}")]
pub struct CodecError(pub String);

/// Maps user values to wire bytes plus a client flag, and back.
///
/// Injected at client construction; implement this to plug in a different
/// serialization scheme (the flag space is yours beyond the bits the
/// default codec claims).
pub trait ValueCodec: Send + Sync {
    /// Serialize a value, returning the payload and the client flag to
    /// store with it.
    fn encode(&self, value: &CacheValue) -> (Bytes, u32);

    /// Reconstruct a value from the payload and the stored client flag.
    fn decode(&self, data: &[u8], client_flag: u32) -> Result<CacheValue, CodecError>;
}

/// Type tag: UTF-8 text.
pub const FLAG_TEXT: u32 = 0;
/// Type tag: integer as ASCII digits.
pub const FLAG_INT: u32 = 2;
/// Bit: payload is zlib-compressed.
pub const FLAG_ZLIB: u32 = 8;
/// Type tag: raw bytes.
pub const FLAG_BYTES: u32 = 16;

const TYPE_MASK: u32 = !FLAG_ZLIB;

/// The default codec: text / int / bytes type tags, zlib compression above
/// a size threshold.
pub struct StandardCodec {
    compression_threshold: usize,
}

impl StandardCodec {
    /// Payloads longer than this many bytes are compressed.
    pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 128;

    pub fn new() -> Self {
        StandardCodec {
            compression_threshold: Self::DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// Override the compression threshold. `usize::MAX` disables
    /// compression.
    pub fn with_compression_threshold(threshold: usize) -> Self {
        StandardCodec {
            compression_threshold: threshold,
        }
    }
}

impl Default for StandardCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueCodec for StandardCodec {
    fn encode(&self, value: &CacheValue) -> (Bytes, u32) {
        let (data, mut flag) = match value {
            CacheValue::Text(text) => (Bytes::copy_from_slice(text.as_bytes()), FLAG_TEXT),
            CacheValue::Int(n) => (Bytes::from(n.to_string()), FLAG_INT),
            CacheValue::Bytes(data) => (data.clone(), FLAG_BYTES),
        };
        if data.len() > self.compression_threshold {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data).expect("write to Vec");
            let compressed = encoder.finish().expect("finish to Vec");
            flag |= FLAG_ZLIB;
            (Bytes::from(compressed), flag)
        } else {
            (data, flag)
        }
    }

    fn decode(&self, data: &[u8], client_flag: u32) -> Result<CacheValue, CodecError> {
        let decompressed;
        let data = if client_flag & FLAG_ZLIB != 0 {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| CodecError(format!("zlib: {e}")))?;
            decompressed = out;
            &decompressed[..]
        } else {
            data
        };

        match client_flag & TYPE_MASK {
            FLAG_TEXT => String::from_utf8(data.to_vec())
                .map(CacheValue::Text)
                .map_err(|e| CodecError(format!("invalid utf-8: {e}"))),
            FLAG_INT => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(CacheValue::Int)
                .ok_or_else(|| CodecError("invalid integer payload".into())),
            FLAG_BYTES => Ok(CacheValue::Bytes(Bytes::copy_from_slice(data))),
            tag => Err(CodecError(format!("unknown type tag: {tag}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let codec = StandardCodec::new();
        let (data, flag) = codec.encode(&CacheValue::Text("hello".into()));
        assert_eq!(&data[..], b"hello");
        assert_eq!(flag, FLAG_TEXT);
        assert_eq!(
            codec.decode(&data, flag).unwrap(),
            CacheValue::Text("hello".into())
        );
    }

    #[test]
    fn int_round_trip() {
        let codec = StandardCodec::new();
        let (data, flag) = codec.encode(&CacheValue::Int(-42));
        assert_eq!(&data[..], b"-42");
        assert_eq!(flag, FLAG_INT);
        assert_eq!(codec.decode(&data, flag).unwrap(), CacheValue::Int(-42));
    }

    #[test]
    fn bytes_round_trip() {
        let codec = StandardCodec::new();
        let value = CacheValue::Bytes(Bytes::from_static(b"\x00\x01\x02"));
        let (data, flag) = codec.encode(&value);
        assert_eq!(flag, FLAG_BYTES);
        assert_eq!(codec.decode(&data, flag).unwrap(), value);
    }

    #[test]
    fn large_payload_is_compressed() {
        let codec = StandardCodec::new();
        let text = "a".repeat(4096);
        let (data, flag) = codec.encode(&CacheValue::Text(text.clone()));
        assert_eq!(flag, FLAG_TEXT | FLAG_ZLIB);
        assert!(data.len() < text.len());
        assert_eq!(codec.decode(&data, flag).unwrap(), CacheValue::Text(text));
    }

    #[test]
    fn threshold_boundary_is_not_compressed() {
        let codec = StandardCodec::new();
        let text = "a".repeat(StandardCodec::DEFAULT_COMPRESSION_THRESHOLD);
        let (_, flag) = codec.encode(&CacheValue::Text(text));
        assert_eq!(flag, FLAG_TEXT);
    }

    #[test]
    fn disabled_compression() {
        let codec = StandardCodec::with_compression_threshold(usize::MAX);
        let (data, flag) = codec.encode(&CacheValue::Text("b".repeat(10_000)));
        assert_eq!(flag, FLAG_TEXT);
        assert_eq!(data.len(), 10_000);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let codec = StandardCodec::new();
        assert!(codec.decode(b"x", 4).is_err());
    }

    #[test]
    fn corrupt_zlib_is_an_error() {
        let codec = StandardCodec::new();
        assert!(codec.decode(b"not zlib", FLAG_TEXT | FLAG_ZLIB).is_err());
    }

    #[test]
    fn typed_extraction() {
        assert_eq!(
            String::from_cache_value(CacheValue::Text("x".into())),
            Some("x".into())
        );
        assert_eq!(i64::from_cache_value(CacheValue::Int(7)), Some(7));
        assert_eq!(i64::from_cache_value(CacheValue::Text("7".into())), None);
        assert_eq!(
            Vec::<u8>::from_cache_value(CacheValue::Bytes(Bytes::from_static(b"z"))),
            Some(b"z".to_vec())
        );
    }
}
