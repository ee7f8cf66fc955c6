//! Per-entry content codecs.
//!
//! # Methods
//! An entry is stored verbatim, DEFLATE-compressed or BZIP2-compressed,
//! selected by its [`EntryFlags`](crate::flags::EntryFlags).  There is no
//! on-disk codec identifier beyond those two bits.
//!
//! # Levels
//! BZIP2 is written at block size 4 and DEFLATE at zlib's default level 6.
//! Both are overridable through `EncodeOptions`.
//!
//! # DEFLATE framing
//! Payloads are written zlib-wrapped.  On read a valid two-byte zlib header
//! selects zlib framing; anything else is inflated as a raw DEFLATE stream.
//!
//! # Decompression
//! Decompression always goes through [`DecompressReader`], which pulls the
//! compressed input in bounded windows and never produces more output than
//! the declared uncompressed size.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod reader;

pub use reader::{DecompressReader, Decompressor, DEFAULT_WINDOW_SIZE};

/// zlib's default level.
pub const DEFAULT_DEFLATE_LEVEL: u32 = 6;
/// Block size used by PHP's bzip2 stream filter.
pub const DEFAULT_BZIP2_LEVEL:   u32 = 4;

// ── CompressionMethod ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    Deflate,
    Bzip2,
}

impl CompressionMethod {
    /// Human-readable name, used in logs; never read from disk.
    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None    => "none",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Bzip2   => "bzip2",
        }
    }

    /// Level used when `EncodeOptions` does not override it.
    pub fn default_level(self) -> u32 {
        match self {
            CompressionMethod::None    => 0,
            CompressionMethod::Deflate => DEFAULT_DEFLATE_LEVEL,
            CompressionMethod::Bzip2   => DEFAULT_BZIP2_LEVEL,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn method(&self) -> CompressionMethod;
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError>;
    /// Decompress at most `size` bytes, feeding `window` compressed bytes at a
    /// time.  The result is shorter than `size` only if the stream ended early.
    /// [`StoredCodec`] ignores `size` and returns `data` whole.
    fn decompress(&self, data: &[u8], size: usize, window: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct StoredCodec;
impl Codec for StoredCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::None }
    fn compress(&self, data: &[u8], _: u32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], _: usize, _: usize) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct DeflateCodec;
impl Codec for DeflateCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Deflate }
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        let mut enc = flate2::write::ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(level.min(9)),
        );
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], size: usize, window: usize) -> Result<Vec<u8>, CodecError> {
        let engine = flate2::Decompress::new(has_zlib_header(data));
        DecompressReader::new(data, engine, window).read_up_to(size)
    }
}

pub struct Bzip2Codec;
impl Codec for Bzip2Codec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Bzip2 }
    fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
        let mut enc = bzip2::write::BzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            bzip2::Compression::new(level.clamp(1, 9)),
        );
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], size: usize, window: usize) -> Result<Vec<u8>, CodecError> {
        let engine = bzip2::Decompress::new(false);
        DecompressReader::new(data, engine, window).read_up_to(size)
    }
}

/// RFC 1950 header check: CM = 8, CINFO <= 7, FCHECK makes the pair a
/// multiple of 31, no preset dictionary.
fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8
                && cmf >> 4 <= 7
                && flg & 0x20 == 0
                && u16::from_be_bytes([*cmf, *flg]) % 31 == 0
        }
        _ => false,
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression method to its codec.
pub fn get_codec(method: CompressionMethod) -> Box<dyn Codec> {
    match method {
        CompressionMethod::None    => Box::new(StoredCodec),
        CompressionMethod::Deflate => Box::new(DeflateCodec),
        CompressionMethod::Bzip2   => Box::new(Bzip2Codec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"hello world".repeat(100)
    }

    #[test]
    fn deflate_roundtrip() {
        let data = sample();
        let codec = get_codec(CompressionMethod::Deflate);
        let packed = codec.compress(&data, DEFAULT_DEFLATE_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        assert!(has_zlib_header(&packed));
        let out = codec.decompress(&packed, data.len(), DEFAULT_WINDOW_SIZE).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn bzip2_roundtrip() {
        let data = sample();
        let codec = get_codec(CompressionMethod::Bzip2);
        let packed = codec.compress(&data, DEFAULT_BZIP2_LEVEL).unwrap();
        assert!(packed.starts_with(b"BZh4"));
        let out = codec.decompress(&packed, data.len(), 7).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn raw_deflate_is_accepted() {
        let data = sample();
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&data).unwrap();
        let raw = enc.finish().unwrap();
        let out = DeflateCodec.decompress(&raw, data.len(), 64).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn output_is_bounded_by_declared_size() {
        let data = vec![0u8; 1 << 20];
        let packed = DeflateCodec.compress(&data, 9).unwrap();
        let out = DeflateCodec.decompress(&packed, 10, DEFAULT_WINDOW_SIZE).unwrap();
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn stored_returns_every_byte_read() {
        let codec = get_codec(CompressionMethod::None);
        assert_eq!(codec.decompress(b"0123456789", 4, DEFAULT_WINDOW_SIZE).unwrap(), b"0123456789");
        assert_eq!(codec.decompress(b"0123", 10, DEFAULT_WINDOW_SIZE).unwrap(), b"0123");
    }

    #[test]
    fn method_names() {
        assert_eq!(CompressionMethod::Deflate.name(), "deflate");
        assert_eq!(CompressionMethod::Bzip2.default_level(), 4);
    }
}
