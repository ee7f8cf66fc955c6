//! High-level [`Archive`] API.
//!
//! ```no_run
//! use phar_codec::archive::{Archive, Entry};
//! use phar_codec::codec::CompressionMethod;
//! use phar_codec::metadata::JsonMetadata;
//!
//! // Write
//! let mut ar = Archive::new();
//! ar.add_entry(Entry::new("index.php", b"<?php echo 'hi';".to_vec())
//!     .with_compression(CompressionMethod::Deflate));
//! let encoded = ar.encode(&JsonMetadata)?;
//!
//! // Read
//! let decoded = Archive::decode(&encoded.bytes, &JsonMetadata)?;
//! assert!(decoded.diagnostics.is_clean());
//! assert_eq!(decoded.archive.entry("index.php").unwrap().content, b"<?php echo 'hi';");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read, Write};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum;
use crate::codec::{CodecError, CompressionMethod, DEFAULT_WINDOW_SIZE};
use crate::diagnostics::Diagnostics;
use crate::flags::{AmbiguousCompression, EntryFlags, GlobalFlags, Permissions};
use crate::io_stream::{PharReader, PharWriter};
use crate::manifest::{EntryHeader, ManifestError};
use crate::metadata::{MetadataCodec, MetadataError};
use crate::signature::{SignatureError, SignatureStatus};
use crate::stub::DEFAULT_STUB;

/// Default cap on an entry's declared uncompressed size: 256 MiB.
pub const DEFAULT_MAX_ENTRY_SIZE: u32 = 256 * 1024 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Halt marker `__HALT_COMPILER();` not found; input is not a phar archive")]
    MissingHaltMarker,
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Content of entry `{name}` is truncated: {expected} bytes declared, {available} available")]
    TruncatedContent { name: String, expected: u64, available: u64 },
    /// Declared uncompressed size above [`DecodeOptions::max_entry_size`].
    #[error("Entry `{name}` declares {size} uncompressed bytes, above the {limit}-byte limit")]
    EntryTooLarge { name: String, size: u32, limit: u32 },
    #[error("Entry `{name}` selects both DEFLATE and BZIP2; refusing to encode")]
    AmbiguousCompression { name: String },
    #[error("Entry `{name}`: {source}")]
    Content { name: String, source: CodecError },
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`Archive::decode_with`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Entries declaring a larger uncompressed size are rejected.
    pub max_entry_size:   u32,
    /// Compressed bytes fed to the decompressor per pull.
    pub window_size:      usize,
    pub verify_checksums: bool,
    pub verify_signature: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_entry_size:   DEFAULT_MAX_ENTRY_SIZE,
            window_size:      DEFAULT_WINDOW_SIZE,
            verify_checksums: true,
            verify_signature: true,
        }
    }
}

/// Configuration for [`Archive::encode_with`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    pub deflate_level: u32,
    pub bzip2_level:   u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            deflate_level: CompressionMethod::Deflate.default_level(),
            bzip2_level:   CompressionMethod::Bzip2.default_level(),
        }
    }
}

impl EncodeOptions {
    pub fn level_for(&self, method: CompressionMethod) -> u32 {
        match method {
            CompressionMethod::None    => 0,
            CompressionMethod::Deflate => self.deflate_level,
            CompressionMethod::Bzip2   => self.bzip2_level,
        }
    }
}

// ── Entry ────────────────────────────────────────────────────────────────────

/// One file record.  `size`, `compressed_size` and `crc32` describe the
/// entry as read; the encoder recomputes all three from `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<V> {
    pub name:            String,
    pub size:            u32,
    pub timestamp:       u32,
    pub compressed_size: u32,
    pub crc32:           u32,
    pub permissions:     Permissions,
    pub flags:           EntryFlags,
    pub metadata:        Option<V>,
    pub content:         Vec<u8>,
}

impl<V> Entry<V> {
    /// Uncompressed entry, `rw-r--r--`, stamped with the current time.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            name:            name.into(),
            size:            u32::try_from(content.len()).unwrap_or(u32::MAX),
            timestamp:       u32::try_from(Utc::now().timestamp()).unwrap_or(0),
            compressed_size: 0,
            crc32:           checksum::crc32(&content),
            permissions:     Permissions::default(),
            flags:           EntryFlags::NONE,
            metadata:        None,
            content,
        }
    }

    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.flags = self.flags.with_method(method);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: V) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn compression(&self) -> Result<CompressionMethod, AmbiguousCompression> {
        self.flags.method()
    }

    /// Check `content` against the stored `crc32`.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.content, self.crc32)
    }

    pub(crate) fn from_header(header: EntryHeader, metadata: Option<V>, content: Vec<u8>) -> Self {
        Self {
            name:            header.name,
            size:            header.size,
            timestamp:       header.timestamp,
            compressed_size: header.compressed_size,
            crc32:           header.crc32,
            permissions:     header.permissions,
            flags:           header.flags,
            metadata,
            content,
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// A decoded archive together with every soft violation found on the way.
#[derive(Debug, Clone)]
pub struct Decoded<V> {
    pub archive:     Archive<V>,
    pub diagnostics: Diagnostics,
    /// `None` when the archive is not flagged `SIGNED` or verification was
    /// disabled.
    pub signature:   Option<SignatureStatus>,
}

impl<V> Decoded<V> {
    pub fn is_clean(&self) -> bool { self.diagnostics.is_clean() }
    pub fn into_archive(self) -> Archive<V> { self.archive }
}

/// Encoded archive bytes plus diagnostics raised while writing.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes:       Vec<u8>,
    pub diagnostics: Diagnostics,
}

// ── Archive ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Archive<V> {
    pub stub:     Vec<u8>,
    pub flags:    GlobalFlags,
    pub alias:    String,
    pub metadata: Option<V>,
    /// On-disk order; content blocks are laid out in this order.
    pub entries:  Vec<Entry<V>>,
}

impl<V> Default for Archive<V> {
    fn default() -> Self {
        Self {
            stub:     DEFAULT_STUB.to_vec(),
            flags:    GlobalFlags::SIGNED,
            alias:    String::new(),
            metadata: None,
            entries:  Vec::new(),
        }
    }
}

impl<V> Archive<V> {
    pub fn new() -> Self { Self::default() }

    pub fn add_entry(&mut self, entry: Entry<V>) {
        self.entries.push(entry);
    }

    /// First entry called `name`.
    pub fn entry(&self, name: &str) -> Option<&Entry<V>> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut Entry<V>> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Set `HAS_DEFLATE` / `HAS_BZIP2` to match the entry list.
    pub fn refresh_compression_hints(&mut self) {
        let deflate = self.entries.iter().any(|e| e.flags.is_deflate());
        let bzip2   = self.entries.iter().any(|e| e.flags.is_bzip2());
        self.flags.set(GlobalFlags::HAS_DEFLATE, deflate);
        self.flags.set(GlobalFlags::HAS_BZIP2, bzip2);
    }

    // ── Decode ───────────────────────────────────────────────────────────────

    pub fn decode<M>(bytes: &[u8], codec: &M) -> Result<Decoded<V>, ArchiveError>
    where
        M: MetadataCodec<Value = V>,
    {
        Self::decode_with(bytes, codec, &DecodeOptions::default())
    }

    pub fn decode_with<M>(bytes: &[u8], codec: &M, options: &DecodeOptions) -> Result<Decoded<V>, ArchiveError>
    where
        M: MetadataCodec<Value = V>,
    {
        PharReader::new(codec, options).decode(bytes)
    }

    /// Buffer all of `reader` and decode it.
    pub fn read_from<R, M>(mut reader: R, codec: &M, options: &DecodeOptions) -> Result<Decoded<V>, ArchiveError>
    where
        R: Read,
        M: MetadataCodec<Value = V>,
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode_with(&bytes, codec, options)
    }

    // ── Encode ───────────────────────────────────────────────────────────────

    pub fn encode<M>(&self, codec: &M) -> Result<Encoded, ArchiveError>
    where
        M: MetadataCodec<Value = V>,
    {
        self.encode_with(codec, &EncodeOptions::default())
    }

    pub fn encode_with<M>(&self, codec: &M, options: &EncodeOptions) -> Result<Encoded, ArchiveError>
    where
        M: MetadataCodec<Value = V>,
    {
        PharWriter::new(codec, options).encode(self)
    }

    /// Encode and write the archive to `writer`; returns the write diagnostics.
    pub fn write_to<W, M>(&self, mut writer: W, codec: &M, options: &EncodeOptions) -> Result<Diagnostics, ArchiveError>
    where
        W: Write,
        M: MetadataCodec<Value = V>,
    {
        let encoded = self.encode_with(codec, options)?;
        writer.write_all(&encoded.bytes)?;
        writer.flush()?;
        Ok(encoded.diagnostics)
    }
}
