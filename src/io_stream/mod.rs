//! Decode pass and two-pass encoder.
//!
//! # Reader
//! [`PharReader`] walks an in-memory archive once: stub, manifest, every
//! entry's content block in table order, then the signature trailer when the
//! archive is flagged `SIGNED`.  Soft violations land in a [`Diagnostics`]
//! accumulator; only layout failures abort.
//!
//! # Writer
//! [`PharWriter`] runs in two passes.  Pass 1 ([`PharWriter::finalize_entries`])
//! compresses and checksums every entry into an ordered list of
//! [`FinalizedEntry`] values.  Pass 2 ([`PharWriter::write`]) emits the stub,
//! the manifest built from those headers, the payloads in the same order,
//! and finally a SHA1 trailer over everything before it.
//!
//! # Endianness
//! All binary I/O is strictly little-endian; see `manifest` for field-level
//! documentation.

use std::borrow::Cow;
use std::io::{Cursor, Write};

use crate::archive::{
    Archive, ArchiveError, DecodeOptions, Decoded, EncodeOptions, Encoded, Entry,
};
use crate::checksum;
use crate::codec::{get_codec, CompressionMethod};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::manifest::{fit_u32, EntryHeader, Manifest};
use crate::metadata::MetadataCodec;
use crate::signature::{self, WRITE_ALGORITHM};
use crate::stub;

// ── Writer ───────────────────────────────────────────────────────────────────

/// An entry after pass 1: its final header and the bytes stored on disk.
#[derive(Debug, Clone)]
pub struct FinalizedEntry<'a> {
    pub header:  EntryHeader,
    pub payload: Cow<'a, [u8]>,
}

pub struct PharWriter<'a, M: MetadataCodec> {
    codec:   &'a M,
    options: &'a EncodeOptions,
}

impl<'a, M: MetadataCodec> PharWriter<'a, M> {
    pub fn new(codec: &'a M, options: &'a EncodeOptions) -> Self {
        Self { codec, options }
    }

    /// Run both passes over `archive`.
    pub fn encode(&self, archive: &Archive<M::Value>) -> Result<Encoded, ArchiveError> {
        let finalized = self.finalize_entries(&archive.entries)?;
        self.write(archive, finalized)
    }

    /// Pass 1: compress every entry and compute its size and checksum.
    /// Caller-supplied `size`, `compressed_size` and `crc32` are ignored.
    pub fn finalize_entries<'e>(
        &self,
        entries: &'e [Entry<M::Value>],
    ) -> Result<Vec<FinalizedEntry<'e>>, ArchiveError> {
        entries.iter().map(|entry| self.finalize_entry(entry)).collect()
    }

    fn finalize_entry<'e>(&self, entry: &'e Entry<M::Value>) -> Result<FinalizedEntry<'e>, ArchiveError> {
        let method = entry.flags.method().map_err(|_| ArchiveError::AmbiguousCompression {
            name: entry.name.clone(),
        })?;

        let payload: Cow<'e, [u8]> = match method {
            CompressionMethod::None => Cow::Borrowed(entry.content.as_slice()),
            method => {
                let packed = get_codec(method)
                    .compress(&entry.content, self.options.level_for(method))
                    .map_err(|source| ArchiveError::Content { name: entry.name.clone(), source })?;
                Cow::Owned(packed)
            }
        };

        let metadata = entry.metadata.as_ref().map(|v| self.codec.encode(v)).transpose()?;
        let header = EntryHeader {
            name:            entry.name.clone(),
            size:            fit_u32(entry.content.len(), "entry content")?,
            timestamp:       entry.timestamp,
            compressed_size: fit_u32(payload.len(), "compressed entry content")?,
            crc32:           checksum::crc32(&entry.content),
            permissions:     entry.permissions,
            flags:           entry.flags,
            metadata,
        };
        tracing::debug!(
            entry = %header.name,
            method = method.name(),
            size = header.size,
            compressed_size = header.compressed_size,
            "entry finalized"
        );
        Ok(FinalizedEntry { header, payload })
    }

    /// Pass 2: serialize stub, manifest, payloads and the signature trailer.
    pub fn write(
        &self,
        archive:   &Archive<M::Value>,
        finalized: Vec<FinalizedEntry<'_>>,
    ) -> Result<Encoded, ArchiveError> {
        let mut diagnostics = Diagnostics::new();
        if !stub::validate(&archive.stub) {
            diagnostics.push(Diagnostic::MalformedStub);
        }

        let (headers, payloads): (Vec<_>, Vec<_>) =
            finalized.into_iter().map(|f| (f.header, f.payload)).unzip();
        let manifest = Manifest {
            flags:    archive.flags,
            alias:    archive.alias.clone(),
            metadata: archive.metadata.as_ref().map(|v| self.codec.encode(v)).transpose()?,
            entries:  headers,
        };

        let content_len: usize = payloads.iter().map(|p| p.len()).sum();
        let mut out = Cursor::new(Vec::with_capacity(archive.stub.len() + content_len + 1024));
        out.write_all(&archive.stub)?;
        let manifest_len = manifest.write(&mut out)?;
        for payload in &payloads {
            out.write_all(payload)?;
        }

        let mut bytes = out.into_inner();
        signature::append_signature(&mut bytes, WRITE_ALGORITHM)?;
        tracing::debug!(
            entries = payloads.len(),
            manifest_len,
            total_len = bytes.len(),
            "archive encoded"
        );
        Ok(Encoded { bytes, diagnostics })
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct PharReader<'a, M: MetadataCodec> {
    codec:   &'a M,
    options: &'a DecodeOptions,
}

impl<'a, M: MetadataCodec> PharReader<'a, M> {
    pub fn new(codec: &'a M, options: &'a DecodeOptions) -> Self {
        Self { codec, options }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded<M::Value>, ArchiveError> {
        let mut diagnostics = Diagnostics::new();
        let mut cursor = Cursor::new(bytes);

        let stub = stub::scan(&mut cursor)?;
        if !stub::contains_marker(&stub) {
            return Err(ArchiveError::MissingHaltMarker);
        }

        let manifest = Manifest::read(&mut cursor, &mut diagnostics)?;
        let metadata = self.decode_metadata(manifest.metadata.as_deref(), || "the archive".to_owned(), &mut diagnostics);

        let mut entries = Vec::with_capacity(manifest.entries.len());
        for header in manifest.entries {
            entries.push(self.read_entry(&mut cursor, header, &mut diagnostics)?);
        }

        let content_end = cursor.position() as usize;
        let signature = if manifest.flags.is_signed() && self.options.verify_signature {
            Some(signature::verify(&bytes[..content_end], &bytes[content_end..], &mut diagnostics))
        } else {
            None
        };

        tracing::debug!(
            entries = entries.len(),
            signed = manifest.flags.is_signed(),
            issues = diagnostics.len(),
            "archive decoded"
        );
        Ok(Decoded {
            archive: Archive {
                stub,
                flags: manifest.flags,
                alias: manifest.alias,
                metadata,
                entries,
            },
            diagnostics,
            signature,
        })
    }

    fn read_entry(
        &self,
        cursor:      &mut Cursor<&[u8]>,
        header:      EntryHeader,
        diagnostics: &mut Diagnostics,
    ) -> Result<Entry<M::Value>, ArchiveError> {
        if header.size > self.options.max_entry_size {
            return Err(ArchiveError::EntryTooLarge {
                name:  header.name,
                size:  header.size,
                limit: self.options.max_entry_size,
            });
        }

        let data: &[u8] = *cursor.get_ref();
        let start = cursor.position() as usize;
        let available = data.len().saturating_sub(start);
        let stored_len = header.compressed_size as usize;
        if stored_len > available {
            return Err(ArchiveError::TruncatedContent {
                name:      header.name,
                expected:  stored_len as u64,
                available: available as u64,
            });
        }
        let stored = &data[start..start + stored_len];
        cursor.set_position((start + stored_len) as u64);

        let content = match header.flags.method() {
            Err(_) => {
                diagnostics.push(Diagnostic::AmbiguousCompression {
                    entry: header.name.clone(),
                    flags: header.flags.bits(),
                });
                stored.to_vec()
            }
            Ok(method) => {
                let content = get_codec(method)
                    .decompress(stored, header.size as usize, self.options.window_size)
                    .map_err(|source| ArchiveError::Content { name: header.name.clone(), source })?;
                if content.len() != header.size as usize {
                    diagnostics.push(Diagnostic::SizeMismatch {
                        entry:    header.name.clone(),
                        declared: header.size,
                        actual:   content.len() as u64,
                    });
                }
                content
            }
        };

        if self.options.verify_checksums && !checksum::verify(&content, header.crc32) {
            diagnostics.push(Diagnostic::ChecksumMismatch {
                entry:    header.name.clone(),
                expected: header.crc32,
                actual:   checksum::crc32(&content),
            });
        }

        let name = header.name.clone();
        let metadata = self.decode_metadata(
            header.metadata.as_deref(),
            || format!("entry `{name}`"),
            diagnostics,
        );
        Ok(Entry::from_header(header, metadata, content))
    }

    fn decode_metadata(
        &self,
        bytes:       Option<&[u8]>,
        owner:       impl FnOnce() -> String,
        diagnostics: &mut Diagnostics,
    ) -> Option<M::Value> {
        match self.codec.decode(bytes?) {
            Ok(value) => Some(value),
            Err(e) => {
                diagnostics.push(Diagnostic::MetadataUndecodable { owner: owner(), reason: e.0 });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::RawMetadata;

    #[test]
    fn pass_one_borrows_stored_payloads() {
        let entries = vec![
            Entry::<Vec<u8>>::new("plain.txt", b"stored as is".to_vec()),
            Entry::new("packed.txt", b"abc".repeat(200)).with_compression(CompressionMethod::Deflate),
        ];
        let opts = EncodeOptions::default();
        let writer = PharWriter::new(&RawMetadata, &opts);
        let finalized = writer.finalize_entries(&entries).unwrap();

        assert!(matches!(finalized[0].payload, Cow::Borrowed(_)));
        assert_eq!(finalized[0].header.compressed_size, finalized[0].header.size);
        assert!(matches!(finalized[1].payload, Cow::Owned(_)));
        assert_eq!(finalized[1].header.size, 600);
        assert!(finalized[1].header.compressed_size < 600);
        assert_eq!(finalized[1].header.crc32, checksum::crc32(&entries[1].content));
    }

    #[test]
    fn pass_one_ignores_caller_sizes() {
        let mut entry = Entry::<Vec<u8>>::new("x", b"12345".to_vec());
        entry.size = 99;
        entry.compressed_size = 1;
        entry.crc32 = 7;
        let opts = EncodeOptions::default();
        let finalized = PharWriter::new(&RawMetadata, &opts).finalize_entries(std::slice::from_ref(&entry)).unwrap();
        let h = &finalized[0].header;
        assert_eq!((h.size, h.compressed_size, h.crc32), (5, 5, checksum::crc32(b"12345")));
    }

    #[test]
    fn undecodable_metadata_is_soft() {
        let codec = crate::metadata::JsonMetadata;
        let mut archive = Archive::<serde_json::Value>::new();
        archive.add_entry(Entry::new("a", b"a".to_vec()));
        let encoded = archive.encode(&codec).unwrap();

        // Re-decode the same bytes with a metadata blob the JSON codec rejects.
        let raw = Archive::<Vec<u8>>::decode(&encoded.bytes, &RawMetadata).unwrap().archive;
        let mut broken = raw.clone();
        broken.entries[0].metadata = Some(b"a:1:{i:0;".to_vec());
        let bytes = broken.encode(&RawMetadata).unwrap().bytes;

        let decoded = Archive::decode(&bytes, &codec).unwrap();
        assert_eq!(decoded.archive.entries[0].metadata, None);
        assert!(decoded.diagnostics.any(|d| matches!(d, Diagnostic::MetadataUndecodable { .. })));
    }
}
