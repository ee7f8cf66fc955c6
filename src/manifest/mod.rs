//! Manifest codec: global header plus the entry table.
//!
//! # Layout
//! All integers are little-endian.
//!
//! | Field           | Size        |
//! |-----------------|-------------|
//! | manifest length | u32         |
//! | entry count     | u32         |
//! | version marker  | 2 B `11 00` |
//! | global flags    | u32         |
//! | alias           | u32 + bytes |
//! | metadata        | u32 + bytes |
//! | entry headers   | see [`EntryHeader`] |
//!
//! The manifest length counts every byte after the length field itself.
//! A reader that finds a different number of bytes records a soft
//! diagnostic and keeps going.  A wrong version marker is fatal: nothing
//! after it can be located reliably.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::flags::GlobalFlags;

pub mod entry;

pub use entry::EntryHeader;

pub const VERSION_MARKER: [u8; 2] = [0x11, 0x00];

/// Entry slots reserved up front, whatever the declared count says.
const MAX_PREALLOCATED_ENTRIES: u32 = 1024;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Unsupported manifest version marker {0:02x?}")]
    UnsupportedVersion([u8; 2]),
    #[error("Manifest truncated in {field}: {expected} bytes declared, {available} available")]
    Truncated { field: &'static str, expected: u64, available: u64 },
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("{field} is {len} bytes, too long for a u32 length field")]
    FieldOverflow { field: &'static str, len: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub flags:    GlobalFlags,
    pub alias:    String,
    /// Serialized archive metadata; `None` is written as a zero length, and
    /// a zero length reads back as `None`.
    pub metadata: Option<Vec<u8>>,
    pub entries:  Vec<EntryHeader>,
}

impl Manifest {
    /// Write the manifest, backpatching its length.  Returns that length.
    pub fn write<W: Write + Seek>(&self, mut writer: W) -> Result<u32, ManifestError> {
        let len_pos = writer.stream_position()?;
        writer.write_u32::<LittleEndian>(0)?; // patched below
        writer.write_u32::<LittleEndian>(fit_u32(self.entries.len(), "entry count")?)?;
        writer.write_all(&VERSION_MARKER)?;
        writer.write_u32::<LittleEndian>(self.flags.bits())?;
        write_prefixed(&mut writer, self.alias.as_bytes(), "alias")?;
        write_prefixed(&mut writer, self.metadata.as_deref().unwrap_or_default(), "archive metadata")?;
        for entry in &self.entries {
            entry.write(&mut writer)?;
        }

        let end = writer.stream_position()?;
        let manifest_len = fit_u32((end - len_pos - 4) as usize, "manifest")?;
        writer.seek(SeekFrom::Start(len_pos))?;
        writer.write_u32::<LittleEndian>(manifest_len)?;
        writer.seek(SeekFrom::Start(end))?;
        Ok(manifest_len)
    }

    /// Read a manifest starting at the reader's current position.
    pub fn read<R: Read + Seek>(mut reader: R, diags: &mut Diagnostics) -> Result<Self, ManifestError> {
        let start    = reader.stream_position()?;
        let declared = reader.read_u32::<LittleEndian>()?;
        let count    = reader.read_u32::<LittleEndian>()?;

        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        if version != VERSION_MARKER {
            return Err(ManifestError::UnsupportedVersion(version));
        }

        let flags = GlobalFlags::from_bits(reader.read_u32::<LittleEndian>()?);
        let alias = String::from_utf8(read_prefixed(&mut reader, "alias")?)
            .map_err(|_| ManifestError::InvalidUtf8 { field: "alias" })?;
        let metadata = read_prefixed(&mut reader, "archive metadata")?;

        let mut entries = Vec::with_capacity(count.min(MAX_PREALLOCATED_ENTRIES) as usize);
        for _ in 0..count {
            entries.push(EntryHeader::read(&mut reader)?);
        }

        let consumed = reader.stream_position()? - start - 4;
        if consumed != u64::from(declared) {
            diags.push(Diagnostic::ManifestLengthMismatch { declared: u64::from(declared), consumed });
        }
        tracing::debug!(entries = count, manifest_len = consumed, "manifest read");

        Ok(Self {
            flags,
            alias,
            metadata: (!metadata.is_empty()).then_some(metadata),
            entries,
        })
    }
}

// ── length-prefixed fields ───────────────────────────────────────────────────

/// Read a `u32` length followed by that many bytes.  The allocation is
/// bounded by what the reader actually holds, not by the declared length.
pub(crate) fn read_prefixed<R: Read>(reader: &mut R, field: &'static str) -> Result<Vec<u8>, ManifestError> {
    let len = u64::from(reader.read_u32::<LittleEndian>()?);
    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(ManifestError::Truncated { field, expected: len, available: buf.len() as u64 });
    }
    Ok(buf)
}

pub(crate) fn write_prefixed<W: Write>(writer: &mut W, bytes: &[u8], field: &'static str) -> Result<(), ManifestError> {
    writer.write_u32::<LittleEndian>(fit_u32(bytes.len(), field)?)?;
    writer.write_all(bytes)?;
    Ok(())
}

pub(crate) fn fit_u32(len: usize, field: &'static str) -> Result<u32, ManifestError> {
    u32::try_from(len).map_err(|_| ManifestError::FieldOverflow { field, len: len as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{EntryFlags, Permissions};
    use std::io::Cursor;

    fn sample() -> Manifest {
        let entry = |name: &str| EntryHeader {
            name:            name.to_owned(),
            size:            5,
            timestamp:       1_600_000_000,
            compressed_size: 5,
            crc32:           0x3610_a686,
            permissions:     Permissions::default(),
            flags:           EntryFlags::NONE,
            metadata:        None,
        };
        Manifest {
            flags:    GlobalFlags::SIGNED,
            alias:    "app.phar".to_owned(),
            metadata: Some(b"{\"v\":1}".to_vec()),
            entries:  vec![entry("a.php"), entry("lib/b.php")],
        }
    }

    #[test]
    fn write_backpatches_length() {
        let m = sample();
        let mut cur = Cursor::new(Vec::new());
        let len = m.write(&mut cur).unwrap();
        let buf = cur.into_inner();
        assert_eq!(len as usize, buf.len() - 4);
        assert_eq!(&buf[..4], &len.to_le_bytes());
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[8..10], &VERSION_MARKER);
        assert_eq!(&buf[10..14], &0x0001_0000u32.to_le_bytes());
    }

    #[test]
    fn read_back_is_clean() {
        let m = sample();
        let mut cur = Cursor::new(Vec::new());
        m.write(&mut cur).unwrap();
        cur.set_position(0);
        let mut diags = Diagnostics::new();
        let back = Manifest::read(&mut cur, &mut diags).unwrap();
        assert_eq!(back, m);
        assert!(diags.is_clean());
    }

    #[test]
    fn length_mismatch_is_soft() {
        let mut cur = Cursor::new(Vec::new());
        sample().write(&mut cur).unwrap();
        let mut buf = cur.into_inner();
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        buf[..4].copy_from_slice(&(declared + 3).to_le_bytes());

        let mut diags = Diagnostics::new();
        let back = Manifest::read(Cursor::new(&buf), &mut diags).unwrap();
        assert_eq!(back.entries.len(), 2);
        assert_eq!(
            diags.as_slice(),
            &[Diagnostic::ManifestLengthMismatch {
                declared: u64::from(declared) + 3,
                consumed: u64::from(declared),
            }]
        );
    }

    #[test]
    fn bad_version_is_fatal() {
        let mut cur = Cursor::new(Vec::new());
        sample().write(&mut cur).unwrap();
        let mut buf = cur.into_inner();
        buf[8] = 0x10;
        let mut diags = Diagnostics::new();
        assert!(matches!(
            Manifest::read(Cursor::new(&buf), &mut diags),
            Err(ManifestError::UnsupportedVersion([0x10, 0x00]))
        ));
    }

    #[test]
    fn huge_entry_count_does_not_preallocate() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&VERSION_MARKER);
        buf.extend_from_slice(&[0u8; 12]);
        let mut diags = Diagnostics::new();
        assert!(Manifest::read(Cursor::new(&buf), &mut diags).is_err());
    }
}
