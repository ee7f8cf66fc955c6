use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::{read_prefixed, write_prefixed, ManifestError};
use crate::flags::{self, EntryFlags, Permissions};

/// One row of the entry table, exactly as stored on disk.
///
/// `compressed_size` and `crc32` are authoritative when read; when written
/// they must describe the finalized payload that follows the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub name:            String,
    pub size:            u32,
    pub timestamp:       u32,
    pub compressed_size: u32,
    pub crc32:           u32,
    pub permissions:     Permissions,
    pub flags:           EntryFlags,
    /// Serialized metadata; `None` is written as a zero length, and
    /// a zero length reads back as `None`.
    pub metadata:        Option<Vec<u8>>,
}

impl EntryHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), ManifestError> {
        write_prefixed(&mut writer, self.name.as_bytes(), "entry name")?;
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.timestamp)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(flags::combine(self.permissions, self.flags))?;
        write_prefixed(&mut writer, self.metadata.as_deref().unwrap_or_default(), "entry metadata")?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ManifestError> {
        let name = String::from_utf8(read_prefixed(&mut reader, "entry name")?)
            .map_err(|_| ManifestError::InvalidUtf8 { field: "entry name" })?;
        let size            = reader.read_u32::<LittleEndian>()?;
        let timestamp       = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let crc32           = reader.read_u32::<LittleEndian>()?;
        let (permissions, flags) = flags::split(reader.read_u32::<LittleEndian>()?);
        let metadata = read_prefixed(&mut reader, "entry metadata")?;
        Ok(Self {
            name,
            size,
            timestamp,
            compressed_size,
            crc32,
            permissions,
            flags,
            metadata: (!metadata.is_empty()).then_some(metadata),
        })
    }

    /// Bytes this header occupies in the manifest.
    pub fn encoded_len(&self) -> usize {
        4 + self.name.len() + 4 * 5 + 4 + self.metadata.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> EntryHeader {
        EntryHeader {
            name:            "src/index.php".to_owned(),
            size:            1100,
            timestamp:       1_700_000_000,
            compressed_size: 42,
            crc32:           0xDEAD_BEEF,
            permissions:     Permissions::from_bits(0o755),
            flags:           EntryFlags::IS_DEFLATE,
            metadata:        Some(b"a:0:{}".to_vec()),
        }
    }

    #[test]
    fn field_layout() {
        let h = header();
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(buf.len(), h.encoded_len());
        assert_eq!(&buf[..4], &13u32.to_le_bytes());
        assert_eq!(&buf[4..17], b"src/index.php");
        // combined flags word: permissions in the low nine bits
        assert_eq!(&buf[33..37], &(0x1000u32 | 0o755).to_le_bytes());
        assert_eq!(&buf[37..41], &6u32.to_le_bytes());

        let back = EntryHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn absent_metadata_is_zero_length() {
        let mut h = header();
        h.metadata = None;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(&buf[buf.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(EntryHeader::read(Cursor::new(&buf)).unwrap().metadata, None);
    }

    #[test]
    fn truncated_name_is_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(b"short");
        assert!(matches!(
            EntryHeader::read(Cursor::new(&buf)),
            Err(ManifestError::Truncated { field: "entry name", expected: 100, available: 5 })
        ));
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0xff, 0xfe]);
        buf.extend_from_slice(&[0u8; 24]);
        assert!(matches!(
            EntryHeader::read(Cursor::new(&buf)),
            Err(ManifestError::InvalidUtf8 { .. })
        ));
    }
}
