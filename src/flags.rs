//! Bitset types for the manifest flag words.
//!
//! The global flags word and the per-entry combined flags word are stored as
//! raw `u32`s on disk.  Unknown bits are carried through untouched so that a
//! decode/encode cycle never silently drops information.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CompressionMethod;

/// Mask of the permission bits inside the combined entry flags word.
pub const PERMISSION_MASK: u32 = 0x0000_01ff;

// ── GlobalFlags ──────────────────────────────────────────────────────────────

/// Archive-wide flags.  `HAS_DEFLATE` / `HAS_BZIP2` are advisory hints only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GlobalFlags(u32);

impl GlobalFlags {
    pub const NONE:        Self = Self(0);
    pub const HAS_DEFLATE: Self = Self(0x0000_1000);
    pub const HAS_BZIP2:   Self = Self(0x0000_2000);
    pub const SIGNED:      Self = Self(0x0001_0000);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self { Self(bits) }
    #[inline]
    pub const fn bits(self) -> u32 { self.0 }

    #[inline]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
    #[inline]
    pub fn insert(&mut self, other: Self) { self.0 |= other.0; }
    #[inline]
    pub fn remove(&mut self, other: Self) { self.0 &= !other.0; }
    pub fn set(&mut self, other: Self, on: bool) {
        if on { self.insert(other) } else { self.remove(other) }
    }

    pub const fn is_signed(self)   -> bool { self.contains(Self::SIGNED) }
    pub const fn has_deflate(self) -> bool { self.contains(Self::HAS_DEFLATE) }
    pub const fn has_bzip2(self)   -> bool { self.contains(Self::HAS_BZIP2) }
}

impl BitOr for GlobalFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl BitOrAssign for GlobalFlags {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

// ── EntryFlags ───────────────────────────────────────────────────────────────

/// Compression bits of an entry's combined flags word (everything above the
/// nine permission bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntryFlags(u32);

/// Both `IS_DEFLATE` and `IS_BZIP2` are set; there is no way to tell which
/// codec produced the payload.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("entry flags {0:#010x} select both DEFLATE and BZIP2")]
pub struct AmbiguousCompression(pub u32);

impl EntryFlags {
    pub const NONE:       Self = Self(0);
    pub const IS_DEFLATE: Self = Self(0x0000_1000);
    pub const IS_BZIP2:   Self = Self(0x0000_2000);

    /// Build from raw bits; permission bits are masked off.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self { Self(bits & !PERMISSION_MASK) }
    #[inline]
    pub const fn bits(self) -> u32 { self.0 }
    #[inline]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    pub const fn is_deflate(self) -> bool { self.contains(Self::IS_DEFLATE) }
    pub const fn is_bzip2(self)   -> bool { self.contains(Self::IS_BZIP2) }

    /// Flags selecting exactly `method`.
    pub const fn for_method(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::None    => Self::NONE,
            CompressionMethod::Deflate => Self::IS_DEFLATE,
            CompressionMethod::Bzip2   => Self::IS_BZIP2,
        }
    }

    /// Replace the compression bits, keeping any unrelated bits.
    pub fn with_method(self, method: CompressionMethod) -> Self {
        let cleared = self.0 & !(Self::IS_DEFLATE.0 | Self::IS_BZIP2.0);
        Self(cleared | Self::for_method(method).0)
    }

    /// The compression method these flags select.
    pub fn method(self) -> Result<CompressionMethod, AmbiguousCompression> {
        match (self.is_deflate(), self.is_bzip2()) {
            (true, true)   => Err(AmbiguousCompression(self.0)),
            (true, false)  => Ok(CompressionMethod::Deflate),
            (false, true)  => Ok(CompressionMethod::Bzip2),
            (false, false) => Ok(CompressionMethod::None),
        }
    }
}

impl BitOr for EntryFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

// ── Permissions ──────────────────────────────────────────────────────────────

/// POSIX-style `rwxrwxrwx` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(u16);

impl Default for Permissions {
    fn default() -> Self { Self(0o644) }
}

impl Permissions {
    #[inline]
    pub const fn from_bits(bits: u32) -> Self { Self((bits & PERMISSION_MASK) as u16) }
    #[inline]
    pub const fn bits(self) -> u32 { self.0 as u32 }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = *b"rwxrwxrwx";
        for (i, c) in out.iter_mut().enumerate() {
            if self.0 >> (8 - i) & 1 == 0 {
                *c = b'-';
            }
        }
        f.write_str(std::str::from_utf8(&out).map_err(|_| fmt::Error)?)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid permission string `{0}`: expected 9 characters like `rw-r--r--`")]
pub struct ParsePermissionsError(pub String);

impl FromStr for Permissions {
    type Err = ParsePermissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 9 {
            return Err(ParsePermissionsError(s.to_owned()));
        }
        let mut bits = 0u16;
        for (i, (&c, &expected)) in bytes.iter().zip(b"rwxrwxrwx").enumerate() {
            match c {
                b'-' => {}
                c if c == expected => bits |= 1 << (8 - i),
                _ => return Err(ParsePermissionsError(s.to_owned())),
            }
        }
        Ok(Self(bits))
    }
}

/// Pack permissions and compression flags into the on-disk combined word.
pub fn combine(permissions: Permissions, flags: EntryFlags) -> u32 {
    permissions.bits() | flags.bits()
}

/// Split the on-disk combined word.
pub fn split(combined: u32) -> (Permissions, EntryFlags) {
    (Permissions::from_bits(combined), EntryFlags::from_bits(combined))
}
