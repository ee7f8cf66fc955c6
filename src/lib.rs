//! Reader and writer for the phar archive container format.

pub mod archive;
pub mod checksum;
pub mod codec;
pub mod diagnostics;
pub mod flags;
pub mod io_stream;
pub mod manifest;
pub mod metadata;
pub mod signature;
pub mod stub;

pub use archive::{Archive, ArchiveError, DecodeOptions, Decoded, EncodeOptions, Encoded, Entry};
pub use codec::{get_codec, CompressionMethod};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use flags::{EntryFlags, GlobalFlags, Permissions};
pub use manifest::{EntryHeader, Manifest};
pub use metadata::{JsonMetadata, MetadataCodec, MetadataFns, RawMetadata};
pub use signature::{SignatureAlgorithm, SignatureStatus};
