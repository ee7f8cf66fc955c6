//! Soft integrity violations.
//!
//! Decoding is permissive: anything short of a layout the reader cannot
//! follow is recorded as a [`Diagnostic`] and processing continues with
//! best-effort values.  Callers inspect the accumulated [`Diagnostics`] after
//! a single pass instead of catching errors one at a time.
//!
//! Every recorded diagnostic is also emitted as a `tracing` warning.

use serde::Serialize;
use thiserror::Error;

use crate::signature::SignatureAlgorithm;

/// One soft violation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The stub does not end with the halt marker and an accepted closing tag.
    #[error("stub does not end with `__HALT_COMPILER();` and a recognised closing tag")]
    MalformedStub,

    #[error("manifest declares {declared} bytes but {consumed} were consumed")]
    ManifestLengthMismatch { declared: u64, consumed: u64 },

    #[error("entry `{entry}`: crc32 mismatch (stored {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch { entry: String, expected: u32, actual: u32 },

    /// Content length differs from the declared size: a compressed stream
    /// ended early, or a stored block is longer or shorter than `size`.
    #[error("entry `{entry}`: declared size {declared} but content is {actual} bytes")]
    SizeMismatch { entry: String, declared: u32, actual: u64 },

    /// Both DEFLATE and BZIP2 bits are set; content is kept as stored.
    #[error("entry `{entry}`: flags {flags:#010x} select both DEFLATE and BZIP2, content left undecompressed")]
    AmbiguousCompression { entry: String, flags: u32 },

    /// The injected metadata decoder rejected a blob; metadata is left empty.
    #[error("metadata of {owner} could not be decoded: {reason}")]
    MetadataUndecodable { owner: String, reason: String },

    #[error("signature trailer is malformed ({length} bytes)")]
    MalformedTrailer { length: usize },

    #[error("{algorithm} signature mismatch (stored {expected}, computed {actual})")]
    SignatureMismatch { algorithm: SignatureAlgorithm, expected: String, actual: String },

    /// Recognised but not verifiable by this implementation.
    #[error("{algorithm} signatures are not supported; archive integrity was not verified")]
    UnsupportedAlgorithm { algorithm: SignatureAlgorithm },

    #[error("unknown signature algorithm id {id:#06x}")]
    UnknownAlgorithm { id: u32 },
}

impl Diagnostic {
    /// Stable snake_case name of the variant, as used in serialized reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::MalformedStub                 => "malformed_stub",
            Diagnostic::ManifestLengthMismatch { .. } => "manifest_length_mismatch",
            Diagnostic::ChecksumMismatch { .. }       => "checksum_mismatch",
            Diagnostic::SizeMismatch { .. }           => "size_mismatch",
            Diagnostic::AmbiguousCompression { .. }   => "ambiguous_compression",
            Diagnostic::MetadataUndecodable { .. }    => "metadata_undecodable",
            Diagnostic::MalformedTrailer { .. }       => "malformed_trailer",
            Diagnostic::SignatureMismatch { .. }      => "signature_mismatch",
            Diagnostic::UnsupportedAlgorithm { .. }   => "unsupported_algorithm",
            Diagnostic::UnknownAlgorithm { .. }       => "unknown_algorithm",
        }
    }

    /// Name of the entry this diagnostic concerns, if any.
    pub fn entry(&self) -> Option<&str> {
        match self {
            Diagnostic::ChecksumMismatch { entry, .. }
            | Diagnostic::SizeMismatch { entry, .. }
            | Diagnostic::AmbiguousCompression { entry, .. } => Some(entry.as_str()),
            _ => None,
        }
    }
}

/// Accumulator threaded through a decode or encode pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self { Self::default() }

    /// Record `diag` and log it.
    pub fn push(&mut self, diag: Diagnostic) {
        tracing::warn!(kind = diag.kind(), entry = diag.entry().unwrap_or("-"), "{diag}");
        self.items.push(diag);
    }

    pub fn is_clean(&self) -> bool { self.items.is_empty() }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> { self.items.iter() }
    pub fn as_slice(&self) -> &[Diagnostic] { &self.items }

    /// True when any recorded diagnostic matches `pred`.
    pub fn any(&self, pred: impl Fn(&Diagnostic) -> bool) -> bool {
        self.items.iter().any(pred)
    }

    /// Diagnostics attached to the entry called `name`.
    pub fn for_entry<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.items.iter().filter(move |d| d.entry() == Some(name))
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        if self.items.is_empty() {
            return "no integrity issues".to_owned();
        }
        let mut kinds: Vec<&str> = self.items.iter().map(Diagnostic::kind).collect();
        kinds.dedup();
        format!("{} integrity issue(s): {}", self.items.len(), kinds.join(", "))
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;
    fn into_iter(self) -> Self::IntoIter { self.items.iter() }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;
    fn into_iter(self) -> Self::IntoIter { self.items.into_iter() }
}
