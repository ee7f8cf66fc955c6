//! Signature trailer: digest verification and generation.
//!
//! Trailer layout, appended after the last content block:
//!
//! ```text
//! [ digest (len - 8 B) | algorithm id (u32 LE) | "GBMB" ]
//! ```
//!
//! The digest covers every byte of the archive before the trailer.
//! MD5, SHA1 and SHA256 are verified.  SHA512 and OpenSSL (RSA) trailers are
//! recognised but reported as unsupported; they are never treated as valid.
//! The writer always signs with SHA1.

use std::fmt;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Diagnostics};

/// Magic closing every signature trailer.
pub const TRAILER_MAGIC: &[u8; 4] = b"GBMB";
/// Smallest well-formed trailer: one digest byte, id and magic.
pub const MIN_TRAILER_LEN: usize = 9;
/// Algorithm used when writing archives.
pub const WRITE_ALGORITHM: SignatureAlgorithm = SignatureAlgorithm::Sha1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    OpenSsl,
}

impl SignatureAlgorithm {
    pub const fn id(self) -> u32 {
        match self {
            SignatureAlgorithm::Md5     => 0x0001,
            SignatureAlgorithm::Sha1    => 0x0002,
            SignatureAlgorithm::Sha256  => 0x0003,
            SignatureAlgorithm::Sha512  => 0x0004,
            SignatureAlgorithm::OpenSsl => 0x0010,
        }
    }

    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            0x0001 => Some(SignatureAlgorithm::Md5),
            0x0002 => Some(SignatureAlgorithm::Sha1),
            0x0003 => Some(SignatureAlgorithm::Sha256),
            0x0004 => Some(SignatureAlgorithm::Sha512),
            0x0010 => Some(SignatureAlgorithm::OpenSsl),
            _      => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SignatureAlgorithm::Md5     => "MD5",
            SignatureAlgorithm::Sha1    => "SHA1",
            SignatureAlgorithm::Sha256  => "SHA256",
            SignatureAlgorithm::Sha512  => "SHA512",
            SignatureAlgorithm::OpenSsl => "OPENSSL",
        }
    }

    /// Whether this implementation can compute and check the digest.
    pub const fn is_supported(self) -> bool {
        matches!(self, SignatureAlgorithm::Md5 | SignatureAlgorithm::Sha1 | SignatureAlgorithm::Sha256)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("{0} signatures are not supported")]
    Unsupported(SignatureAlgorithm),
}

/// Outcome of checking the trailer of a signed archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "algorithm", rename_all = "snake_case")]
pub enum SignatureStatus {
    Verified(SignatureAlgorithm),
    Mismatch(SignatureAlgorithm),
    Unsupported(SignatureAlgorithm),
    Unknown(u32),
    Malformed,
}

impl SignatureStatus {
    pub fn is_verified(self) -> bool {
        matches!(self, SignatureStatus::Verified(_))
    }
}

/// A parsed, not yet verified trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer<'a> {
    pub digest:       &'a [u8],
    pub algorithm_id: u32,
}

impl<'a> Trailer<'a> {
    /// Split `bytes` into digest and algorithm id, or `None` if the trailer
    /// is too short or lacks the magic.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < MIN_TRAILER_LEN || !bytes.ends_with(TRAILER_MAGIC) {
            return None;
        }
        let split = bytes.len() - 8;
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[split..split + 4]);
        Some(Self { digest: &bytes[..split], algorithm_id: u32::from_le_bytes(id) })
    }

    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        SignatureAlgorithm::from_id(self.algorithm_id)
    }
}

/// Digest of `data` under `algorithm`.
pub fn digest(algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
    match algorithm {
        SignatureAlgorithm::Md5    => Ok(Md5::digest(data).to_vec()),
        SignatureAlgorithm::Sha1   => Ok(Sha1::digest(data).to_vec()),
        SignatureAlgorithm::Sha256 => Ok(Sha256::digest(data).to_vec()),
        other                      => Err(SignatureError::Unsupported(other)),
    }
}

/// Build the trailer signing `data`.
pub fn sign(data: &[u8], algorithm: SignatureAlgorithm) -> Result<Vec<u8>, SignatureError> {
    let mut trailer = digest(algorithm, data)?;
    trailer.extend_from_slice(&algorithm.id().to_le_bytes());
    trailer.extend_from_slice(TRAILER_MAGIC);
    Ok(trailer)
}

/// Sign everything in `buf` and append the trailer to it.
pub fn append_signature(buf: &mut Vec<u8>, algorithm: SignatureAlgorithm) -> Result<(), SignatureError> {
    let trailer = sign(buf, algorithm)?;
    buf.extend_from_slice(&trailer);
    Ok(())
}

/// Check `trailer` against the bytes it claims to sign.  Every outcome other
/// than `Verified` is also recorded in `diags`.
pub fn verify(signed: &[u8], trailer: &[u8], diags: &mut Diagnostics) -> SignatureStatus {
    let Some(parsed) = Trailer::parse(trailer) else {
        diags.push(Diagnostic::MalformedTrailer { length: trailer.len() });
        return SignatureStatus::Malformed;
    };
    let Some(algorithm) = parsed.algorithm() else {
        diags.push(Diagnostic::UnknownAlgorithm { id: parsed.algorithm_id });
        return SignatureStatus::Unknown(parsed.algorithm_id);
    };
    let computed = match digest(algorithm, signed) {
        Ok(d) => d,
        Err(SignatureError::Unsupported(_)) => {
            diags.push(Diagnostic::UnsupportedAlgorithm { algorithm });
            return SignatureStatus::Unsupported(algorithm);
        }
    };

    if computed != parsed.digest {
        diags.push(Diagnostic::SignatureMismatch {
            algorithm,
            expected: hex::encode(parsed.digest),
            actual:   hex::encode(&computed),
        });
        return SignatureStatus::Mismatch(algorithm);
    }
    tracing::debug!(%algorithm, signed_len = signed.len(), "signature verified");
    SignatureStatus::Verified(algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = b"<?php __HALT_COMPILER(); ?>\r\nbody bytes";

    #[test]
    fn sign_then_verify_each_supported_algorithm() {
        for alg in [SignatureAlgorithm::Md5, SignatureAlgorithm::Sha1, SignatureAlgorithm::Sha256] {
            let trailer = sign(BODY, alg).unwrap();
            let mut diags = Diagnostics::new();
            assert_eq!(verify(BODY, &trailer, &mut diags), SignatureStatus::Verified(alg));
            assert!(diags.is_clean());
        }
    }

    #[test]
    fn sha1_trailer_layout() {
        let trailer = sign(BODY, SignatureAlgorithm::Sha1).unwrap();
        assert_eq!(trailer.len(), 20 + 8);
        assert_eq!(&trailer[20..24], &[2, 0, 0, 0]);
        assert_eq!(&trailer[24..], b"GBMB");
    }

    #[test]
    fn tampered_body_mismatches() {
        let trailer = sign(BODY, SignatureAlgorithm::Sha256).unwrap();
        let mut diags = Diagnostics::new();
        let status = verify(b"something else", &trailer, &mut diags);
        assert_eq!(status, SignatureStatus::Mismatch(SignatureAlgorithm::Sha256));
        assert!(diags.any(|d| matches!(d, Diagnostic::SignatureMismatch { .. })));
    }

    #[test]
    fn short_or_unmagicked_trailer_is_malformed() {
        let mut diags = Diagnostics::new();
        assert_eq!(verify(BODY, b"GBMB", &mut diags), SignatureStatus::Malformed);
        assert_eq!(verify(BODY, b"\x01\x02\x00\x00\x00GBMX", &mut diags), SignatureStatus::Malformed);
        assert_eq!(verify(BODY, b"", &mut diags), SignatureStatus::Malformed);
        assert_eq!(diags.len(), 3);
    }

    #[test]
    fn unimplemented_algorithms_are_never_verified() {
        for alg in [SignatureAlgorithm::Sha512, SignatureAlgorithm::OpenSsl] {
            let mut trailer = vec![0u8; 64];
            trailer.extend_from_slice(&alg.id().to_le_bytes());
            trailer.extend_from_slice(TRAILER_MAGIC);
            let mut diags = Diagnostics::new();
            assert_eq!(verify(BODY, &trailer, &mut diags), SignatureStatus::Unsupported(alg));
            assert!(diags.any(|d| matches!(d, Diagnostic::UnsupportedAlgorithm { .. })));
            assert_eq!(sign(BODY, alg), Err(SignatureError::Unsupported(alg)));
        }
    }

    #[test]
    fn unknown_id_is_reported() {
        let mut trailer = vec![0xAB; 20];
        trailer.extend_from_slice(&0x0099u32.to_le_bytes());
        trailer.extend_from_slice(TRAILER_MAGIC);
        let mut diags = Diagnostics::new();
        assert_eq!(verify(BODY, &trailer, &mut diags), SignatureStatus::Unknown(0x99));
    }
}
