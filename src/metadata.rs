//! Injected codec for the opaque metadata blobs.
//!
//! The archive format stores metadata as a length-prefixed byte block on the
//! archive and on each entry; what those bytes mean is up to the caller.  A
//! [`MetadataCodec`] turns them into values and back.
//!
//! A zero-length block means "no metadata": it decodes to `None` without
//! calling the codec.  A value that encodes to zero bytes is therefore read
//! back as `None`.

use std::marker::PhantomData;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("metadata codec error: {0}")]
pub struct MetadataError(pub String);

impl MetadataError {
    pub fn new(msg: impl Into<String>) -> Self { Self(msg.into()) }
}

pub trait MetadataCodec {
    type Value;
    /// An empty result is stored as absent metadata.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, MetadataError>;
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, MetadataError>;
}

/// Keeps metadata as the raw bytes found on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMetadata;

impl MetadataCodec for RawMetadata {
    type Value = Vec<u8>;
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, MetadataError> { Ok(value.clone()) }
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, MetadataError> { Ok(bytes.to_vec()) }
}

/// Metadata as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadata;

impl MetadataCodec for JsonMetadata {
    type Value = serde_json::Value;
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, MetadataError> {
        serde_json::to_vec(value).map_err(|e| MetadataError(e.to_string()))
    }
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, MetadataError> {
        serde_json::from_slice(bytes).map_err(|e| MetadataError(e.to_string()))
    }
}

/// Adapts a plain `encode` / `decode` function pair.
pub struct MetadataFns<V, E, D> {
    encode: E,
    decode: D,
    _value: PhantomData<fn() -> V>,
}

impl<V, E, D> MetadataFns<V, E, D>
where
    E: Fn(&V) -> Result<Vec<u8>, MetadataError>,
    D: Fn(&[u8]) -> Result<V, MetadataError>,
{
    pub fn new(encode: E, decode: D) -> Self {
        Self { encode, decode, _value: PhantomData }
    }
}

impl<V, E, D> MetadataCodec for MetadataFns<V, E, D>
where
    E: Fn(&V) -> Result<Vec<u8>, MetadataError>,
    D: Fn(&[u8]) -> Result<V, MetadataError>,
{
    type Value = V;
    fn encode(&self, value: &V) -> Result<Vec<u8>, MetadataError> { (self.encode)(value) }
    fn decode(&self, bytes: &[u8]) -> Result<V, MetadataError> { (self.decode)(bytes) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let v = serde_json::json!({ "author": "cyh", "tags": ["a", "b"] });
        let bytes = JsonMetadata.encode(&v).unwrap();
        assert_eq!(JsonMetadata.decode(&bytes).unwrap(), v);
        assert!(JsonMetadata.decode(b"a:1:{").is_err());
    }

    #[test]
    fn closure_pair() {
        let codec = MetadataFns::new(
            |v: &String| Ok(v.as_bytes().to_vec()),
            |b: &[u8]| String::from_utf8(b.to_vec()).map_err(|e| MetadataError::new(e.to_string())),
        );
        let bytes = codec.encode(&"s:3:\"abc\";".to_owned()).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), "s:3:\"abc\";");
    }
}
