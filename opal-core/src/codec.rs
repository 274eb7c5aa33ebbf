//! Binary codecs for the peer RPC wire
//!
//! Every peer endpoint commits to exactly one of two codecs and the choice is
//! part of the endpoint's ABI:
//!
//! - [`GeneralCodec`] - a self-describing stream encoder (CBOR). Used by the
//!   IAM, info-probe, lock, trace, listen, bloom, disk-id, update, heal and
//!   log endpoints, where payloads carry nested maps and tagged structs.
//! - [`CompactCodec`] - a schema-compiled compact encoder (bincode) with
//!   stable field ordering and length-prefixed sequences. Used by the bucket
//!   stats and metacache endpoints.
//!
//! Readers and writers of the same codec are compatible across identical
//! schema versions; incompatible schema changes require a new endpoint.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// A binary encoder/decoder pair for peer payloads.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Self-describing stream codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralCodec;

impl Codec for GeneralCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Schema-compiled compact codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCodec;

impl Codec for CompactCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
