// Copyright (c) fastmqtt-rs contributors.
// Licensed under the MIT License.

//! Pluggable payload codecs. Concrete JSON/CBOR/MsgPack implementations are
//! left to downstream crates; this module only defines the contract and the
//! identity default.

use bytes::Bytes;

/// Encodes an application value into the bytes that go on the wire.
///
/// Implementations should be pure and side-effect-free.
pub trait PayloadEncoder<T>: Send + Sync {
    /// Encode `value` into bytes suitable for a PUBLISH payload.
    fn encode(&self, value: T) -> Bytes;
}

/// Decodes wire bytes into an application value.
///
/// Implementations should be pure and side-effect-free.
pub trait PayloadDecoder<T>: Send + Sync {
    /// Decode `bytes` into a value of type `T`.
    fn decode(&self, bytes: &Bytes) -> T;
}

/// Identity codec: passes bytes through unchanged in both directions.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl PayloadEncoder<Bytes> for BytesCodec {
    fn encode(&self, value: Bytes) -> Bytes {
        value
    }
}

impl PayloadDecoder<Bytes> for BytesCodec {
    fn decode(&self, bytes: &Bytes) -> Bytes {
        bytes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_codec_round_trips() {
        let codec = BytesCodec;
        let original = Bytes::from_static(b"hello");
        let encoded = codec.encode(original.clone());
        let decoded = codec.decode(&encoded);
        assert_eq!(decoded, original);
    }
}
