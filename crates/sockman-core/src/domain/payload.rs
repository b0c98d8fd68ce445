//! Payload serializer / unserializer pairs.
//!
//! Protocol units only ever see bytes.  Command units work with typed
//! messages; the codec sits between the two:
//!
//! ```text
//! command unit ──send(&Outbound)──► serialize ──► send stack ──► SEND queue
//! RECV queue ──► receive stack ──► unserialize ──► dispatcher / command unit
//! ```

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error produced by a [`PayloadCodec`].
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Serialize(String),

    #[error("failed to unserialize payload: {0}")]
    Unserialize(String),
}

/// Converts between command-layer messages and wire payload bytes.
pub trait PayloadCodec {
    type Inbound: 'static;
    type Outbound: 'static;

    /// # Errors
    ///
    /// Returns [`CodecError::Serialize`] when the message cannot be encoded.
    fn serialize(&self, message: &Self::Outbound) -> Result<Vec<u8>, CodecError>;

    /// # Errors
    ///
    /// Returns [`CodecError::Unserialize`] when the bytes are not a valid message.
    fn unserialize(&self, raw: Vec<u8>) -> Result<Self::Inbound, CodecError>;
}

/// Pass-through codec: payloads reach the command layer unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Raw;

impl PayloadCodec for Raw {
    type Inbound = Vec<u8>;
    type Outbound = Vec<u8>;

    fn serialize(&self, message: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(message.clone())
    }

    fn unserialize(&self, raw: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(raw)
    }
}

/// JSON codec reading `In` and writing `Out` with `serde_json`.
pub struct Json<In, Out>(PhantomData<fn() -> (In, Out)>);

impl<In, Out> Default for Json<In, Out> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<In, Out> PayloadCodec for Json<In, Out>
where
    In: DeserializeOwned + 'static,
    Out: Serialize + 'static,
{
    type Inbound = In;
    type Outbound = Out;

    fn serialize(&self, message: &Out) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn unserialize(&self, raw: Vec<u8>) -> Result<In, CodecError> {
        serde_json::from_slice(&raw).map_err(|e| CodecError::Unserialize(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        cmd: String,
    }

    #[test]
    fn test_raw_codec_passes_bytes_through() {
        let codec = Raw;
        assert_eq!(codec.serialize(&vec![1, 2, 3]).unwrap(), vec![1, 2, 3]);
        assert_eq!(codec.unserialize(vec![9]).unwrap(), vec![9]);
    }

    #[test]
    fn test_json_codec_reads_inbound_type() {
        // Arrange
        let codec: Json<Greeting, Greeting> = Json::default();

        // Act
        let msg = codec.unserialize(br#"{"cmd":"hello"}"#.to_vec()).unwrap();

        // Assert
        assert_eq!(msg.cmd, "hello");
    }

    #[test]
    fn test_json_codec_writes_outbound_type() {
        let codec: Json<Greeting, Greeting> = Json::default();
        let bytes = codec
            .serialize(&Greeting {
                cmd: "bye".to_string(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"cmd":"bye"}"#.to_vec());
    }

    #[test]
    fn test_json_codec_rejects_invalid_json() {
        let codec: Json<Greeting, Greeting> = Json::default();
        let result = codec.unserialize(b"not json".to_vec());
        assert!(matches!(result, Err(CodecError::Unserialize(_))));
    }
}
