//! Payload encodings.
//!
//! The wire carries opaque payload bytes; what they mean is negotiated in
//! band: a HELLO advertises encoding names, a SELECT_ENCODING picks one,
//! and the session stores the resulting [`Encoding`] for the life of the
//! connection. Unlike a compile-time codec choice, the selection is only
//! known at runtime, so typed encode/decode dispatches through the enum.
//!
//! `raw` is a valid negotiated name but has no typed form: raw payloads
//! travel through the byte-level `call`/`push` surface untouched, and the
//! typed helpers refuse them rather than guess a serialization.
//!
//! MessagePack payloads are emitted struct-as-map. Peers decode into
//! field-name maps; the positional array form would silently misassign
//! fields the moment one side reorders a struct.
//!
//! # Example
//!
//! ```
//! use duplexwire::codec::Encoding;
//!
//! let enc = Encoding::from_name(b"json").unwrap();
//! let bytes = enc.encode(&vec![1, 2, 3]).unwrap();
//! let back: Vec<i32> = enc.decode(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use crate::error::{Error, Result};

/// A payload encoding negotiated via HELLO / SELECT_ENCODING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// MessagePack, struct-as-map. The preferred default.
    #[default]
    MsgPack,
    /// JSON text.
    Json,
    /// Opaque bytes; no typed encode/decode.
    Raw,
}

impl Encoding {
    /// Names advertised in an outgoing HELLO, preference first.
    pub const DEFAULT_ADVERTISED: &'static [&'static str] = &["msgpack", "json", "raw"];

    /// Look up an encoding by its wire name.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"msgpack" => Some(Self::MsgPack),
            b"json" => Some(Self::Json),
            b"raw" => Some(Self::Raw),
            _ => None,
        }
    }

    /// The wire name of this encoding.
    pub fn name(self) -> &'static str {
        match self {
            Self::MsgPack => "msgpack",
            Self::Json => "json",
            Self::Raw => "raw",
        }
    }

    /// Encode a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized, or for
    /// [`Encoding::Raw`], which carries opaque bytes only.
    pub fn encode<T: serde::Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::Raw => Err(Error::Protocol(
                "raw encoding carries opaque bytes, not typed values".to_string(),
            )),
        }
    }

    /// Decode payload bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes do not parse as this encoding, or for
    /// [`Encoding::Raw`], which carries opaque bytes only.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Self::Json => Ok(serde_json::from_slice(bytes)?),
            Self::Raw => Err(Error::Protocol(
                "raw encoding carries opaque bytes, not typed values".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Job {
        id: u32,
        kind: String,
    }

    #[test]
    fn test_name_round_trip() {
        for enc in [Encoding::MsgPack, Encoding::Json, Encoding::Raw] {
            assert_eq!(Encoding::from_name(enc.name().as_bytes()), Some(enc));
        }
        assert_eq!(Encoding::from_name(b"cbor"), None);
        assert_eq!(Encoding::from_name(b"MSGPACK"), None);
        assert_eq!(Encoding::from_name(b""), None);
    }

    #[test]
    fn test_advertised_names_resolve_in_preference_order() {
        let resolved: Vec<Encoding> = Encoding::DEFAULT_ADVERTISED
            .iter()
            .filter_map(|name| Encoding::from_name(name.as_bytes()))
            .collect();
        assert_eq!(
            resolved,
            vec![Encoding::MsgPack, Encoding::Json, Encoding::Raw]
        );
    }

    #[test]
    fn test_typed_round_trip_per_encoding() {
        let job = Job {
            id: 9,
            kind: "reindex".to_string(),
        };
        for enc in [Encoding::MsgPack, Encoding::Json] {
            let bytes = enc.encode(&job).unwrap();
            let back: Job = enc.decode(&bytes).unwrap();
            assert_eq!(back, job);
        }
    }

    #[test]
    fn test_msgpack_structs_keep_field_names() {
        // A struct encoded as a map decodes into a plain field-name map on
        // the other side, which is what cross-language peers do.
        let job = Job {
            id: 3,
            kind: "gc".to_string(),
        };
        let bytes = Encoding::MsgPack.encode(&job).unwrap();

        let generic: HashMap<String, serde_json::Value> =
            Encoding::MsgPack.decode(&bytes).unwrap();
        assert_eq!(generic["id"], serde_json::json!(3));
        assert_eq!(generic["kind"], serde_json::json!("gc"));
    }

    #[test]
    fn test_msgpack_binary_payload() {
        let data: Vec<u8> = (0..=255).collect();
        let bytes = Encoding::MsgPack
            .encode(&serde_bytes::Bytes::new(&data))
            .unwrap();
        let back: serde_bytes::ByteBuf = Encoding::MsgPack.decode(&bytes).unwrap();
        assert_eq!(back.as_ref(), &data[..]);
    }

    #[test]
    fn test_json_is_readable_text() {
        let bytes = Encoding::Json
            .encode(&Job {
                id: 1,
                kind: "noop".to_string(),
            })
            .unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"kind\":\"noop\""));
    }

    #[test]
    fn test_cross_encoding_bytes_do_not_parse() {
        let job = Job {
            id: 2,
            kind: "sync".to_string(),
        };
        let msgpack = Encoding::MsgPack.encode(&job).unwrap();
        assert!(Encoding::Json.decode::<Job>(&msgpack).is_err());

        let json = Encoding::Json.encode(&job).unwrap();
        assert!(Encoding::MsgPack.decode::<Job>(&json).is_err());
    }

    #[test]
    fn test_raw_rejects_typed_values() {
        assert!(Encoding::Raw.encode(&1i32).is_err());
        assert!(Encoding::Raw.decode::<i32>(b"\x01").is_err());
    }
}
