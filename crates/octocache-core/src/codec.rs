//! Key and value codecs.
//!
//! A cache converts every key with a [`KeyConvertor`] before prefixing it, and
//! every value with a [`ValueEncoder`] / [`ValueDecoder`] pair. The two
//! choices are independent of each other and of the store.
//!
//! ## Value format
//!
//! Built-in value codecs write a 4-byte identity header in front of the
//! payload. Decoding bytes written by another codec (or by something else
//! entirely) fails with [`CacheError::Decode`] instead of producing a value.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;
use crate::CacheResult;

/// Identity header of [`JsonValueCodec`] payloads.
const JSON_IDENTITY: [u8; 4] = *b"OCJ1";

/// Identity header of [`MsgPackValueCodec`] payloads.
const MSGPACK_IDENTITY: [u8; 4] = *b"OCM1";

/// Converts an in-memory key into its canonical byte form (before prefixing).
pub trait KeyConvertor<K: ?Sized>: Send + Sync {
    /// Convert `key` to bytes.
    fn convert(&self, key: &K) -> CacheResult<Vec<u8>>;
}

/// Serializes cache values to bytes.
pub trait ValueEncoder<V: ?Sized>: Send + Sync {
    /// Encode `value` to bytes.
    fn encode(&self, value: &V) -> CacheResult<Vec<u8>>;
}

/// Deserializes cache values from bytes.
pub trait ValueDecoder<V>: Send + Sync {
    /// Decode bytes previously produced by the paired encoder.
    fn decode(&self, bytes: &[u8]) -> CacheResult<V>;
}

/// Uses scalar keys (strings, numbers, booleans) verbatim.
///
/// Structured keys are rejected: rendering them implicitly could make two
/// distinct keys collide. Use [`JsonKeyConvertor`] for those.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeyConvertor;

impl<K: Serialize + ?Sized> KeyConvertor<K> for IdentityKeyConvertor {
    fn convert(&self, key: &K) -> CacheResult<Vec<u8>> {
        let value = serde_json::to_value(key)
            .map_err(|e| CacheError::encode(format!("failed to serialize key: {e}")))?;
        match value {
            Value::String(s) => Ok(s.into_bytes()),
            Value::Number(n) => Ok(n.to_string().into_bytes()),
            Value::Bool(b) => Ok(b.to_string().into_bytes()),
            other => Err(CacheError::encode(format!(
                "identity key convertor accepts only scalar keys, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Renders keys as compact JSON text.
///
/// Struct fields serialize in declaration order, so equal keys always map to
/// the same bytes. Keys containing `HashMap`s should use `BTreeMap` instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonKeyConvertor;

impl<K: Serialize + ?Sized> KeyConvertor<K> for JsonKeyConvertor {
    fn convert(&self, key: &K) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(key).map_err(|e| CacheError::encode(format!("failed to serialize key: {e}")))
    }
}

/// Structural text encoding backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueCodec;

impl<V: Serialize + ?Sized> ValueEncoder<V> for JsonValueCodec {
    fn encode(&self, value: &V) -> CacheResult<Vec<u8>> {
        let mut out = JSON_IDENTITY.to_vec();
        serde_json::to_writer(&mut out, value)
            .map_err(|e| CacheError::encode(format!("json encode failed: {e}")))?;
        Ok(out)
    }
}

impl<V: DeserializeOwned> ValueDecoder<V> for JsonValueCodec {
    fn decode(&self, bytes: &[u8]) -> CacheResult<V> {
        let body = strip_identity(bytes, &JSON_IDENTITY, "json")?;
        serde_json::from_slice(body).map_err(|e| CacheError::decode(format!("json decode failed: {e}")))
    }
}

/// Generic binary object encoding backed by MessagePack (`rmp-serde`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackValueCodec;

impl<V: Serialize + ?Sized> ValueEncoder<V> for MsgPackValueCodec {
    fn encode(&self, value: &V) -> CacheResult<Vec<u8>> {
        let mut out = MSGPACK_IDENTITY.to_vec();
        rmp_serde::encode::write_named(&mut out, value)
            .map_err(|e| CacheError::encode(format!("msgpack encode failed: {e}")))?;
        Ok(out)
    }
}

impl<V: DeserializeOwned> ValueDecoder<V> for MsgPackValueCodec {
    fn decode(&self, bytes: &[u8]) -> CacheResult<V> {
        let body = strip_identity(bytes, &MSGPACK_IDENTITY, "msgpack")?;
        rmp_serde::from_slice(body)
            .map_err(|e| CacheError::decode(format!("msgpack decode failed: {e}")))
    }
}

fn strip_identity<'a>(bytes: &'a [u8], identity: &[u8; 4], codec: &str) -> CacheResult<&'a [u8]> {
    match bytes.split_first_chunk::<4>() {
        Some((header, body)) if header == identity => Ok(body),
        Some(_) => Err(CacheError::decode(format!(
            "payload was not written by the {codec} codec"
        ))),
        None => Err(CacheError::decode(format!(
            "payload too short for {codec} codec ({} bytes)",
            bytes.len()
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Built-in key convertors selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyConvertorKind {
    /// [`IdentityKeyConvertor`]
    Identity,
    /// [`JsonKeyConvertor`]
    Json,
    /// No convertor; building a cache with it fails.
    None,
}

impl KeyConvertorKind {
    /// Instantiate the convertor, or `None` for [`KeyConvertorKind::None`].
    pub fn resolve<K>(self) -> Option<Arc<dyn KeyConvertor<K>>>
    where
        K: Serialize + ?Sized + 'static,
    {
        match self {
            Self::Identity => Some(Arc::new(IdentityKeyConvertor)),
            Self::Json => Some(Arc::new(JsonKeyConvertor)),
            Self::None => None,
        }
    }
}

/// Built-in value codecs selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueCodecKind {
    /// [`JsonValueCodec`]
    Json,
    /// [`MsgPackValueCodec`]
    #[default]
    MsgPack,
}

/// Encoder/decoder pair resolved from a [`ValueCodecKind`].
pub type ValueCodecPair<V> = (Arc<dyn ValueEncoder<V>>, Arc<dyn ValueDecoder<V>>);

impl ValueCodecKind {
    /// Instantiate the encoder/decoder pair.
    pub fn resolve<V>(self) -> ValueCodecPair<V>
    where
        V: Serialize + DeserializeOwned + 'static,
    {
        match self {
            Self::Json => (Arc::new(JsonValueCodec), Arc::new(JsonValueCodec)),
            Self::MsgPack => (Arc::new(MsgPackValueCodec), Arc::new(MsgPackValueCodec)),
        }
    }
}
