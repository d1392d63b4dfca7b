//! Conversion between values and the bytes kept in a [`Store`](crate::store::Store).

use std::fmt;
use std::string::FromUtf8Error;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::CacheError;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Utf8(#[from] FromUtf8Error),
}

/// Encodes and decodes values of type `T`.
pub trait Codec<T>: Send + Sync + fmt::Debug + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, data: &[u8]) -> Result<T, CodecError>;

    /// Whether an empty byte string is a valid encoding.
    ///
    /// Codecs that return `false` never see empty input in [`decode`](Self::decode), it is
    /// reported as [`CacheError::DataIsNil`] instead.
    fn accepts_empty(&self) -> bool {
        false
    }
}

/// Stores byte buffers and strings as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn accepts_empty(&self) -> bool {
        true
    }
}

impl Codec<Bytes> for RawCodec {
    fn encode(&self, value: &Bytes) -> Result<Vec<u8>, CodecError> {
        Ok(value.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn accepts_empty(&self) -> bool {
        true
    }
}

impl Codec<String> for RawCodec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<String, CodecError> {
        Ok(String::from_utf8(data.to_vec())?)
    }

    fn accepts_empty(&self) -> bool {
        true
    }
}

/// Encodes any serde type as JSON. This is the default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Encodes any serde type as YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl<T> Codec<T> for YamlCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn decode(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

pub(crate) fn encode<T, C: Codec<T>>(codec: &C, value: &T) -> Result<Bytes, CacheError> {
    let data = codec
        .encode(value)
        .map_err(|err| CacheError::Encode(err.to_string()))?;
    // Empty data could never be decoded again.
    if data.is_empty() && !codec.accepts_empty() {
        return Err(CacheError::DataIsNil);
    }
    Ok(Bytes::from(data))
}

pub(crate) fn decode<T, C: Codec<T>>(codec: &C, data: &[u8]) -> Result<T, CacheError> {
    if data.is_empty() && !codec.accepts_empty() {
        return Err(CacheError::DataIsNil);
    }
    codec
        .decode(data)
        .map_err(|err| CacheError::Decode(err.to_string()))
}
