//! Payload serializers and send/receive options

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Serializer used for packet payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// Compact binary encoding
    #[default]
    Bincode,
    /// JSON, handy when sniffing traffic
    Json,
}

/// Optional compression applied after serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Deflate,
}

/// How payloads are turned into bytes and back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SendReceiveOptions {
    pub serializer: SerializerKind,
    pub compression: Compression,
}

impl SendReceiveOptions {
    /// Binary serializer, no compression
    pub fn null_compression() -> Self {
        Self::default()
    }

    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != Compression::None
    }

    /// Serialize and optionally compress a payload
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let raw = match self.serializer {
            SerializerKind::Bincode => bincode::serialize(value)?,
            SerializerKind::Json => serde_json::to_vec(value)?,
        };

        match self.compression {
            Compression::None => Ok(raw),
            Compression::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Inverse of [`encode`](Self::encode)
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let raw = match self.compression {
            Compression::None => std::borrow::Cow::Borrowed(bytes),
            Compression::Deflate => {
                let mut out = Vec::new();
                DeflateDecoder::new(bytes).read_to_end(&mut out)?;
                std::borrow::Cow::Owned(out)
            }
        };

        match self.serializer {
            SerializerKind::Bincode => Ok(bincode::deserialize(&raw)?),
            SerializerKind::Json => Ok(serde_json::from_slice(&raw)?),
        }
    }
}
