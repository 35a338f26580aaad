//! Building wire-ready config responses.

use crate::checksums::{ClientChecksums, PayloadChecksums};
use crate::types::Generation;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ZSTD_LEVEL: i32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Zstd,
}

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("uncompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// A payload as it goes on the wire, with enough metadata for the receiver
/// to decompress and validate it.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressionEnvelope {
    compression: CompressionType,
    uncompressed_size: usize,
    data: Bytes,
}

impl CompressionEnvelope {
    pub fn uncompressed(payload: Bytes) -> Self {
        CompressionEnvelope {
            compression: CompressionType::None,
            uncompressed_size: payload.len(),
            data: payload,
        }
    }

    pub fn compress(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let data = zstd::bulk::compress(payload, ZSTD_LEVEL)?;
        Ok(CompressionEnvelope {
            compression: CompressionType::Zstd,
            uncompressed_size: payload.len(),
            data: Bytes::from(data),
        })
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Restores the original payload and checks its length against the
    /// recorded uncompressed size.
    pub fn decompress(&self) -> Result<Bytes, EnvelopeError> {
        let payload = match self.compression {
            CompressionType::None => self.data.clone(),
            CompressionType::Zstd => {
                Bytes::from(zstd::bulk::decompress(&self.data, self.uncompressed_size)?)
            }
        };

        if payload.len() != self.uncompressed_size {
            return Err(EnvelopeError::SizeMismatch {
                expected: self.uncompressed_size,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }
}

/// A successful answer to a config request.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigResponse {
    pub generation: Generation,
    pub apply_on_restart: bool,
    pub checksums: PayloadChecksums,
    pub envelope: CompressionEnvelope,
}

/// Turns a raw payload into a [`ConfigResponse`].
///
/// Implementations differ only in how the payload is stored on the wire; the
/// variant in use is a static server setting.
pub trait PayloadResponseFactory: Send + Sync {
    fn compression(&self) -> CompressionType;

    fn envelope(&self, payload: Bytes) -> Result<CompressionEnvelope, EnvelopeError>;

    /// Checksums to put on a response for a client that asserted `client`.
    fn checksums(&self, payload: &[u8], client: &ClientChecksums) -> PayloadChecksums {
        PayloadChecksums::compute(payload, client.needs_legacy())
    }

    /// Builds a response from checksums that were already computed for this
    /// payload.
    fn build_response(
        &self,
        payload: Bytes,
        generation: Generation,
        apply_on_restart: bool,
        checksums: PayloadChecksums,
    ) -> Result<ConfigResponse, EnvelopeError> {
        Ok(ConfigResponse {
            generation,
            apply_on_restart,
            checksums,
            envelope: self.envelope(payload)?,
        })
    }

    fn create_response(
        &self,
        payload: Bytes,
        generation: Generation,
        apply_on_restart: bool,
        client: &ClientChecksums,
    ) -> Result<ConfigResponse, EnvelopeError> {
        let checksums = self.checksums(&payload, client);
        self.build_response(payload, generation, apply_on_restart, checksums)
    }
}

pub struct UncompressedResponseFactory;

impl PayloadResponseFactory for UncompressedResponseFactory {
    fn compression(&self) -> CompressionType {
        CompressionType::None
    }

    fn envelope(&self, payload: Bytes) -> Result<CompressionEnvelope, EnvelopeError> {
        Ok(CompressionEnvelope::uncompressed(payload))
    }
}

pub struct CompressedResponseFactory;

impl PayloadResponseFactory for CompressedResponseFactory {
    fn compression(&self) -> CompressionType {
        CompressionType::Zstd
    }

    fn envelope(&self, payload: Bytes) -> Result<CompressionEnvelope, EnvelopeError> {
        CompressionEnvelope::compress(&payload)
    }
}

pub fn response_factory(compression: CompressionType) -> Arc<dyn PayloadResponseFactory> {
    match compression {
        CompressionType::None => Arc::new(UncompressedResponseFactory),
        CompressionType::Zstd => Arc::new(CompressedResponseFactory),
    }
}
