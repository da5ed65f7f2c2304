//! Bucket Blob Compression
//!
//! Buckets travel to the shared backend as framed blobs:
//!
//! ```text
//! [tag: u8][body]     tag 0 = raw JSON, tag 1 = LZ4 block (size-prefixed)
//! ```
//!
//! Small bodies and bodies LZ4 cannot shrink are stored raw. A compression
//! failure falls back to raw; a decompression failure is an error, which the
//! cache treats as a backend miss.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Blob encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    None,
    Lz4,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Frame tag byte
    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Lz4),
            other => Err(Error::DecompressionFailed {
                algorithm: "frame".into(),
                reason: format!("unknown compression tag {}", other),
            }),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compression settings for bucket blobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress blobs at all
    pub enabled: bool,
    /// Minimum body size to attempt compression
    pub min_size_bytes: u64,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: 1024,
            level: 3,
        }
    }
}

/// Frames and unframes bucket blobs
#[derive(Debug, Clone, Default)]
pub struct CompressionManager {
    config: CompressionConfig,
}

impl CompressionManager {
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Frame `body`, compressing it when worthwhile.
    ///
    /// Returns the blob and the algorithm recorded in its tag.
    pub fn seal(&self, body: &[u8]) -> (Bytes, CompressionAlgorithm) {
        let algorithm = if self.config.enabled && body.len() as u64 >= self.config.min_size_bytes {
            CompressionAlgorithm::Lz4
        } else {
            CompressionAlgorithm::None
        };

        let packed = match algorithm {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Lz4 => match self.lz4_compress(body) {
                Ok(compressed) if compressed.len() < body.len() => Some(compressed),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Compression failed, storing bucket uncompressed: {}", e);
                    None
                }
            },
        };

        let (algorithm, payload) = match &packed {
            Some(compressed) => (CompressionAlgorithm::Lz4, compressed.as_slice()),
            None => (CompressionAlgorithm::None, body),
        };
        let mut blob = BytesMut::with_capacity(payload.len() + 1);
        blob.put_u8(algorithm.tag());
        blob.put_slice(payload);
        (blob.freeze(), algorithm)
    }

    /// Recover the body of a framed blob
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let (&tag, payload) = blob.split_first().ok_or_else(|| Error::DecompressionFailed {
            algorithm: "frame".into(),
            reason: "empty blob".into(),
        })?;
        match CompressionAlgorithm::from_tag(tag)? {
            CompressionAlgorithm::None => Ok(payload.to_vec()),
            CompressionAlgorithm::Lz4 => {
                lz4::block::decompress(payload, None).map_err(|e| Error::DecompressionFailed {
                    algorithm: "LZ4".into(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn lz4_compress(&self, body: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            body,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive(len: usize) -> Vec<u8> {
        br#"{"l4":"X","l3":"K","l2":"K"},"#
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn test_small_body_stays_raw() {
        let manager = CompressionManager::default();
        let (blob, algorithm) = manager.seal(b"tiny");
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(blob[0], 0);
        assert_eq!(manager.open(&blob).unwrap(), b"tiny");
    }

    #[test]
    fn test_large_body_is_compressed() {
        let manager = CompressionManager::default();
        let body = repetitive(8192);
        let (blob, algorithm) = manager.seal(&body);
        assert_eq!(algorithm, CompressionAlgorithm::Lz4);
        assert!(blob.len() < body.len());
        assert_eq!(manager.open(&blob).unwrap(), body);
    }

    #[test]
    fn test_disabled_compression() {
        let manager = CompressionManager::with_config(CompressionConfig {
            enabled: false,
            ..Default::default()
        });
        let body = repetitive(8192);
        let (blob, algorithm) = manager.seal(&body);
        assert_eq!(algorithm, CompressionAlgorithm::None);
        assert_eq!(blob.len(), body.len() + 1);
    }

    #[test]
    fn test_bad_frames_are_rejected() {
        let manager = CompressionManager::default();
        assert!(manager.open(&[]).is_err());
        assert!(manager.open(&[9, 1, 2]).is_err());
        assert!(manager.open(&[1, 0xff, 0xff]).is_err());
    }
}
