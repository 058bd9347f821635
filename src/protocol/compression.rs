//! Payload compression shared by legacy messages and record batches.
//!
//! Supports Kafka compression codecs:
//! - None (0)
//! - Gzip (1)
//! - Snappy (2)
//! - LZ4 (3)
//! - Zstd (4)
//!
//! Each codec other than `None` is linked in by its own cargo feature. Asking for a codec
//! that was not linked fails encoding with [`EncodingError::UnsupportedCodec`] and decoding
//! with [`DecodingError::Decompression`].

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-lz4",
    feature = "compression-zstd"
))]
use std::io::Read;
#[cfg(any(feature = "compression-gzip", feature = "compression-lz4"))]
use std::io::Write;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use crate::config::DEFAULT_MAX_RESPONSE_SIZE;
use crate::error::{DecodingError, EncodingError};

/// Low three bits of both the message and the record batch attributes.
pub const COMPRESSION_CODEC_MASK: i16 = 0x07;

/// https://kafka.apache.org/documentation/#recordbatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i8)]
pub enum CompressionCodec {
    None = 0,
    Gzip = 1,
    Snappy = 2,
    Lz4 = 3,
    Zstd = 4,
}

// not #[default]: num_enum would also map unknown ids to it
impl Default for CompressionCodec {
    fn default() -> Self {
        CompressionCodec::None
    }
}

impl CompressionCodec {
    /// Extracts the codec from an attributes field, ignoring the format-specific flag bits.
    pub fn from_attributes(attributes: i16) -> Result<Self, DecodingError> {
        let id = (attributes & COMPRESSION_CODEC_MASK) as i8;
        Self::try_from(id).map_err(|e| DecodingError::UnknownCodec(e.number))
    }

    pub fn id(self) -> i8 {
        self.into()
    }

    pub fn is_compressed(self) -> bool {
        self != CompressionCodec::None
    }
}

/// Compresses `data` as one unit. `level` is honoured by gzip and zstd and ignored otherwise.
pub fn compress(
    codec: CompressionCodec,
    level: Option<i32>,
    data: &[u8],
) -> Result<Vec<u8>, EncodingError> {
    #[cfg(any(
        feature = "compression-gzip",
        feature = "compression-snappy",
        feature = "compression-lz4",
        feature = "compression-zstd"
    ))]
    let failed = |reason: String| EncodingError::Compression { codec, reason };

    let compressed = match codec {
        CompressionCodec::None => data.to_vec(),
        #[cfg(feature = "compression-gzip")]
        CompressionCodec::Gzip => {
            use flate2::{write::GzEncoder, Compression};

            let level = level
                .map(|l| Compression::new(l.clamp(0, 9) as u32))
                .unwrap_or_default();
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder
                .write_all(data)
                .map_err(|e| failed(e.to_string()))?;
            encoder.finish().map_err(|e| failed(e.to_string()))?
        }
        #[cfg(feature = "compression-snappy")]
        CompressionCodec::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| failed(e.to_string()))?,
        #[cfg(feature = "compression-lz4")]
        CompressionCodec::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder
                .write_all(data)
                .map_err(|e| failed(e.to_string()))?;
            encoder.finish().map_err(|e| failed(e.to_string()))?
        }
        #[cfg(feature = "compression-zstd")]
        CompressionCodec::Zstd => {
            zstd::stream::encode_all(data, level.unwrap_or(0)).map_err(|e| failed(e.to_string()))?
        }
        #[allow(unreachable_patterns)]
        other => return Err(EncodingError::UnsupportedCodec(other)),
    };

    debug!(
        ?codec,
        uncompressed = data.len(),
        compressed = compressed.len(),
        "compressed payload"
    );
    Ok(compressed)
}

/// Decompresses `data`, refusing output larger than the default maximum response size.
pub fn decompress(codec: CompressionCodec, data: &[u8]) -> Result<Vec<u8>, DecodingError> {
    decompress_bounded(codec, data, DEFAULT_MAX_RESPONSE_SIZE)
}

/// Decompresses `data`, refusing to produce more than `limit` bytes.
pub fn decompress_bounded(
    codec: CompressionCodec,
    data: &[u8],
    limit: usize,
) -> Result<Vec<u8>, DecodingError> {
    let decompressed = match codec {
        CompressionCodec::None => {
            check_limit(data.len(), limit)?;
            data.to_vec()
        }
        #[cfg(feature = "compression-gzip")]
        CompressionCodec::Gzip => read_bounded(codec, flate2::read::GzDecoder::new(data), limit)?,
        #[cfg(feature = "compression-snappy")]
        CompressionCodec::Snappy => decompress_snappy(data, limit)?,
        #[cfg(feature = "compression-lz4")]
        CompressionCodec::Lz4 => {
            read_bounded(codec, lz4_flex::frame::FrameDecoder::new(data), limit)?
        }
        #[cfg(feature = "compression-zstd")]
        CompressionCodec::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(data).map_err(|e| {
                DecodingError::Decompression {
                    codec,
                    reason: e.to_string(),
                }
            })?;
            read_bounded(codec, decoder, limit)?
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(DecodingError::Decompression {
                codec: other,
                reason: "codec not linked into this build".to_string(),
            })
        }
    };

    debug!(
        ?codec,
        compressed = data.len(),
        decompressed = decompressed.len(),
        "decompressed payload"
    );
    Ok(decompressed)
}

fn check_limit(size: usize, limit: usize) -> Result<(), DecodingError> {
    if size > limit {
        return Err(DecodingError::ResponseTooLarge { size, max: limit });
    }
    Ok(())
}

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-lz4",
    feature = "compression-zstd"
))]
fn read_bounded(
    codec: CompressionCodec,
    reader: impl Read,
    limit: usize,
) -> Result<Vec<u8>, DecodingError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodingError::Decompression {
            codec,
            reason: e.to_string(),
        })?;
    check_limit(out.len(), limit)?;
    Ok(out)
}

#[cfg(feature = "compression-snappy")]
fn decompress_snappy(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodingError> {
    // Java producers wrap raw snappy blocks in the xerial framing
    const XERIAL_MAGIC: &[u8] = &[0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0];
    const XERIAL_HEADER_LEN: usize = 16;

    let broken = |reason: String| DecodingError::Decompression {
        codec: CompressionCodec::Snappy,
        reason,
    };

    if !data.starts_with(XERIAL_MAGIC) {
        return decompress_snappy_block(data, limit);
    }
    if data.len() < XERIAL_HEADER_LEN {
        return Err(broken("truncated xerial header".to_string()));
    }

    let mut rest = &data[XERIAL_HEADER_LEN..];
    let mut out = Vec::new();
    while !rest.is_empty() {
        let Some((len, tail)) = rest.split_first_chunk::<4>() else {
            return Err(broken("truncated xerial chunk length".to_string()));
        };
        let len = u32::from_be_bytes(*len) as usize;
        if len > tail.len() {
            return Err(broken(format!(
                "xerial chunk of {len} bytes, {} remaining",
                tail.len()
            )));
        }
        let chunk = decompress_snappy_block(&tail[..len], limit - out.len())?;
        out.extend_from_slice(&chunk);
        rest = &tail[len..];
    }
    Ok(out)
}

#[cfg(feature = "compression-snappy")]
fn decompress_snappy_block(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodingError> {
    let broken = |e: snap::Error| DecodingError::Decompression {
        codec: CompressionCodec::Snappy,
        reason: e.to_string(),
    };

    // the uncompressed length is declared up front, check it before allocating
    let declared = snap::raw::decompress_len(data).map_err(broken)?;
    check_limit(declared, limit)?;
    snap::raw::Decoder::new().decompress_vec(data).map_err(broken)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const CODECS: [CompressionCodec; 5] = [
        CompressionCodec::None,
        CompressionCodec::Gzip,
        CompressionCodec::Snappy,
        CompressionCodec::Lz4,
        CompressionCodec::Zstd,
    ];

    #[test]
    fn codec_ids() {
        for (id, codec) in CODECS.iter().enumerate() {
            assert_eq!(codec.id(), id as i8);
            assert_eq!(CompressionCodec::from_attributes(id as i16).unwrap(), *codec);
        }
        // flag bits above the codec are ignored
        assert_eq!(
            CompressionCodec::from_attributes(0x38 | 2).unwrap(),
            CompressionCodec::Snappy
        );
        assert_matches!(
            CompressionCodec::from_attributes(5),
            Err(DecodingError::UnknownCodec(5))
        );
        assert_eq!(CompressionCodec::default(), CompressionCodec::None);
        assert_matches!(
            CompressionCodec::from_attributes(7),
            Err(DecodingError::UnknownCodec(7))
        );
    }

    #[test]
    fn every_codec_roundtrips() {
        let payload = b"kafka kafka kafka kafka kafka kafka kafka".repeat(20);
        for codec in CODECS {
            for data in [&b""[..], &payload[..]] {
                let compressed = compress(codec, None, data).unwrap();
                assert_eq!(decompress(codec, &compressed).unwrap(), data, "{codec:?}");
            }
        }
    }

    #[test]
    fn compression_levels_are_accepted() {
        let payload = vec![7u8; 4096];
        for level in [Some(1), Some(9), Some(42)] {
            let gz = compress(CompressionCodec::Gzip, level, &payload).unwrap();
            assert_eq!(decompress(CompressionCodec::Gzip, &gz).unwrap(), payload);
            let zs = compress(CompressionCodec::Zstd, level.map(|l| l.min(19)), &payload).unwrap();
            assert_eq!(decompress(CompressionCodec::Zstd, &zs).unwrap(), payload);
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let garbage = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11];
        for codec in [
            CompressionCodec::Gzip,
            CompressionCodec::Lz4,
            CompressionCodec::Zstd,
        ] {
            let err = decompress(codec, &garbage).unwrap_err();
            assert_matches!(err, DecodingError::Decompression { .. }, "{codec:?}");
        }
    }

    #[test]
    fn output_is_bounded() {
        let payload = vec![0u8; 10_000];
        for codec in CODECS {
            let compressed = compress(codec, None, &payload).unwrap();
            let err = decompress_bounded(codec, &compressed, 1_000).unwrap_err();
            assert_matches!(err, DecodingError::ResponseTooLarge { max: 1_000, .. }, "{codec:?}");
        }
    }

    #[test]
    fn xerial_framed_snappy() {
        let first = b"hello ".repeat(10);
        let second = b"world".repeat(10);

        let mut framed = vec![0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0, 0, 0, 0, 1, 0, 0, 0, 1];
        for chunk in [&first, &second] {
            let block = snap::raw::Encoder::new().compress_vec(chunk).unwrap();
            framed.extend_from_slice(&(block.len() as u32).to_be_bytes());
            framed.extend_from_slice(&block);
        }

        let out = decompress(CompressionCodec::Snappy, &framed).unwrap();
        assert_eq!(out, [first, second].concat());
    }
}
