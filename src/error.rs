//! Errors raised while encoding or decoding wire frames.

use thiserror::Error;

use crate::protocol::compression::CompressionCodec;

/// Failure while turning a structure into wire bytes.
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("{field} length {len} does not fit its length prefix")]
    ValueTooLarge { field: &'static str, len: usize },

    #[error("compression codec {0:?} is not available")]
    UnsupportedCodec(CompressionCodec),

    #[error("{codec:?} compression failed: {reason}")]
    Compression {
        codec: CompressionCodec,
        reason: String,
    },

    #[error("encoded request would be {size} bytes, maximum is {max}")]
    RequestTooLarge { size: usize, max: usize },

    #[error("unsupported version {version} for {what}")]
    UnsupportedVersion { what: &'static str, version: i16 },

    #[error("topic {topic} partition {partition}: legacy message sets and record batches cannot be mixed")]
    MixedRecordFormats { topic: String, partition: i32 },

    #[error("record batch cannot be merged: {0}")]
    IncompatibleBatch(&'static str),

    #[error("invalid magic byte {0}")]
    InvalidMagic(i8),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Failure while parsing wire bytes into a structure.
#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("insufficient data: needed {needed} bytes, {remaining} remaining")]
    InsufficientData { needed: usize, remaining: usize },

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("declared length {size} exceeds maximum response size {max}")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("unknown magic byte {0}")]
    UnknownMagic(i8),

    #[error("magic byte {found} does not match request version {version}")]
    UnexpectedMagic { found: i8, version: i16 },

    #[error("unknown compression codec {0}")]
    UnknownCodec(i8),

    #[error("{codec:?} decompression failed: {reason}")]
    Decompression {
        codec: CompressionCodec,
        reason: String,
    },

    #[error("varint exceeds {0} bytes")]
    VarintOverflow(usize),

    #[error("length mismatch: declared {declared} bytes, consumed {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("record batch declares {declared} records but holds {actual}")]
    RecordCountMismatch { declared: i32, actual: usize },

    #[error("{0} trailing bytes after decoding")]
    TrailingBytes(usize),

    #[error("string is not valid UTF-8")]
    InvalidString(#[from] std::str::Utf8Error),

    #[error("compressed message sets nested deeper than {0}")]
    NestingTooDeep(usize),

    #[error("unsupported version {version} for {what}")]
    UnsupportedVersion { what: &'static str, version: i16 },

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
