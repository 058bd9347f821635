pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod message;
pub mod record_batch;
pub mod records;
pub mod request;
pub mod response;
pub mod varint;

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::Config;
use crate::error::{DecodingError, EncodingError};

use decoder::PacketDecoder;
use encoder::PacketEncoder;

/// A structure that can write itself to the wire.
pub trait Encode {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError>;
}

/// A structure that can be parsed from the wire. `version` is the API version of the
/// enclosing request or response.
pub trait Decode: Sized {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError>;
}

/// Encodes `value` into a fresh buffer.
pub fn encode<T: Encode + ?Sized>(value: &T, config: &Config) -> Result<Bytes, EncodingError> {
    let mut pe = PacketEncoder::new(config);
    value.encode(&mut pe)?;
    pe.finish()
}

/// Decodes a `T` that must span the whole of `buf`.
pub fn decode<T: Decode>(buf: &[u8], version: i16, config: &Config) -> Result<T, DecodingError> {
    if buf.len() > config.max_response_size {
        return Err(DecodingError::ResponseTooLarge {
            size: buf.len(),
            max: config.max_response_size,
        });
    }
    let mut pd = PacketDecoder::new(buf, config);
    let value = T::decode(&mut pd, version)?;
    pd.finish()?;
    Ok(value)
}

/// https://kafka.apache.org/protocol.html#protocol_api_keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i16)]
pub enum ApiKey {
    Produce = 0,
}

/// Error codes a broker reports for a produced partition. Responses keep the raw `i16`, so
/// codes missing here still decode.
// https://kafka.apache.org/protocol.html#protocol_error_codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i16)]
pub enum ErrorCode {
    UnknownServerError = -1,
    None = 0,
    OffsetOutOfRange = 1,
    CorruptMessage = 2,
    UnknownTopicOrPartition = 3,
    InvalidMessageSize = 4,
    LeaderNotAvailable = 5,
    NotLeaderOrFollower = 6,
    RequestTimedOut = 7,
    MessageTooLarge = 10,
    NetworkException = 13,
    RecordListTooLarge = 18,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    InvalidRequiredAcks = 21,
    TopicAuthorizationFailed = 29,
    UnsupportedVersion = 35,
    UnsupportedForMessageFormat = 43,
    OutOfOrderSequenceNumber = 45,
    DuplicateSequenceNumber = 46,
    InvalidProducerEpoch = 47,
    InvalidTxnState = 48,
    TransactionalIdAuthorizationFailed = 53,
    InvalidRecord = 87,
}

impl ErrorCode {
    /// Whether the produce can be retried as is.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCode::CorruptMessage
                | ErrorCode::UnknownTopicOrPartition
                | ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderOrFollower
                | ErrorCode::RequestTimedOut
                | ErrorCode::NetworkException
                | ErrorCode::NotEnoughReplicas
                | ErrorCode::NotEnoughReplicasAfterAppend
        )
    }
}
