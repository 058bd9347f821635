pub mod produce;

use crate::config::Config;
use crate::error::{DecodingError, EncodingError};

use super::decoder::PacketDecoder;
use super::encoder::{PacketEncoder, PushField};
use super::{Decode, Encode};

use bytes::Bytes;

// Produce responses up to v8 use the "v0" header format: 4 bytes holding the correlation_id.
// https://kafka.apache.org/protocol.html#protocol_messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

/// Frames `body` as a complete response, prepending the message size.
pub fn encode_response<T: Encode + ?Sized>(
    header: ResponseHeader,
    body: &T,
    config: &Config,
) -> Result<Bytes, EncodingError> {
    let mut pe = PacketEncoder::new(config);
    pe.push(PushField::Length)?;
    pe.put_i32(header.correlation_id)?;
    body.encode(&mut pe)?;
    pe.pop()?;
    pe.finish()
}

/// Parses a size-prefixed response frame. The size is checked against the maximum response
/// size before anything else is read.
pub fn decode_response<T: Decode>(
    buf: &[u8],
    version: i16,
    config: &Config,
) -> Result<(ResponseHeader, T), DecodingError> {
    let mut pd = PacketDecoder::new(buf, config);
    pd.push(PushField::Length)?;
    let header = ResponseHeader {
        correlation_id: pd.get_i32()?,
    };
    let body = T::decode(&mut pd, version)?;
    pd.pop()?;
    pd.finish()?;
    Ok((header, body))
}
