pub mod produce;

use bytes::Bytes;

use crate::config::Config;
use crate::error::{DecodingError, EncodingError};

use super::decoder::PacketDecoder;
use super::encoder::{PacketEncoder, PushField};
use super::{ApiKey, Decode, Encode};

/// Request Header v1
// https://kafka.apache.org/protocol.html#protocol_messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl Encode for RequestHeader {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        pe.put_i16(self.api_key.into())?;
        pe.put_i16(self.api_version)?;
        pe.put_i32(self.correlation_id)?;
        pe.put_nullable_string(self.client_id.as_deref())
    }
}

impl Decode for RequestHeader {
    fn decode(pd: &mut PacketDecoder<'_>, _version: i16) -> Result<Self, DecodingError> {
        let api_key = pd.get_i16()?;
        let api_key = ApiKey::try_from(api_key).map_err(|_| DecodingError::UnsupportedVersion {
            what: "api key",
            version: api_key,
        })?;
        Ok(Self {
            api_key,
            api_version: pd.get_i16()?,
            correlation_id: pd.get_i32()?,
            client_id: pd.get_nullable_string()?.map(str::to_owned),
        })
    }
}

/// Frames `body` as a complete request: the message size followed by the header and body.
// https://kafka.apache.org/protocol.html#protocol_common
pub fn encode_request<T: Encode + ?Sized>(
    header: &RequestHeader,
    body: &T,
    config: &Config,
) -> Result<Bytes, EncodingError> {
    let mut pe = PacketEncoder::new(config);
    pe.push(PushField::Length)?;
    header.encode(&mut pe)?;
    body.encode(&mut pe)?;
    pe.pop()?;
    pe.finish()
}

/// Parses a size-prefixed request frame, decoding the body at the version named in its header.
pub fn decode_request<T: Decode>(
    buf: &[u8],
    config: &Config,
) -> Result<(RequestHeader, T), DecodingError> {
    let mut pd = PacketDecoder::new(buf, config);
    pd.push(PushField::Length)?;
    let header = RequestHeader::decode(&mut pd, 0)?;
    let body = T::decode(&mut pd, header.api_version)?;
    pd.pop()?;
    pd.finish()?;
    Ok((header, body))
}
