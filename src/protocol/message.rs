//! Legacy message format (magic 0 and 1) and the unframed message set built from it.
//!
//! Message (v0/v1):
//!   crc: uint32 (CRC-32 of everything from magic to the end of value)
//!   magic: int8
//!   attributes: int8 (bits 0~2 compression codec, bit 3 timestamp type, v1 only)
//!   timestamp: int64 (v1 only)
//!   key: bytes
//!   value: bytes
//!
//! MessageSet: repeated `offset: int64, message_size: int32, message`.

use bytes::Bytes;

use crate::error::{DecodingError, EncodingError};

use super::compression::{self, CompressionCodec, COMPRESSION_CODEC_MASK};
use super::decoder::PacketDecoder;
use super::encoder::{PacketEncoder, PushField};
use super::{Decode, Encode};

const TIMESTAMP_TYPE_MASK: i8 = 0x08;

/// Timestamp written when a v1 message carries none.
const NO_TIMESTAMP: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub codec: CompressionCodec,
    /// Only consulted when encoding; not part of the wire format.
    pub compression_level: Option<i32>,
    /// Timestamp was assigned by the broker rather than the producer (v1 only).
    pub log_append_time: bool,
    /// Magic byte, 0 or 1.
    pub version: i8,
    /// Milliseconds since the epoch (v1 only).
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    /// Payload of an uncompressed message. For a compressed wrapper this holds the inner
    /// set's bytes only when `set` is absent.
    pub value: Option<Bytes>,
    /// Messages carried by a compressed wrapper.
    pub set: Option<MessageSet>,
}

impl Message {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            key,
            value,
            ..Default::default()
        }
    }

    /// A compressed wrapper around `set`.
    pub fn compressed(codec: CompressionCodec, version: i8, set: MessageSet) -> Self {
        Self {
            codec,
            version,
            set: Some(set),
            ..Default::default()
        }
    }

    fn attributes(&self) -> i8 {
        let mut attributes = self.codec.id() & COMPRESSION_CODEC_MASK as i8;
        if self.log_append_time {
            attributes |= TIMESTAMP_TYPE_MASK;
        }
        attributes
    }

    /// Bytes written as the value field.
    fn payload(&self, pe: &PacketEncoder<'_>) -> Result<Option<Bytes>, EncodingError> {
        if !self.codec.is_compressed() {
            return Ok(self.value.clone());
        }
        let inner = match (&self.set, &self.value) {
            (Some(set), _) => {
                let mut inner = PacketEncoder::new(pe.config());
                set.encode(&mut inner)?;
                inner.finish()?
            }
            (None, Some(value)) => value.clone(),
            (None, None) => return Ok(None),
        };
        let compressed = compression::compress(self.codec, self.compression_level, &inner)?;
        Ok(Some(Bytes::from(compressed)))
    }
}

impl Encode for Message {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        if !(0..=1).contains(&self.version) {
            return Err(EncodingError::InvalidMagic(self.version));
        }
        let payload = self.payload(pe)?;

        pe.push(PushField::Crc32)?;
        pe.put_i8(self.version)?;
        pe.put_i8(self.attributes())?;
        if self.version >= 1 {
            pe.put_i64(self.timestamp.unwrap_or(NO_TIMESTAMP))?;
        }
        pe.put_bytes(self.key.as_deref())?;
        pe.put_bytes(payload.as_deref())?;
        pe.pop()
    }
}

impl Decode for Message {
    /// Consumes the rest of the enclosing frame. The checksum is verified over those bytes
    /// before any field is interpreted.
    fn decode(pd: &mut PacketDecoder<'_>, _version: i16) -> Result<Self, DecodingError> {
        pd.push(PushField::Crc32)?;
        let body = pd.get_raw_bytes(pd.remaining())?;
        pd.pop()?;

        let mut body = pd.view(body);
        let version = body.get_i8()?;
        if !(0..=1).contains(&version) {
            return Err(DecodingError::UnknownMagic(version));
        }
        let attributes = body.get_i8()?;
        let codec = CompressionCodec::from_attributes(attributes as i16)?;
        let log_append_time = attributes & TIMESTAMP_TYPE_MASK != 0;
        let timestamp = match version {
            0 => None,
            _ => Some(body.get_i64()?).filter(|&ts| ts != NO_TIMESTAMP),
        };
        let key = body.get_bytes()?.map(Bytes::copy_from_slice);
        let raw_value = body.get_bytes()?;

        let (value, set) = match (codec, raw_value) {
            (_, None) => (None, None),
            (CompressionCodec::None, Some(value)) => (Some(Bytes::copy_from_slice(value)), None),
            (codec, Some(compressed)) => {
                body.check_nesting()?;
                let inner = compression::decompress_bounded(
                    codec,
                    compressed,
                    body.config().max_response_size,
                )?;
                let mut inner_pd = body.nested(&inner)?;
                let set = MessageSet::decode(&mut inner_pd, 0)?;
                inner_pd.finish()?;
                (None, Some(set))
            }
        };
        body.finish()?;

        Ok(Self {
            codec,
            compression_level: None,
            log_append_time,
            version,
            timestamp,
            key,
            value,
            set,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBlock {
    pub offset: i64,
    pub msg: Message,
}

impl MessageBlock {
    /// The messages this block stands for with their absolute offsets: the block itself when
    /// uncompressed, otherwise the messages of its inner set.
    ///
    /// Inner offsets are absolute under magic 0. Under magic 1 they are relative, numbered from
    /// 0, and the wrapper carries the offset of the last inner message.
    pub fn messages(&self) -> Vec<(i64, &Message)> {
        let Some(set) = &self.msg.set else {
            return vec![(self.offset, &self.msg)];
        };
        let base = match (self.msg.version, set.blocks.last()) {
            (1, Some(last)) => self.offset - last.offset,
            _ => 0,
        };
        set.blocks
            .iter()
            .map(|block| (base + block.offset, &block.msg))
            .collect()
    }
}

impl Encode for MessageBlock {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        pe.put_i64(self.offset)?;
        pe.push(PushField::Length)?;
        self.msg.encode(pe)?;
        pe.pop()
    }
}

impl Decode for MessageBlock {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        let offset = pd.get_i64()?;
        pd.push(PushField::Length)?;
        let msg = Message::decode(pd, version)?;
        pd.pop()?;
        Ok(Self { offset, msg })
    }
}

/// Ordered message blocks with no framing of their own; the enclosing structure supplies the
/// overall length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSet {
    pub blocks: Vec<MessageBlock>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `msg` at offset 0; the broker assigns real offsets on append.
    pub fn add_message(&mut self, msg: Message) {
        self.blocks.push(MessageBlock { offset: 0, msg });
    }

    /// Every message in the set with its absolute offset, looking through compressed wrappers.
    pub fn messages(&self) -> Vec<(i64, &Message)> {
        self.blocks.iter().flat_map(MessageBlock::messages).collect()
    }
}

impl Encode for MessageSet {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        for block in &self.blocks {
            block.encode(pe)?;
        }
        Ok(())
    }
}

impl Decode for MessageSet {
    /// Consumes every remaining byte of the enclosing frame.
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        let mut blocks = Vec::new();
        while pd.remaining() > 0 {
            blocks.push(MessageBlock::decode(pd, version)?);
        }
        Ok(Self { blocks })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config::Config;
    use crate::protocol::{decode, encode};

    const EMPTY_MESSAGE: [u8; 14] = [
        0xA7, 0xEC, 0x68, 0x03, // CRC
        0x00, // magic
        0x00, // attributes
        0xFF, 0xFF, 0xFF, 0xFF, // key
        0xFF, 0xFF, 0xFF, 0xFF, // value
    ];

    const ONE_MESSAGE: [u8; 16] = [
        0x23, 0x96, 0x4A, 0xF7, // CRC
        0x00, // magic
        0x00, // attributes
        0xFF, 0xFF, 0xFF, 0xFF, // key
        0x00, 0x00, 0x00, 0x02, 0x00, 0xEE, // value
    ];

    #[test]
    fn encodes_reference_message() {
        let config = Config::default();
        let msg = Message::new(None, Some(Bytes::from_static(&[0x00, 0xEE])));
        let out = encode(&msg, &config).unwrap();
        assert_eq!(out.as_ref(), ONE_MESSAGE);

        let decoded: Message = decode(&ONE_MESSAGE, 0, &config).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_message() {
        let config = Config::default();
        let msg = Message::default();
        let out = encode(&msg, &config).unwrap();
        assert_eq!(out.as_ref(), EMPTY_MESSAGE);
        assert_eq!(decode::<Message>(&out, 0, &config).unwrap(), msg);
    }

    #[test]
    fn v1_carries_timestamp() {
        let config = Config::default();
        let msg = Message {
            version: 1,
            timestamp: Some(1_479_847_795_000),
            log_append_time: true,
            key: Some(Bytes::from_static(b"k")),
            value: Some(Bytes::new()),
            ..Default::default()
        };
        let out = encode(&msg, &config).unwrap();
        assert_eq!(out[4], 1);
        assert_eq!(out[5], 0x08);
        assert_eq!(&out[6..14], 1_479_847_795_000i64.to_be_bytes());
        assert_eq!(decode::<Message>(&out, 0, &config).unwrap(), msg);

        let untimed = Message {
            version: 1,
            ..Default::default()
        };
        let out = encode(&untimed, &config).unwrap();
        assert_eq!(&out[6..14], [0xFF; 8]);
        assert_eq!(decode::<Message>(&out, 0, &config).unwrap(), untimed);
    }

    #[test]
    fn every_protected_byte_is_checked() {
        let config = Config::default();
        for i in 4..ONE_MESSAGE.len() {
            let mut corrupt = ONE_MESSAGE;
            corrupt[i] ^= 0x40;
            assert_matches!(
                decode::<Message>(&corrupt, 0, &config),
                Err(DecodingError::ChecksumMismatch { .. }),
                "byte {i}"
            );
        }
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let config = Config::default();
        let msg = Message {
            version: 2,
            ..Default::default()
        };
        assert_matches!(encode(&msg, &config), Err(EncodingError::InvalidMagic(2)));

        let mut raw = EMPTY_MESSAGE;
        raw[4] = 2;
        let crc = crc32fast::hash(&raw[4..]);
        raw[..4].copy_from_slice(&crc.to_be_bytes());
        assert_matches!(
            decode::<Message>(&raw, 0, &config),
            Err(DecodingError::UnknownMagic(2))
        );
    }

    #[test]
    fn message_set_layout() {
        let config = Config::default();
        let mut set = MessageSet::new();
        set.add_message(Message::new(None, Some(Bytes::from_static(&[0x00, 0xEE]))));

        let out = encode(&set, &config).unwrap();
        assert_eq!(out.len(), 0x1C);
        assert_eq!(&out[..8], [0; 8]);
        assert_eq!(&out[8..12], [0, 0, 0, 0x10]);
        assert_eq!(&out[12..], ONE_MESSAGE);
        assert_eq!(decode::<MessageSet>(&out, 0, &config).unwrap(), set);
    }

    fn inner_set(offsets: &[i64]) -> MessageSet {
        MessageSet {
            blocks: offsets
                .iter()
                .map(|&offset| MessageBlock {
                    offset,
                    msg: Message::new(None, Some(Bytes::from(format!("msg-{offset}")))),
                })
                .collect(),
        }
    }

    #[test]
    fn compressed_sets_roundtrip() {
        let config = Config::default();
        for codec in [
            CompressionCodec::Gzip,
            CompressionCodec::Snappy,
            CompressionCodec::Lz4,
            CompressionCodec::Zstd,
        ] {
            let set = MessageSet {
                blocks: vec![MessageBlock {
                    offset: 2,
                    msg: Message::compressed(codec, 1, inner_set(&[0, 1, 2])),
                }],
            };
            let out = encode(&set, &config).unwrap();
            let decoded: MessageSet = decode(&out, 0, &config).unwrap();
            assert_eq!(decoded, set, "{codec:?}");
        }
    }

    #[test]
    fn compressed_value_without_set_is_compressed_as_given() {
        let config = Config::default();
        let inner = encode(&inner_set(&[0]), &config).unwrap();
        let msg = Message {
            codec: CompressionCodec::Gzip,
            value: Some(inner),
            ..Default::default()
        };
        let out = encode(&msg, &config).unwrap();
        let decoded: Message = decode(&out, 0, &config).unwrap();
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.set, Some(inner_set(&[0])));
    }

    #[test]
    fn inner_offsets_follow_wrapper_magic() {
        // magic 1: relative inner offsets, wrapper holds the last absolute offset
        let block = MessageBlock {
            offset: 42,
            msg: Message::compressed(CompressionCodec::Gzip, 1, inner_set(&[0, 1, 2])),
        };
        let offsets: Vec<i64> = block.messages().iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, [40, 41, 42]);

        // magic 0: inner offsets are already absolute
        let block = MessageBlock {
            offset: 12,
            msg: Message::compressed(CompressionCodec::Gzip, 0, inner_set(&[10, 11, 12])),
        };
        let offsets: Vec<i64> = block.messages().iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, [10, 11, 12]);
    }

    #[test]
    fn nested_compression_is_bounded() {
        let config = Config::default();
        let innermost = MessageSet {
            blocks: vec![MessageBlock {
                offset: 0,
                msg: Message::compressed(CompressionCodec::Gzip, 1, inner_set(&[0])),
            }],
        };
        let outer = MessageSet {
            blocks: vec![MessageBlock {
                offset: 0,
                msg: Message::compressed(CompressionCodec::Gzip, 1, innermost),
            }],
        };
        let out = encode(&outer, &config).unwrap();
        assert_matches!(
            decode::<MessageSet>(&out, 0, &config),
            Err(DecodingError::NestingTooDeep(1))
        );
    }

    #[test]
    fn nesting_is_checked_before_decompressing() {
        let config = Config::default();
        // an inner wrapper claiming gzip over bytes that do not inflate
        let mut inner_set = MessageSet::new();
        inner_set.add_message(Message::new(None, Some(Bytes::from_static(b"not gzip"))));
        let mut inner = encode(&inner_set, &config).unwrap().to_vec();
        // offset, size and CRC come before the attributes byte
        inner[17] = CompressionCodec::Gzip.id() as u8;
        let crc = crc32fast::hash(&inner[16..]);
        inner[12..16].copy_from_slice(&crc.to_be_bytes());

        let mut wrapper = Message::new(None, Some(Bytes::from(inner)));
        wrapper.codec = CompressionCodec::Gzip;
        let outer = MessageSet {
            blocks: vec![MessageBlock { offset: 0, msg: wrapper }],
        };
        let out = encode(&outer, &config).unwrap();
        assert_matches!(
            decode::<MessageSet>(&out, 0, &config),
            Err(DecodingError::NestingTooDeep(1))
        );
    }

    #[test]
    fn message_size_must_match() {
        let config = Config::default();
        let mut set = MessageSet::new();
        set.add_message(Message::new(None, Some(Bytes::from_static(&[0x00, 0xEE]))));
        let out = encode(&set, &config).unwrap().to_vec();

        for size in [0x0F, 0x11] {
            let mut corrupt = out.clone();
            corrupt[11] = size;
            assert!(decode::<MessageSet>(&corrupt, 0, &config).is_err());
        }
    }
}
