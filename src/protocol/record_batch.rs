use bytes::Bytes;

use crate::error::{DecodingError, EncodingError};

use super::compression::{self, CompressionCodec, COMPRESSION_CODEC_MASK};
use super::decoder::PacketDecoder;
use super::encoder::{PacketEncoder, PushField};
use super::{Decode, Encode};

/// Magic byte of the record batch format.
pub const RECORD_BATCH_MAGIC: i8 = 2;

const TIMESTAMP_TYPE_MASK: i16 = 0x08;
const TRANSACTIONAL_MASK: i16 = 0x10;
const CONTROL_MASK: i16 = 0x20;

/// A record batch is the format that Kafka uses to store multiple records.
// https://kafka.apache.org/documentation/#recordbatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    /// Base Offset is a 8-byte big-endian integer indicating the offset of the first record in this batch.
    pub base_offset: i64,
    /// Partition Leader Epoch is a 4-byte big-endian integer indicating the epoch of the leader for this partition.
    pub partition_leader_epoch: i32,
    /// Attributes bit 0~2.
    pub codec: CompressionCodec,
    /// Only consulted when encoding; not part of the wire format.
    pub compression_level: Option<i32>,
    /// Attributes bit 3: timestamps were assigned by the broker.
    pub log_append_time: bool,
    /// Attributes bit 4.
    pub transactional: bool,
    /// Attributes bit 5: the batch holds control records (transaction markers).
    pub control: bool,
    /// Last Offset Delta is a 4-byte big-endian integer indicating the difference between the last offset of this record batch and the base offset.
    pub last_offset_delta: i32,
    /// Base Timestamp is a 8-byte big-endian integer indicating the timestamp of the first record in this batch.
    /// Record timestamps are stored as deltas from it.
    pub first_timestamp: i64,
    /// Max Timestamp is a 8-byte big-endian integer indicating the maximum timestamp of the records in this batch.
    pub max_timestamp: i64,
    /// Producer ID, -1 when the producer is not idempotent.
    pub producer_id: i64,
    pub producer_epoch: i16,
    /// Base Sequence is a 4-byte big-endian integer indicating the sequence number of the first record in a batch.
    /// It is used to ensure the correct ordering and deduplication of messages produced by a Kafka producer.
    pub base_sequence: i32,
    pub records: Vec<Record>,
}

impl RecordBatch {
    fn attributes(&self) -> i16 {
        let mut attributes = self.codec.id() as i16 & COMPRESSION_CODEC_MASK;
        if self.log_append_time {
            attributes |= TIMESTAMP_TYPE_MASK;
        }
        if self.transactional {
            attributes |= TRANSACTIONAL_MASK;
        }
        if self.control {
            attributes |= CONTROL_MASK;
        }
        attributes
    }

    /// Appends `record`, widening the last offset delta and max timestamp to cover it.
    pub fn add_record(&mut self, record: Record) {
        self.last_offset_delta = self.last_offset_delta.max(record.offset_delta);
        self.max_timestamp = self.max_timestamp.max(self.timestamp_of(&record));
        self.records.push(record);
    }

    /// Moves the records of `other` behind the records of this batch, rebasing their offset
    /// and timestamp deltas. Both batches must agree on compression and producer identity.
    pub fn merge(&mut self, other: RecordBatch) -> Result<(), EncodingError> {
        if self.codec != other.codec {
            return Err(EncodingError::IncompatibleBatch("compression codecs differ"));
        }
        if (self.producer_id, self.producer_epoch) != (other.producer_id, other.producer_epoch) {
            return Err(EncodingError::IncompatibleBatch("producers differ"));
        }
        if self.transactional != other.transactional || self.control != other.control {
            return Err(EncodingError::IncompatibleBatch("batch flags differ"));
        }
        if self.records.is_empty() {
            *self = other;
            return Ok(());
        }

        let overflow = || EncodingError::IncompatibleBatch("deltas overflow when merged");
        let offset_shift = self.last_offset_delta.checked_add(1).ok_or_else(overflow)?;
        let timestamp_shift = other
            .first_timestamp
            .checked_sub(self.first_timestamp)
            .ok_or_else(overflow)?;
        let last_offset_delta = offset_shift
            .checked_add(other.last_offset_delta)
            .ok_or_else(overflow)?;

        // a failed merge leaves self unchanged
        let mut rebased = Vec::with_capacity(other.records.len());
        for mut record in other.records {
            record.offset_delta = record
                .offset_delta
                .checked_add(offset_shift)
                .ok_or_else(overflow)?;
            record.timestamp_delta = record
                .timestamp_delta
                .checked_add(timestamp_shift)
                .ok_or_else(overflow)?;
            rebased.push(record);
        }

        self.records.extend(rebased);
        self.last_offset_delta = last_offset_delta;
        self.max_timestamp = self.max_timestamp.max(other.max_timestamp);
        Ok(())
    }

    /// Absolute offset of `record`. Wraps on overflow.
    pub fn offset_of(&self, record: &Record) -> i64 {
        self.base_offset.wrapping_add(record.offset_delta as i64)
    }

    /// Absolute timestamp of `record`. Wraps on overflow.
    pub fn timestamp_of(&self, record: &Record) -> i64 {
        self.first_timestamp.wrapping_add(record.timestamp_delta)
    }

    /// Records with their absolute offset and timestamp.
    pub fn absolute_records(&self) -> impl Iterator<Item = (i64, i64, &Record)> + '_ {
        self.records
            .iter()
            .map(|r| (self.offset_of(r), self.timestamp_of(r), r))
    }

    fn encode_records(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        for record in &self.records {
            record.encode(pe)?;
        }
        Ok(())
    }
}

impl Encode for RecordBatch {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        pe.put_i64(self.base_offset)?;
        pe.push(PushField::Length)?;
        pe.put_i32(self.partition_leader_epoch)?;
        pe.put_i8(RECORD_BATCH_MAGIC)?;
        pe.push(PushField::Crc32c)?;
        pe.put_i16(self.attributes())?;
        pe.put_i32(self.last_offset_delta)?;
        pe.put_i64(self.first_timestamp)?;
        pe.put_i64(self.max_timestamp)?;
        pe.put_i64(self.producer_id)?;
        pe.put_i16(self.producer_epoch)?;
        pe.put_i32(self.base_sequence)?;
        pe.put_array_length(self.records.len())?;

        if self.codec.is_compressed() {
            // all records are compressed together as one unit
            let mut raw = PacketEncoder::new(pe.config());
            self.encode_records(&mut raw)?;
            let raw = raw.finish()?;
            let compressed = compression::compress(self.codec, self.compression_level, &raw)?;
            pe.put_raw_bytes(&compressed)?;
        } else {
            self.encode_records(pe)?;
        }

        pe.pop()?;
        pe.pop()
    }
}

impl Decode for RecordBatch {
    /// The CRC-32C is verified over the wire bytes before anything after it is interpreted or
    /// decompressed.
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        let base_offset = pd.get_i64()?;
        pd.push(PushField::Length)?;
        let partition_leader_epoch = pd.get_i32()?;
        let magic = pd.get_i8()?;
        if magic != RECORD_BATCH_MAGIC {
            return Err(DecodingError::UnknownMagic(magic));
        }
        pd.push(PushField::Crc32c)?;
        let body = pd.get_raw_bytes(pd.remaining())?;
        pd.pop()?;
        pd.pop()?;

        let mut body = pd.view(body);
        let attributes = body.get_i16()?;
        let codec = CompressionCodec::from_attributes(attributes)?;
        let last_offset_delta = body.get_i32()?;
        let first_timestamp = body.get_i64()?;
        let max_timestamp = body.get_i64()?;
        let producer_id = body.get_i64()?;
        let producer_epoch = body.get_i16()?;
        let base_sequence = body.get_i32()?;
        let declared = body.get_i32()?;
        if declared < 0 {
            return Err(DecodingError::InvalidLength(declared as i64));
        }
        let payload = body.get_raw_bytes(body.remaining())?;
        body.finish()?;

        let records = if codec.is_compressed() {
            let raw =
                compression::decompress_bounded(codec, payload, pd.config().max_response_size)?;
            decode_records(&mut pd.view(&raw), declared, version)?
        } else {
            decode_records(&mut pd.view(payload), declared, version)?
        };

        Ok(Self {
            base_offset,
            partition_leader_epoch,
            codec,
            compression_level: None,
            log_append_time: attributes & TIMESTAMP_TYPE_MASK != 0,
            transactional: attributes & TRANSACTIONAL_MASK != 0,
            control: attributes & CONTROL_MASK != 0,
            last_offset_delta,
            first_timestamp,
            max_timestamp,
            producer_id,
            producer_epoch,
            base_sequence,
            records,
        })
    }
}

/// Decodes every record in `pd` and checks the count against the batch header.
fn decode_records(
    pd: &mut PacketDecoder<'_>,
    declared: i32,
    version: i16,
) -> Result<Vec<Record>, DecodingError> {
    // a record takes at least one byte, so the header count cannot reserve more than this
    let mut records = Vec::with_capacity((declared as usize).min(pd.remaining()));
    while pd.remaining() > 0 {
        records.push(Record::decode(pd, version)?);
    }
    if records.len() != declared as usize {
        return Err(DecodingError::RecordCountMismatch {
            declared,
            actual: records.len(),
        });
    }
    Ok(records)
}

/// A record is the format that Kafka uses to store a single record.
// https://kafka.apache.org/documentation/#record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Attributes is a 1-byte big-endian integer indicating the attributes of the record. Currently, this field is unused in the protocol.
    pub attributes: i8,
    /// Timestamp Delta is a signed variable size integer indicating the difference between the timestamp of the record and the base timestamp of the record batch.
    pub timestamp_delta: i64,
    /// Offset Delta is a signed variable size integer indicating the difference between the offset of the record and the base offset of the record batch.
    pub offset_delta: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Encode for Record {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        // Length is a signed variable size integer indicating the length of the record, the length is calculated from the attributes field to the end of the record.
        pe.push(PushField::VarintLength)?;
        pe.put_i8(self.attributes)?;
        pe.put_varlong(self.timestamp_delta)?;
        pe.put_varint(self.offset_delta)?;
        pe.put_varint_bytes(self.key.as_deref())?;
        pe.put_varint_bytes(self.value.as_deref())?;

        // Note: not a regular array, the count is a varint
        let count = i32::try_from(self.headers.len()).map_err(|_| EncodingError::ValueTooLarge {
            field: "record headers",
            len: self.headers.len(),
        })?;
        pe.put_varint(count)?;
        for header in &self.headers {
            header.encode(pe)?;
        }
        pe.pop()
    }
}

impl Decode for Record {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        pd.push(PushField::VarintLength)?;
        let attributes = pd.get_i8()?;
        let timestamp_delta = pd.get_varlong()?;
        let offset_delta = pd.get_varint()?;
        let key = pd.get_varint_bytes()?.map(Bytes::copy_from_slice);
        let value = pd.get_varint_bytes()?.map(Bytes::copy_from_slice);

        let count = pd.get_varint_array_length()?;
        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            headers.push(RecordHeader::decode(pd, version)?);
        }
        pd.pop()?;

        Ok(Self {
            attributes,
            timestamp_delta,
            offset_delta,
            key,
            value,
            headers,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Never null on the wire.
    pub key: Bytes,
    pub value: Option<Bytes>,
}

impl Encode for RecordHeader {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        pe.put_varint_bytes(Some(self.key.as_ref()))?;
        pe.put_varint_bytes(self.value.as_deref())
    }
}

impl Decode for RecordHeader {
    fn decode(pd: &mut PacketDecoder<'_>, _version: i16) -> Result<Self, DecodingError> {
        let key = pd
            .get_varint_bytes()?
            .ok_or(DecodingError::InvalidLength(-1))?;
        let value = pd.get_varint_bytes()?.map(Bytes::copy_from_slice);
        Ok(Self {
            key: Bytes::copy_from_slice(key),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config::Config;
    use crate::protocol::{decode, encode};

    // one record with a 4-byte key, a 3-byte value and one header
    const ONE_RECORD_BATCH: [u8; 82] = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // base offset
        0x00, 0x00, 0x00, 0x46, // batch length
        0x00, 0x00, 0x00, 0x00, // partition leader epoch
        0x02, // magic
        0xCA, 0x33, 0xBC, 0x05, // CRC
        0x00, 0x00, // attributes
        0x00, 0x00, 0x00, 0x01, // last offset delta
        0x00, 0x00, 0x01, 0x58, 0x8D, 0xCD, 0x59, 0x38, // first timestamp
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // max timestamp
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // producer id
        0x00, 0x00, // producer epoch
        0x00, 0x00, 0x00, 0x00, // base sequence
        0x00, 0x00, 0x00, 0x01, // record count
        // record
        0x28, // length
        0x00, // attributes
        0x0A, // timestamp delta
        0x00, // offset delta
        0x08, 0x01, 0x02, 0x03, 0x04, // key
        0x06, 0x05, 0x06, 0x07, // value
        0x02, // header count
        0x06, 0x08, 0x09, 0x0A, // header key
        0x04, 0x0B, 0x0C, // header value
    ];

    fn reference_batch() -> RecordBatch {
        RecordBatch {
            last_offset_delta: 1,
            first_timestamp: 1_479_847_795_000,
            max_timestamp: 0,
            records: vec![Record {
                timestamp_delta: 5,
                key: Some(Bytes::from_static(&[0x01, 0x02, 0x03, 0x04])),
                value: Some(Bytes::from_static(&[0x05, 0x06, 0x07])),
                headers: vec![RecordHeader {
                    key: Bytes::from_static(&[0x08, 0x09, 0x0A]),
                    value: Some(Bytes::from_static(&[0x0B, 0x0C])),
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn encodes_reference_batch() {
        let config = Config::default();
        let out = encode(&reference_batch(), &config).unwrap();
        assert_eq!(out.as_ref(), ONE_RECORD_BATCH);
    }

    #[test]
    fn decodes_reference_batch() {
        let config = Config::default();
        let batch: RecordBatch = decode(&ONE_RECORD_BATCH, 3, &config).unwrap();
        assert_eq!(batch, reference_batch());

        let (offset, timestamp, record) = batch.absolute_records().next().unwrap();
        assert_eq!(offset, batch.base_offset);
        assert_eq!(timestamp, 1_479_847_795_005);
        assert_eq!(record.headers[0].key.as_ref(), [0x08, 0x09, 0x0A]);
        assert_eq!(record.headers[0].value.as_deref(), Some(&[0x0B, 0x0C][..]));
    }

    #[test]
    fn every_byte_after_the_crc_is_protected() {
        let config = Config::default();
        for i in 21..ONE_RECORD_BATCH.len() {
            let mut corrupt = ONE_RECORD_BATCH;
            corrupt[i] ^= 0x01;
            assert_matches!(
                decode::<RecordBatch>(&corrupt, 3, &config),
                Err(DecodingError::ChecksumMismatch { .. }),
                "byte {i}"
            );
        }
    }

    #[test]
    fn batch_length_must_be_exact() {
        let config = Config::default();
        for len in [0x45, 0x47] {
            let mut corrupt = ONE_RECORD_BATCH;
            corrupt[11] = len;
            assert!(decode::<RecordBatch>(&corrupt, 3, &config).is_err());
        }
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let config = Config::default();
        let mut corrupt = ONE_RECORD_BATCH;
        corrupt[16] = 1;
        assert_matches!(
            decode::<RecordBatch>(&corrupt, 3, &config),
            Err(DecodingError::UnknownMagic(1))
        );
    }

    fn with_crc(mut raw: Vec<u8>) -> Vec<u8> {
        let crc = crc32c::crc32c(&raw[21..]);
        raw[17..21].copy_from_slice(&crc.to_be_bytes());
        raw
    }

    #[test]
    fn record_count_must_match() {
        let config = Config::default();
        let mut raw = ONE_RECORD_BATCH.to_vec();
        raw[60] = 2;
        let raw = with_crc(raw);
        assert_matches!(
            decode::<RecordBatch>(&raw, 3, &config),
            Err(DecodingError::RecordCountMismatch {
                declared: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn record_length_must_match() {
        let config = Config::default();
        let mut raw = ONE_RECORD_BATCH.to_vec();
        // record claims 19 bytes, leaving its last byte behind as a truncated second record
        raw[61] = 0x26;
        let raw = with_crc(raw);
        assert!(decode::<RecordBatch>(&raw, 3, &config).is_err());
    }

    #[test]
    fn null_header_key_is_rejected() {
        let config = Config::default();
        let mut raw = ONE_RECORD_BATCH.to_vec();
        // replace the header with a null key and a null value
        raw.truncate(75);
        raw.extend_from_slice(&[0x01, 0x01]);
        raw[61] = 0x1E; // record body shrinks from 20 to 15 bytes
        raw[11] = 0x41;
        let raw = with_crc(raw);
        assert_matches!(
            decode::<RecordBatch>(&raw, 3, &config),
            Err(DecodingError::InvalidLength(-1))
        );
    }

    #[test]
    fn empty_and_null_fields() {
        let config = Config::default();
        let batch = RecordBatch {
            producer_id: -1,
            producer_epoch: -1,
            base_sequence: -1,
            records: vec![
                Record::default(),
                Record {
                    offset_delta: 1,
                    timestamp_delta: -3,
                    key: Some(Bytes::new()),
                    value: Some(Bytes::new()),
                    headers: vec![RecordHeader {
                        key: Bytes::new(),
                        value: None,
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let out = encode(&batch, &config).unwrap();
        assert_eq!(decode::<RecordBatch>(&out, 3, &config).unwrap(), batch);
    }

    #[test]
    fn zero_records() {
        let config = Config::default();
        let batch = RecordBatch::default();
        let out = encode(&batch, &config).unwrap();
        assert_eq!(out.len(), 61);
        assert_eq!(decode::<RecordBatch>(&out, 3, &config).unwrap(), batch);
    }

    #[test]
    fn compressed_batches_roundtrip() {
        let config = Config::default();
        for codec in [
            CompressionCodec::Gzip,
            CompressionCodec::Snappy,
            CompressionCodec::Lz4,
            CompressionCodec::Zstd,
        ] {
            let mut batch = reference_batch();
            batch.codec = codec;
            batch.transactional = true;
            batch.add_record(Record {
                offset_delta: 1,
                value: Some(Bytes::from_static(b"second")),
                ..Default::default()
            });
            let out = encode(&batch, &config).unwrap();
            assert_eq!(out[22] & 0x07, codec.id() as u8);
            assert_eq!(out[22] & 0x10, 0x10);
            let decoded: RecordBatch = decode(&out, 3, &config).unwrap();
            assert_eq!(decoded, batch, "{codec:?}");
        }
    }

    #[test]
    fn add_record_widens_header() {
        let mut batch = RecordBatch {
            first_timestamp: 1_000,
            ..Default::default()
        };
        batch.add_record(Record {
            offset_delta: 0,
            timestamp_delta: 10,
            ..Default::default()
        });
        batch.add_record(Record {
            offset_delta: 1,
            timestamp_delta: 4,
            ..Default::default()
        });
        assert_eq!(batch.last_offset_delta, 1);
        assert_eq!(batch.max_timestamp, 1_010);
    }

    #[test]
    fn merge_rebases_deltas() {
        let mut first = RecordBatch {
            base_offset: 100,
            first_timestamp: 1_000,
            ..Default::default()
        };
        first.add_record(Record::default());
        first.add_record(Record {
            offset_delta: 1,
            timestamp_delta: 1,
            ..Default::default()
        });

        let mut second = RecordBatch {
            first_timestamp: 1_500,
            ..Default::default()
        };
        second.add_record(Record {
            timestamp_delta: 2,
            ..Default::default()
        });

        first.merge(second).unwrap();
        let absolute: Vec<(i64, i64)> = first.absolute_records().map(|(o, t, _)| (o, t)).collect();
        assert_eq!(absolute, [(100, 1_000), (101, 1_001), (102, 1_502)]);
        assert_eq!(first.last_offset_delta, 2);
        assert_eq!(first.max_timestamp, 1_502);
    }

    #[test]
    fn extreme_deltas_wrap_instead_of_panicking() {
        let config = Config::default();
        let batch = RecordBatch {
            base_offset: i64::MAX,
            first_timestamp: i64::MAX,
            records: vec![Record {
                offset_delta: 1,
                timestamp_delta: 5,
                ..Default::default()
            }],
            ..Default::default()
        };
        let out = encode(&batch, &config).unwrap();
        let decoded: RecordBatch = decode(&out, 3, &config).unwrap();

        let absolute: Vec<(i64, i64)> = decoded
            .absolute_records()
            .map(|(o, t, _)| (o, t))
            .collect();
        assert_eq!(absolute, [(i64::MIN, i64::MIN + 4)]);
    }

    #[test]
    fn merge_rejects_overflowing_deltas() {
        let mut first = RecordBatch {
            last_offset_delta: i32::MAX,
            records: vec![Record::default()],
            ..Default::default()
        };
        let mut second = RecordBatch::default();
        second.add_record(Record::default());
        assert_matches!(
            first.merge(second.clone()),
            Err(EncodingError::IncompatibleBatch(_))
        );
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.last_offset_delta, i32::MAX);

        let mut early = RecordBatch {
            first_timestamp: i64::MIN,
            records: vec![Record::default()],
            ..Default::default()
        };
        let late = RecordBatch {
            first_timestamp: i64::MAX,
            ..second
        };
        assert_matches!(early.merge(late), Err(EncodingError::IncompatibleBatch(_)));
        assert_eq!(early.records.len(), 1);
    }

    #[test]
    fn merge_rejects_mismatched_codecs() {
        let mut first = RecordBatch::default();
        let second = RecordBatch {
            codec: CompressionCodec::Gzip,
            ..Default::default()
        };
        assert_matches!(first.merge(second), Err(EncodingError::IncompatibleBatch(_)));
    }
}
