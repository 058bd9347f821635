use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{DecodingError, EncodingError};
use crate::protocol::decoder::PacketDecoder;
use crate::protocol::encoder::{PacketEncoder, PushField};
use crate::protocol::message::{Message, MessageSet};
use crate::protocol::record_batch::{Record, RecordBatch};
use crate::protocol::records::{Records, FIRST_BATCH_VERSION};
use crate::protocol::{Decode, Encode};

pub const MAX_VERSION: i16 = 7;

/// How many replicas must acknowledge a produce before the broker answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredAcks(pub i16);

impl RequiredAcks {
    /// The broker sends no response at all.
    pub const NO_RESPONSE: RequiredAcks = RequiredAcks(0);
    /// Answer once the leader has written the records.
    pub const WAIT_FOR_LOCAL: RequiredAcks = RequiredAcks(1);
    /// Answer once every in-sync replica has the records.
    pub const WAIT_FOR_ALL: RequiredAcks = RequiredAcks(-1);
}

/// https://kafka.apache.org/protocol.html#The_Messages_Produce
///
/// Versions 0 to 2 carry legacy message sets, versions 3 and up carry record batches. The
/// payload kind is fixed per topic-partition: adding a batch where a message set already sits
/// (or the reverse) fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceRequest {
    pub version: i16,
    /// Only sent from version 3.
    pub transactional_id: Option<String>,
    pub required_acks: RequiredAcks,
    /// Milliseconds the broker waits for the required acks.
    pub timeout: i32,
    pub records: BTreeMap<String, BTreeMap<i32, Records>>,
}

impl ProduceRequest {
    pub fn new(version: i16, required_acks: RequiredAcks, timeout: i32) -> Self {
        Self {
            version,
            required_acks,
            timeout,
            ..Default::default()
        }
    }

    fn slot(&mut self, topic: &str, partition: i32) -> Option<&mut Records> {
        self.records.get_mut(topic)?.get_mut(&partition)
    }

    fn insert(&mut self, topic: &str, partition: i32, records: Records) {
        self.records
            .entry(topic.to_string())
            .or_default()
            .insert(partition, records);
    }

    fn mixed(topic: &str, partition: i32) -> EncodingError {
        EncodingError::MixedRecordFormats {
            topic: topic.to_string(),
            partition,
        }
    }

    pub fn add_message(
        &mut self,
        topic: &str,
        partition: i32,
        msg: Message,
    ) -> Result<(), EncodingError> {
        let mut set = MessageSet::new();
        set.add_message(msg);
        self.add_set(topic, partition, set)
    }

    /// Appends the blocks of `set` to the message set of the topic-partition.
    pub fn add_set(
        &mut self,
        topic: &str,
        partition: i32,
        set: MessageSet,
    ) -> Result<(), EncodingError> {
        match self.slot(topic, partition) {
            Some(Records::Legacy(existing)) => existing.blocks.extend(set.blocks),
            Some(Records::Batch(_)) => return Err(Self::mixed(topic, partition)),
            None => self.insert(topic, partition, Records::Legacy(set)),
        }
        Ok(())
    }

    /// Merges `batch` into the record batch of the topic-partition.
    pub fn add_batch(
        &mut self,
        topic: &str,
        partition: i32,
        batch: RecordBatch,
    ) -> Result<(), EncodingError> {
        match self.slot(topic, partition) {
            Some(Records::Batch(existing)) => existing.merge(batch)?,
            Some(Records::Legacy(_)) => return Err(Self::mixed(topic, partition)),
            None => self.insert(topic, partition, Records::Batch(batch)),
        }
        Ok(())
    }

    /// Appends `record` to the record batch of the topic-partition. A new batch is opened for
    /// a producer that is neither idempotent nor transactional.
    pub fn add_record(
        &mut self,
        topic: &str,
        partition: i32,
        record: Record,
    ) -> Result<(), EncodingError> {
        match self.slot(topic, partition) {
            Some(Records::Batch(existing)) => existing.add_record(record),
            Some(Records::Legacy(_)) => return Err(Self::mixed(topic, partition)),
            None => {
                let mut batch = RecordBatch {
                    producer_id: -1,
                    producer_epoch: -1,
                    base_sequence: -1,
                    ..Default::default()
                };
                batch.add_record(record);
                self.insert(topic, partition, Records::Batch(batch));
            }
        }
        Ok(())
    }
}

impl Encode for ProduceRequest {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        if !(0..=MAX_VERSION).contains(&self.version) {
            return Err(EncodingError::UnsupportedVersion {
                what: "produce request",
                version: self.version,
            });
        }

        if self.version >= FIRST_BATCH_VERSION {
            pe.put_nullable_string(self.transactional_id.as_deref())?;
        }
        pe.put_i16(self.required_acks.0)?;
        pe.put_i32(self.timeout)?;

        pe.put_array_length(self.records.len())?;
        for (topic, partitions) in &self.records {
            pe.put_string(topic)?;
            pe.put_array_length(partitions.len())?;
            for (&partition, records) in partitions {
                if !records.fits_version(self.version) {
                    return Err(Self::mixed(topic, partition));
                }
                pe.put_i32(partition)?;
                pe.push(PushField::Length)?;
                records.encode(pe)?;
                pe.pop()?;
            }
        }

        trace!(
            version = self.version,
            topics = self.records.len(),
            size = pe.offset(),
            "encoded produce request"
        );
        Ok(())
    }
}

impl Decode for ProduceRequest {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        if !(0..=MAX_VERSION).contains(&version) {
            return Err(DecodingError::UnsupportedVersion {
                what: "produce request",
                version,
            });
        }

        let transactional_id = if version >= FIRST_BATCH_VERSION {
            pd.get_nullable_string()?.map(str::to_owned)
        } else {
            None
        };
        let required_acks = RequiredAcks(pd.get_i16()?);
        let timeout = pd.get_i32()?;

        let mut records = BTreeMap::new();
        let topic_count = pd.get_array_length()?;
        for _ in 0..topic_count {
            let topic = pd.get_string()?.to_owned();
            let mut partitions = BTreeMap::new();
            let partition_count = pd.get_array_length()?;
            for _ in 0..partition_count {
                let partition = pd.get_i32()?;
                pd.push(PushField::Length)?;
                partitions.insert(partition, Records::decode(pd, version)?);
                pd.pop()?;
            }
            records.insert(topic, partitions);
        }

        Ok(Self {
            version,
            transactional_id,
            required_acks,
            timeout,
            records,
        })
    }
}
