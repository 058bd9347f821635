use std::collections::BTreeMap;

use crate::error::{DecodingError, EncodingError};
use crate::protocol::decoder::PacketDecoder;
use crate::protocol::encoder::PacketEncoder;
use crate::protocol::request::produce::MAX_VERSION;
use crate::protocol::{Decode, Encode, ErrorCode};

/// Outcome of producing to one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceResponseBlock {
    /// Raw broker error code, see [`error`](Self::error).
    pub error_code: i16,
    /// Offset assigned to the first produced message.
    pub offset: i64,
    /// Log append time in milliseconds, -1 when the topic uses create time (v2+).
    pub timestamp: Option<i64>,
    /// v5+
    pub log_start_offset: Option<i64>,
}

impl ProduceResponseBlock {
    /// The broker error, or `Err` with the raw code when this build does not know it.
    pub fn error(&self) -> Result<ErrorCode, i16> {
        ErrorCode::try_from(self.error_code).map_err(|e| e.number)
    }

    fn encode(&self, pe: &mut PacketEncoder<'_>, version: i16) -> Result<(), EncodingError> {
        pe.put_i16(self.error_code)?;
        pe.put_i64(self.offset)?;
        if version >= 2 {
            pe.put_i64(self.timestamp.unwrap_or(-1))?;
        }
        if version >= 5 {
            pe.put_i64(self.log_start_offset.unwrap_or(-1))?;
        }
        Ok(())
    }
}

impl Decode for ProduceResponseBlock {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        let error_code = pd.get_i16()?;
        let offset = pd.get_i64()?;
        let timestamp = if version >= 2 {
            Some(pd.get_i64()?)
        } else {
            None
        };
        let log_start_offset = if version >= 5 {
            Some(pd.get_i64()?)
        } else {
            None
        };
        Ok(Self {
            error_code,
            offset,
            timestamp,
            log_start_offset,
        })
    }
}

/// https://kafka.apache.org/protocol.html#The_Messages_Produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceResponse {
    pub version: i16,
    pub blocks: BTreeMap<String, BTreeMap<i32, ProduceResponseBlock>>,
    /// Milliseconds the request was throttled for quota violations (v1+).
    pub throttle_time_ms: Option<i32>,
}

impl ProduceResponse {
    pub fn block(&self, topic: &str, partition: i32) -> Option<&ProduceResponseBlock> {
        self.blocks.get(topic)?.get(&partition)
    }

    pub fn add_block(&mut self, topic: &str, partition: i32, block: ProduceResponseBlock) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, block);
    }
}

impl Encode for ProduceResponse {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        if !(0..=MAX_VERSION).contains(&self.version) {
            return Err(EncodingError::UnsupportedVersion {
                what: "produce response",
                version: self.version,
            });
        }

        pe.put_array_length(self.blocks.len())?;
        for (topic, partitions) in &self.blocks {
            pe.put_string(topic)?;
            pe.put_array_length(partitions.len())?;
            for (&partition, block) in partitions {
                pe.put_i32(partition)?;
                block.encode(pe, self.version)?;
            }
        }

        if self.version >= 1 {
            pe.put_i32(self.throttle_time_ms.unwrap_or(0))?;
        }
        Ok(())
    }
}

impl Decode for ProduceResponse {
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        if !(0..=MAX_VERSION).contains(&version) {
            return Err(DecodingError::UnsupportedVersion {
                what: "produce response",
                version,
            });
        }

        let mut blocks = BTreeMap::new();
        let topic_count = pd.get_array_length()?;
        for _ in 0..topic_count {
            let topic = pd.get_string()?.to_owned();
            let mut partitions = BTreeMap::new();
            let partition_count = pd.get_array_length()?;
            for _ in 0..partition_count {
                let partition = pd.get_i32()?;
                partitions.insert(partition, ProduceResponseBlock::decode(pd, version)?);
            }
            blocks.insert(topic, partitions);
        }

        let throttle_time_ms = if version >= 1 {
            Some(pd.get_i32()?)
        } else {
            None
        };

        Ok(Self {
            version,
            blocks,
            throttle_time_ms,
        })
    }
}
