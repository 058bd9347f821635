use crate::error::{DecodingError, EncodingError};

use super::decoder::PacketDecoder;
use super::encoder::PacketEncoder;
use super::message::MessageSet;
use super::record_batch::{RecordBatch, RECORD_BATCH_MAGIC};
use super::{Decode, Encode};

/// Position of the magic byte in both formats: 8-byte offset, 4-byte length, then either a
/// 4-byte CRC (legacy) or a 4-byte partition leader epoch (record batch).
pub const MAGIC_OFFSET: usize = 16;

/// First produce request version that carries record batches.
pub const FIRST_BATCH_VERSION: i16 = 3;

/// Payload of one topic-partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Records {
    Legacy(MessageSet),
    Batch(RecordBatch),
}

impl Records {
    /// Whether a request of `version` carries this kind of payload.
    pub fn fits_version(&self, version: i16) -> bool {
        match self {
            Records::Legacy(_) => version < FIRST_BATCH_VERSION,
            Records::Batch(_) => version >= FIRST_BATCH_VERSION,
        }
    }

    /// Number of messages or records, looking through compressed wrappers.
    pub fn len(&self) -> usize {
        match self {
            Records::Legacy(set) => set.messages().len(),
            Records::Batch(batch) => batch.records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Encode for Records {
    fn encode(&self, pe: &mut PacketEncoder<'_>) -> Result<(), EncodingError> {
        match self {
            Records::Legacy(set) => set.encode(pe),
            Records::Batch(batch) => batch.encode(pe),
        }
    }
}

impl Decode for Records {
    /// `version` is the produce request version; it picks the format and the magic byte found
    /// on the wire has to agree with it.
    fn decode(pd: &mut PacketDecoder<'_>, version: i16) -> Result<Self, DecodingError> {
        if version < FIRST_BATCH_VERSION {
            if pd.remaining() == 0 {
                return Ok(Records::Legacy(MessageSet::new()));
            }
            let magic = pd.peek_i8(MAGIC_OFFSET)?;
            if !(0..=1).contains(&magic) {
                return Err(DecodingError::UnexpectedMagic { found: magic, version });
            }
            return Ok(Records::Legacy(MessageSet::decode(pd, version)?));
        }

        let magic = pd.peek_i8(MAGIC_OFFSET)?;
        if magic != RECORD_BATCH_MAGIC {
            return Err(DecodingError::UnexpectedMagic { found: magic, version });
        }
        Ok(Records::Batch(RecordBatch::decode(pd, version)?))
    }
}
