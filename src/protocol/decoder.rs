use bytes::Buf;
use tracing::{trace, warn};

use crate::config::{Config, InvariantViolation};
use crate::error::DecodingError;

use super::encoder::PushField;
use super::varint::{read_varint, read_varlong};

/// How many compressed message sets may be nested inside one another. Kafka itself never
/// nests deeper than a single wrapper message.
pub const MAX_NESTING_DEPTH: usize = 1;

#[derive(Debug, Clone, Copy)]
enum Expected {
    Len(usize),
    Crc(u32),
}

#[derive(Debug)]
struct Checkpoint {
    field: PushField,
    /// offset of the first byte covered by the field
    start: usize,
    expected: Expected,
}

/// Forward-only reader over a borrowed wire frame.
///
/// Lengths and checksums are read with [`push`](Self::push) and verified by the matching
/// [`pop`](Self::pop) once the bytes they cover have been consumed. While a length frame is
/// open no read may cross its end.
#[derive(Debug)]
pub struct PacketDecoder<'a> {
    raw: &'a [u8],
    off: usize,
    stack: Vec<Checkpoint>,
    config: &'a Config,
    depth: usize,
}

impl<'a> PacketDecoder<'a> {
    pub fn new(raw: &'a [u8], config: &'a Config) -> Self {
        Self {
            raw,
            off: 0,
            stack: Vec::new(),
            config,
            depth: 0,
        }
    }

    /// A decoder over `raw` at the same nesting level, sharing this decoder's configuration.
    pub fn view<'b>(&self, raw: &'b [u8]) -> PacketDecoder<'b>
    where
        'a: 'b,
    {
        PacketDecoder {
            raw,
            off: 0,
            stack: Vec::new(),
            config: self.config,
            depth: self.depth,
        }
    }

    /// Fails when a payload nested inside this decoder would exceed the nesting bound.
    pub fn check_nesting(&self) -> Result<(), DecodingError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(DecodingError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        Ok(())
    }

    /// A decoder over a decompressed payload found inside this one.
    pub fn nested<'b>(&self, raw: &'b [u8]) -> Result<PacketDecoder<'b>, DecodingError>
    where
        'a: 'b,
    {
        self.check_nesting()?;
        let mut pd = self.view(raw);
        pd.depth += 1;
        Ok(pd)
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn offset(&self) -> usize {
        self.off
    }

    /// End of the innermost open length frame, or of the whole buffer.
    fn limit(&self) -> usize {
        self.stack
            .iter()
            .rev()
            .find_map(|c| match c.expected {
                Expected::Len(len) => Some(c.start + len),
                Expected::Crc(_) => None,
            })
            .unwrap_or(self.raw.len())
    }

    /// Bytes left before the end of the innermost open length frame.
    pub fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.off)
    }

    pub fn finish(self) -> Result<(), DecodingError> {
        if !self.stack.is_empty() {
            let msg = self
                .config
                .report(InvariantViolation::UnbalancedPush(self.stack.len()));
            return Err(DecodingError::Invariant(msg));
        }
        match self.raw.len() - self.off {
            0 => Ok(()),
            n => Err(DecodingError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodingError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(DecodingError::InsufficientData {
                needed: n,
                remaining,
            });
        }
        let bytes = &self.raw[self.off..self.off + n];
        self.off += n;
        Ok(bytes)
    }

    /// Validates a declared length before anything is read or allocated for it.
    fn check_len(&self, len: i64) -> Result<usize, DecodingError> {
        if len < 0 {
            return Err(DecodingError::InvalidLength(len));
        }
        let len = len as usize;
        if len > self.config.max_response_size {
            return Err(DecodingError::ResponseTooLarge {
                size: len,
                max: self.config.max_response_size,
            });
        }
        let remaining = self.remaining();
        if len > remaining {
            return Err(DecodingError::InsufficientData {
                needed: len,
                remaining,
            });
        }
        Ok(len)
    }

    pub fn get_i8(&mut self) -> Result<i8, DecodingError> {
        Ok(self.take(1)?.get_i8())
    }

    pub fn get_i16(&mut self) -> Result<i16, DecodingError> {
        Ok(self.take(2)?.get_i16())
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodingError> {
        Ok(self.take(4)?.get_i32())
    }

    pub fn get_i64(&mut self) -> Result<i64, DecodingError> {
        Ok(self.take(8)?.get_i64())
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodingError> {
        Ok(self.take(4)?.get_u32())
    }

    pub fn get_varint(&mut self) -> Result<i32, DecodingError> {
        let (v, len) = read_varint(&self.raw[self.off..self.limit()])?;
        self.off += len;
        Ok(v)
    }

    pub fn get_varlong(&mut self) -> Result<i64, DecodingError> {
        let (v, len) = read_varlong(&self.raw[self.off..self.limit()])?;
        self.off += len;
        Ok(v)
    }

    /// Array count. Every element takes at least one byte, so a count beyond the remaining
    /// bytes is rejected before anything is allocated for it.
    pub fn get_array_length(&mut self) -> Result<usize, DecodingError> {
        let n = self.get_i32()?;
        self.check_len(n as i64)
    }

    /// Element count written as a varint, as used for record headers.
    pub fn get_varint_array_length(&mut self) -> Result<usize, DecodingError> {
        let n = self.get_varint()?;
        self.check_len(n as i64)
    }

    pub fn get_string(&mut self) -> Result<&'a str, DecodingError> {
        let len = self.get_i16()?;
        let len = self.check_len(len as i64)?;
        Ok(std::str::from_utf8(self.take(len)?)?)
    }

    pub fn get_nullable_string(&mut self) -> Result<Option<&'a str>, DecodingError> {
        let len = self.get_i16()?;
        if len == -1 {
            return Ok(None);
        }
        let len = self.check_len(len as i64)?;
        Ok(Some(std::str::from_utf8(self.take(len)?)?))
    }

    /// NULLABLE_BYTES with a 4-byte length.
    pub fn get_bytes(&mut self) -> Result<Option<&'a [u8]>, DecodingError> {
        let len = self.get_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = self.check_len(len as i64)?;
        Ok(Some(self.take(len)?))
    }

    /// Bytes with a varint length, -1 meaning null.
    pub fn get_varint_bytes(&mut self) -> Result<Option<&'a [u8]>, DecodingError> {
        let len = self.get_varint()?;
        if len == -1 {
            return Ok(None);
        }
        let len = self.check_len(len as i64)?;
        Ok(Some(self.take(len)?))
    }

    pub fn get_raw_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodingError> {
        self.check_len(n as i64)?;
        self.take(n)
    }

    /// Reads the byte `ahead` bytes past the cursor without consuming anything.
    pub fn peek_i8(&self, ahead: usize) -> Result<i8, DecodingError> {
        let remaining = self.remaining();
        if ahead >= remaining {
            return Err(DecodingError::InsufficientData {
                needed: ahead + 1,
                remaining,
            });
        }
        Ok(self.raw[self.off + ahead] as i8)
    }

    /// Reads `field` and remembers what the bytes after it must satisfy.
    pub fn push(&mut self, field: PushField) -> Result<(), DecodingError> {
        let expected = match field {
            PushField::Length => {
                let len = self.get_i32()?;
                Expected::Len(self.check_len(len as i64)?)
            }
            PushField::VarintLength => {
                let len = self.get_varint()?;
                Expected::Len(self.check_len(len as i64)?)
            }
            PushField::Crc32 | PushField::Crc32c => Expected::Crc(self.get_u32()?),
        };
        self.stack.push(Checkpoint {
            field,
            start: self.off,
            expected,
        });
        Ok(())
    }

    /// Verifies the most recently pushed field against the bytes consumed since.
    pub fn pop(&mut self) -> Result<(), DecodingError> {
        let Some(Checkpoint {
            field,
            start,
            expected,
        }) = self.stack.pop()
        else {
            let msg = self.config.report(InvariantViolation::PopWithoutPush);
            return Err(DecodingError::Invariant(msg));
        };

        match expected {
            Expected::Len(declared) => {
                let consumed = self.off - start;
                if consumed != declared {
                    return Err(DecodingError::LengthMismatch { declared, consumed });
                }
            }
            Expected::Crc(stored) => {
                let covered = &self.raw[start..self.off];
                let computed = match field {
                    PushField::Crc32c => crc32c::crc32c(covered),
                    _ => crc32fast::hash(covered),
                };
                if computed != stored {
                    warn!(?field, stored, computed, "checksum mismatch");
                    return Err(DecodingError::ChecksumMismatch { stored, computed });
                }
            }
        }

        trace!(?field, start, end = self.off, "verified pushed field");
        Ok(())
    }
}
