use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::config::{Config, InvariantViolation};
use crate::error::EncodingError;

use super::varint::{put_uvarint, uvarint_len, zigzag32, zigzag64};

/// A field whose value is only known once the bytes after it have been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushField {
    /// 4-byte big-endian count of the bytes that follow it.
    Length,
    /// Zigzag varint count of the bytes that follow it.
    VarintLength,
    /// IEEE CRC-32 of the bytes that follow it, used by legacy messages.
    Crc32,
    /// CRC-32C (Castagnoli) of the bytes that follow it, used by record batches.
    Crc32c,
}

impl PushField {
    /// Bytes reserved at push time.
    pub fn reserved_len(self) -> usize {
        match self {
            PushField::VarintLength => 0,
            PushField::Length | PushField::Crc32 | PushField::Crc32c => 4,
        }
    }
}

#[derive(Debug)]
struct Reservation {
    field: PushField,
    start: usize,
}

/// Forward-only writer producing one wire frame.
///
/// Fields whose value depends on what follows them (lengths and checksums) are reserved with
/// [`push`](Self::push) and patched in place by the matching [`pop`](Self::pop).
pub struct PacketEncoder<'c> {
    buf: BytesMut,
    stack: Vec<Reservation>,
    config: &'c Config,
}

impl<'c> PacketEncoder<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self {
            buf: BytesMut::new(),
            stack: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &'c Config {
        self.config
    }

    /// Bytes written so far.
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    /// Returns the frame, failing if a push was never popped.
    pub fn finish(self) -> Result<Bytes, EncodingError> {
        if !self.stack.is_empty() {
            let msg = self
                .config
                .report(InvariantViolation::UnbalancedPush(self.stack.len()));
            return Err(EncodingError::Invariant(msg));
        }
        Ok(self.buf.freeze())
    }

    fn reserve(&mut self, n: usize) -> Result<(), EncodingError> {
        let size = self.buf.len() + n;
        if size > self.config.max_request_size {
            return Err(EncodingError::RequestTooLarge {
                size,
                max: self.config.max_request_size,
            });
        }
        self.buf.reserve(n);
        Ok(())
    }

    pub fn put_i8(&mut self, v: i8) -> Result<(), EncodingError> {
        self.reserve(1)?;
        self.buf.put_i8(v);
        Ok(())
    }

    pub fn put_i16(&mut self, v: i16) -> Result<(), EncodingError> {
        self.reserve(2)?;
        self.buf.put_i16(v);
        Ok(())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), EncodingError> {
        self.reserve(4)?;
        self.buf.put_i32(v);
        Ok(())
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), EncodingError> {
        self.reserve(8)?;
        self.buf.put_i64(v);
        Ok(())
    }

    pub fn put_varint(&mut self, v: i32) -> Result<(), EncodingError> {
        self.put_uvarint(zigzag32(v) as u64)
    }

    pub fn put_varlong(&mut self, v: i64) -> Result<(), EncodingError> {
        self.put_uvarint(zigzag64(v))
    }

    fn put_uvarint(&mut self, v: u64) -> Result<(), EncodingError> {
        self.reserve(uvarint_len(v))?;
        put_uvarint(&mut self.buf, v);
        Ok(())
    }

    /// Array count, a 4-byte signed integer.
    pub fn put_array_length(&mut self, len: usize) -> Result<(), EncodingError> {
        let len = i32::try_from(len).map_err(|_| EncodingError::ValueTooLarge {
            field: "array",
            len,
        })?;
        self.put_i32(len)
    }

    /// STRING: 2-byte signed length followed by UTF-8 bytes.
    pub fn put_string(&mut self, s: &str) -> Result<(), EncodingError> {
        let len = i16::try_from(s.len()).map_err(|_| EncodingError::ValueTooLarge {
            field: "string",
            len: s.len(),
        })?;
        self.put_i16(len)?;
        self.put_raw_bytes(s.as_bytes())
    }

    /// NULLABLE_STRING: like STRING, with length -1 for null.
    pub fn put_nullable_string(&mut self, s: Option<&str>) -> Result<(), EncodingError> {
        match s {
            Some(s) => self.put_string(s),
            None => self.put_i16(-1),
        }
    }

    /// NULLABLE_BYTES: 4-byte signed length followed by the bytes, with length -1 for null.
    pub fn put_bytes(&mut self, b: Option<&[u8]>) -> Result<(), EncodingError> {
        let Some(b) = b else {
            return self.put_i32(-1);
        };
        let len = i32::try_from(b.len()).map_err(|_| EncodingError::ValueTooLarge {
            field: "bytes",
            len: b.len(),
        })?;
        self.put_i32(len)?;
        self.put_raw_bytes(b)
    }

    /// Varint length (or -1 for null) followed by the bytes, as used inside records.
    pub fn put_varint_bytes(&mut self, b: Option<&[u8]>) -> Result<(), EncodingError> {
        let Some(b) = b else {
            return self.put_varint(-1);
        };
        let len = i32::try_from(b.len()).map_err(|_| EncodingError::ValueTooLarge {
            field: "varint bytes",
            len: b.len(),
        })?;
        self.put_varint(len)?;
        self.put_raw_bytes(b)
    }

    pub fn put_raw_bytes(&mut self, b: &[u8]) -> Result<(), EncodingError> {
        self.reserve(b.len())?;
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// Reserves `field` at the current offset; it is filled in by the matching [`pop`](Self::pop).
    pub fn push(&mut self, field: PushField) -> Result<(), EncodingError> {
        let start = self.buf.len();
        let reserved = field.reserved_len();
        self.reserve(reserved)?;
        self.buf.put_bytes(0, reserved);
        self.stack.push(Reservation { field, start });
        Ok(())
    }

    /// Patches the most recently pushed field now that everything it covers has been written.
    pub fn pop(&mut self) -> Result<(), EncodingError> {
        let Some(Reservation { field, start }) = self.stack.pop() else {
            let msg = self.config.report(InvariantViolation::PopWithoutPush);
            return Err(EncodingError::Invariant(msg));
        };
        let body_start = start + field.reserved_len();
        let body_len = self.buf.len() - body_start;

        match field {
            PushField::Length => {
                let len = i32::try_from(body_len).map_err(|_| EncodingError::ValueTooLarge {
                    field: "length field",
                    len: body_len,
                })?;
                self.buf[start..body_start].copy_from_slice(&len.to_be_bytes());
            }
            PushField::VarintLength => {
                let len = i32::try_from(body_len).map_err(|_| EncodingError::ValueTooLarge {
                    field: "varint length field",
                    len: body_len,
                })?;
                // the prefix width is only known now, so move the body behind it
                let prefix = zigzag32(len) as u64;
                self.reserve(uvarint_len(prefix))?;
                let body = self.buf.split_off(start);
                put_uvarint(&mut self.buf, prefix);
                self.buf.unsplit(body);
            }
            PushField::Crc32 => {
                let crc = crc32fast::hash(&self.buf[body_start..]);
                self.buf[start..body_start].copy_from_slice(&crc.to_be_bytes());
            }
            PushField::Crc32c => {
                let crc = crc32c::crc32c(&self.buf[body_start..]);
                self.buf[start..body_start].copy_from_slice(&crc.to_be_bytes());
            }
        }

        trace!(?field, start, body_len, "patched pushed field");
        Ok(())
    }
}
