//! The on-disk record codec: framing, the CRC-32 digest, and decode outcomes.
//!
//! A record is framed as `crc(u32) | timestamp(u64) | expires_at(u64) |
//! key_len(u32) | value_len(u32) | key | value`, all integers little-endian.
//! `value_len == 0` denotes a tombstone and the value bytes are absent.
//! The digest covers every field after the crc, in that order.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CResult, Error};

/// Default ceiling on a single declared `key_len`/`value_len`, to keep a
/// corrupt or adversarial length field from driving an unbounded
/// allocation before the record has even been validated.
pub const DEFAULT_MAX_FIELD_BYTES: u32 = 64 * 1024 * 1024;

/// One decoded log record. `value: None` is a tombstone (a DELETE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: u64,
    pub expires_at: u64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Outcome of decoding one record from a byte stream.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A fully verified record.
    Record(Record),
    /// A clean tail: no bytes, or the stream ended exactly at a record
    /// boundary. Not an error; recovery stops normally here.
    EndOfStream,
}

impl Record {
    pub fn new(timestamp: u64, expires_at: u64, key: Vec<u8>, value: Option<Vec<u8>>) -> Self {
        Self { timestamp, expires_at, key, value }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Encodes this record to a fresh byte buffer, prefixed with its CRC-32.
    pub fn encode(&self) -> Vec<u8> {
        let value_len = self.value.as_ref().map_or(0, |v| v.len()) as u32;
        let key_len = self.key.len() as u32;
        let mut payload =
            Vec::with_capacity(8 + 8 + 4 + 4 + key_len as usize + value_len as usize);
        payload.write_u64::<LittleEndian>(self.timestamp).expect("write to Vec never fails");
        payload.write_u64::<LittleEndian>(self.expires_at).expect("write to Vec never fails");
        payload.write_u32::<LittleEndian>(key_len).expect("write to Vec never fails");
        payload.write_u32::<LittleEndian>(value_len).expect("write to Vec never fails");
        payload.extend_from_slice(&self.key);
        if let Some(value) = &self.value {
            payload.extend_from_slice(value);
        }

        let crc = crc32fast::hash(&payload);
        let mut out = Vec::with_capacity(4 + payload.len());
        out.write_u32::<LittleEndian>(crc).expect("write to Vec never fails");
        out.extend_from_slice(&payload);
        out
    }

    /// Decodes one record from `reader`, enforcing `max_field_bytes` on the
    /// declared key/value lengths before allocating either buffer.
    ///
    /// A short read of the very first header byte is reported as a clean
    /// `EndOfStream`; any other short read (a header field partially
    /// consumed, or the key/value body truncated) is `Error::Corrupt`, as
    /// is a CRC mismatch or a zero-length key.
    pub fn decode_from<R: Read>(reader: &mut R, max_field_bytes: u32) -> CResult<DecodeOutcome> {
        let mut crc_buf = [0u8; 4];
        match read_fully(reader, &mut crc_buf)? {
            0 => return Ok(DecodeOutcome::EndOfStream),
            4 => {}
            n => return Err(truncated(format!("short read of crc header ({} of 4 bytes)", n))),
        }
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut header = [0u8; 8 + 8 + 4 + 4];
        read_exact_or_truncated(reader, &mut header, "record header")?;

        let mut cursor = &header[..];
        let timestamp = cursor.read_u64::<LittleEndian>().expect("slice is sized");
        let expires_at = cursor.read_u64::<LittleEndian>().expect("slice is sized");
        let key_len = cursor.read_u32::<LittleEndian>().expect("slice is sized");
        let value_len = cursor.read_u32::<LittleEndian>().expect("slice is sized");

        if key_len == 0 {
            return Err(Error::Corrupt("record has zero-length key".to_string()));
        }
        if key_len > max_field_bytes || value_len > max_field_bytes {
            return Err(Error::Corrupt(format!(
                "declared lengths exceed sanity ceiling: key_len={} value_len={} ceiling={}",
                key_len, value_len, max_field_bytes
            )));
        }

        let mut key = vec![0u8; key_len as usize];
        read_exact_or_truncated(reader, &mut key, "key")?;

        let value = if value_len > 0 {
            let mut buf = vec![0u8; value_len as usize];
            read_exact_or_truncated(reader, &mut buf, "value")?;
            Some(buf)
        } else {
            None
        };

        let mut payload = Vec::with_capacity(header.len() + key.len() + value_len as usize);
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&key);
        if let Some(v) = &value {
            payload.extend_from_slice(v);
        }
        let computed_crc = crc32fast::hash(&payload);
        if computed_crc != stored_crc {
            return Err(Error::Corrupt(format!(
                "crc mismatch: stored={:#010x} computed={:#010x}",
                stored_crc, computed_crc
            )));
        }

        Ok(DecodeOutcome::Record(Record { timestamp, expires_at, key, value }))
    }
}

fn truncated(msg: String) -> Error {
    Error::Corrupt(format!("truncated: {}", msg))
}

/// Reads into `buf` until it is full or the stream is exhausted, returning
/// the number of bytes actually read (short of `buf.len()` only at EOF).
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> CResult<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(read)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> CResult<()> {
    let n = read_fully(reader, buf)?;
    if n != buf.len() {
        return Err(truncated(format!("{} ({} of {} bytes)", what, n, buf.len())));
    }
    Ok(())
}
