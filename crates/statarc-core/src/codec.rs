//! Big-endian primitive reader with mark/reset support.
//!
//! Archives are tailed while they are still being written, so a token may be
//! cut short by end-of-file. [`MarkReader`] journals the bytes of the token in
//! progress; after a short read the decoder rewinds to the last mark and tries
//! the whole token again once more bytes have arrived.

use std::io::{self, ErrorKind, Read};

use crate::format::{COMPACT_VALUE_2_TOKEN, MIN_1BYTE_COMPACT_VALUE};

pub struct MarkReader<R> {
    inner: R,
    /// Bytes consumed since the last mark (only when journaling).
    journal: Vec<u8>,
    /// Read position inside `journal`; `< journal.len()` while replaying.
    replay: usize,
    journaling: bool,
    position: u64,
    mark_position: u64,
}

impl<R: Read> MarkReader<R> {
    /// Wraps `inner`. With `journaling` disabled the reader cannot be reset.
    pub fn new(inner: R, journaling: bool) -> Self {
        Self {
            inner,
            journal: Vec::new(),
            replay: 0,
            journaling,
            position: 0,
            mark_position: 0,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.journaling
    }

    /// Logical byte offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Forgets everything read so far; a later [`reset`](Self::reset) returns here.
    pub fn mark(&mut self) {
        if self.journaling {
            self.journal.drain(..self.replay);
            self.replay = 0;
        }
        self.mark_position = self.position;
    }

    /// Rewinds to the last mark. Returns `false` if the reader cannot rewind.
    pub fn reset(&mut self) -> bool {
        if !self.journaling {
            return false;
        }
        self.replay = 0;
        self.position = self.mark_position;
        true
    }

    /// Drops the journal buffer's spare capacity.
    pub fn shrink(&mut self) {
        self.journal.shrink_to_fit();
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.replay < self.journal.len() {
                let n = (buf.len() - filled).min(self.journal.len() - self.replay);
                buf[filled..filled + n].copy_from_slice(&self.journal[self.replay..self.replay + n]);
                self.replay += n;
                filled += n;
                continue;
            }
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "end of archive stream",
                    ));
                }
                Ok(n) => {
                    if self.journaling {
                        self.journal.extend_from_slice(&buf[filled..filled + n]);
                        self.replay += n;
                    }
                    filled += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> io::Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> io::Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> io::Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Reads a length-prefixed (u16) modified UTF-8 string.
    pub fn read_utf(&mut self) -> io::Result<String> {
        let len = self.read_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.fill(&mut bytes)?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => decode_modified_utf8(e.as_bytes()),
        })
    }

    /// Reads a compact variable-length signed value.
    ///
    /// One signed byte `v`: `v >= -121` is the value itself, `-128` announces
    /// an `i16`, and `-127..=-122` announce `(v + 128) + 2` big-endian bytes
    /// whose first byte carries the sign.
    pub fn read_compact_value(&mut self) -> io::Result<i64> {
        let v = self.read_i8()? as i64;
        if v >= MIN_1BYTE_COMPACT_VALUE {
            return Ok(v);
        }
        if v == COMPACT_VALUE_2_TOKEN as i64 {
            return Ok(self.read_i16()? as i64);
        }
        let bytes_to_read = (v - COMPACT_VALUE_2_TOKEN as i64) as usize + 2;
        let mut value = self.read_i8()? as i64;
        for _ in 1..bytes_to_read {
            value = (value << 8) | self.read_u8()? as i64;
        }
        Ok(value)
    }
}

/// Decodes Java's modified UTF-8 (encoded NUL, surrogate pairs as two
/// 3-byte sequences). Malformed bytes become U+FFFD.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        if b & 0x80 == 0 {
            units.push(b);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            units.push(((b & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            let b2 = bytes[i + 2] as u16;
            units.push(((b & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

pub(crate) fn is_end_of_stream(err: &io::Error) -> bool {
    err.kind() == ErrorKind::UnexpectedEof
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_compact_value;
    use std::io::Cursor;

    fn compact_round_trip(v: i64) -> (i64, usize) {
        let mut buf = Vec::new();
        write_compact_value(&mut buf, v);
        let len = buf.len();
        let mut reader = MarkReader::new(Cursor::new(buf), false);
        (reader.read_compact_value().unwrap(), len)
    }

    #[test]
    fn test_compact_value_boundaries() {
        let cases: &[(i64, usize)] = &[
            (0, 1),
            (127, 1),
            (-121, 1),
            (-122, 3),
            (128, 3),
            (i16::MAX as i64, 3),
            (i16::MIN as i64, 3),
            (i16::MAX as i64 + 1, 4),
            (i16::MIN as i64 - 1, 4),
            ((1 << 23) - 1, 4),
            (-(1 << 23), 4),
            (1 << 23, 5),
            ((1 << 31) - 1, 5),
            (i32::MIN as i64, 5),
            (1 << 31, 6),
            ((1 << 39) - 1, 6),
            (1 << 47, 8),
            ((1 << 55) - 1, 8),
            (1 << 55, 9),
            (-(1 << 55) - 1, 9),
            (i64::MAX, 9),
            (i64::MIN, 9),
        ];
        for &(value, encoded_len) in cases {
            let (decoded, len) = compact_round_trip(value);
            assert_eq!(decoded, value, "value {value}");
            assert_eq!(len, encoded_len, "encoded length of {value}");
        }
    }

    #[test]
    fn test_primitives_big_endian() {
        let bytes = vec![0x01, 0x02, 0xFF, 0xFE, 0x00, 0x00, 0x01, 0x00];
        let mut reader = MarkReader::new(Cursor::new(bytes), false);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_i16().unwrap(), -2);
        assert_eq!(reader.read_i32().unwrap(), 256);
        assert_eq!(reader.position(), 8);
        let err = reader.read_u8().unwrap_err();
        assert!(is_end_of_stream(&err));
    }

    #[test]
    fn test_read_utf() {
        let mut bytes = vec![0x00, 0x05];
        bytes.extend_from_slice(b"hello");
        // modified UTF-8 NUL
        bytes.extend_from_slice(&[0x00, 0x03, b'a', 0xC0, 0x80]);
        // U+1F600 as a surrogate pair, each half a 3-byte sequence
        bytes.extend_from_slice(&[0x00, 0x07, 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80, b'!']);
        let mut reader = MarkReader::new(Cursor::new(bytes), false);
        assert_eq!(reader.read_utf().unwrap(), "hello");
        assert_eq!(reader.read_utf().unwrap(), "a\u{0}");
        assert_eq!(reader.read_utf().unwrap(), "\u{1F600}!");
    }

    #[test]
    fn test_mark_and_reset_replays_partial_read() {
        let mut reader = MarkReader::new(Cursor::new(vec![1, 2, 3]), true);
        assert_eq!(reader.read_u8().unwrap(), 1);
        reader.mark();
        assert!(reader.read_i32().is_err());
        assert!(reader.reset());
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u8().unwrap(), 2);
        assert_eq!(reader.read_u8().unwrap(), 3);
    }

    #[test]
    fn test_reset_unsupported_without_journal() {
        let mut reader = MarkReader::new(Cursor::new(vec![1, 2]), false);
        reader.mark();
        reader.read_u8().unwrap();
        assert!(!reader.reset());
        assert!(!reader.is_resumable());
    }
}
