//! Forward-biased cursor over a byte source (spec §4.1).
//!
//! The decoder itself is written against `Read + Seek`, mirroring how the
//! teacher's `EventPipeParser<R>` is generic over `R: Read + Seek` (see
//! `coreclr-tracing/src/nettrace/parser.rs`). `File` and `Cursor<Vec<u8>>`
//! already satisfy that bound in O(1) extra memory. [`BufferedNonSeekable`]
//! adapts a socket-like `Read`-only source to the same bound by retaining
//! every byte it has ever produced, so `goto` to any previously-read offset
//! always succeeds and `goto` past the current high-water mark is rejected
//! rather than silently blocking on more data.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::error::{DecodeError, Result};

/// An opaque, monotonic absolute offset into the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub u64);

impl Position {
    pub fn add(self, k: u64) -> Position {
        Position(self.0 + k)
    }

    pub fn sub(self, other: Position) -> i64 {
        self.0 as i64 - other.0 as i64
    }
}

/// Adapts a `Read`-only source (e.g. a socket) into `Read + Seek` by
/// retaining the full history of bytes it has produced. This is the "downgraded
/// seekability" source mentioned in spec §6: `goto` only ever succeeds within
/// what has already been read off the wire.
pub struct BufferedNonSeekable<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> BufferedNonSeekable<R> {
    pub fn new(inner: R) -> Self {
        BufferedNonSeekable {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: Read> Read for BufferedNonSeekable<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.buf.len() {
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk)?;
            self.buf.extend_from_slice(&chunk[..n]);
        }
        let available = &self.buf[self.pos..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read> Seek for BufferedNonSeekable<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot seek from end of a non-seekable source",
                ))
            }
        };
        if target < 0 || target as usize > self.buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "goto target is outside the buffered window of a non-seekable source",
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

/// Thin wrapper providing the labeled-position, peek, and aligned-read
/// operations the decoder relies on, on top of any `Read + Seek` source.
pub struct StreamReader<R> {
    inner: R,
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        StreamReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn position(&mut self) -> Result<Position> {
        Ok(Position(self.inner.stream_position()?))
    }

    pub fn goto(&mut self, label: Position) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(label.0))
            .map_err(DecodeError::Io)?;
        Ok(())
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let offset = self.position()?.0;
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::Truncated { offset })?;
        Ok(buf)
    }

    /// Expose `n` contiguous readable bytes without advancing the cursor.
    pub fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let start = self.position()?;
        let bytes = self.read(n)?;
        self.goto(start)?;
        Ok(bytes)
    }

    /// Advance to the next multiple of `align` relative to the start of the
    /// stream, returning the number of padding bytes skipped.
    pub fn align_to(&mut self, align: u64) -> Result<u64> {
        let pos = self.position()?.0;
        let rem = pos % align;
        if rem == 0 {
            return Ok(0);
        }
        let pad = align - rem;
        self.goto(Position(pos + pad))?;
        Ok(pad)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    pub fn read_guid(&mut self) -> Result<[u8; 16]> {
        Ok(self.read(16)?.try_into().unwrap())
    }

    /// UTF-16LE string terminated by a `0x0000` code unit (spec §6).
    pub fn read_nul_terminated_utf16(&mut self) -> Result<String> {
        let mut units = Vec::new();
        loop {
            let unit = u16::from_le_bytes(self.read(2)?.try_into().unwrap());
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

impl StreamReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        StreamReader::new(Cursor::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_advance() {
        let mut r = StreamReader::from_bytes(vec![1, 2, 3, 4]);
        let peeked = r.peek(2).unwrap();
        assert_eq!(peeked, vec![1, 2]);
        assert_eq!(r.read(2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn align_to_four() {
        let mut r = StreamReader::from_bytes(vec![0; 16]);
        r.read(3).unwrap();
        let pad = r.align_to(4).unwrap();
        assert_eq!(pad, 1);
        assert_eq!(r.position().unwrap().0, 4);
    }

    #[test]
    fn nul_terminated_utf16_roundtrip() {
        let mut bytes = Vec::new();
        for c in "hi".encode_utf16() {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        let mut r = StreamReader::from_bytes(bytes);
        assert_eq!(r.read_nul_terminated_utf16().unwrap(), "hi");
    }

    #[test]
    fn non_seekable_goto_within_window_succeeds() {
        let data = vec![1u8, 2, 3, 4, 5];
        let src = BufferedNonSeekable::new(Cursor::new(data));
        let mut r = StreamReader::new(src);
        r.read(4).unwrap();
        r.goto(Position(1)).unwrap();
        assert_eq!(r.read(1).unwrap(), vec![2]);
    }

    #[test]
    fn non_seekable_goto_past_high_water_mark_fails() {
        let data = vec![1u8, 2, 3, 4, 5];
        let src = BufferedNonSeekable::new(Cursor::new(data));
        let mut r = StreamReader::new(src);
        r.read(2).unwrap();
        assert!(r.goto(Position(4)).is_err());
    }
}
