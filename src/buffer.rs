//! Bounds-checked little-endian read/write helpers (C1).
//!
//! Every binary-format decode in this crate goes through [`Cursor`] so that
//! running past the end of a slice is a data condition (`ok` flips to
//! `false` and stays false) rather than a panic or memory corruption.
//! [`Writer`] is the symmetric write-side helper: since it owns a growable
//! `Vec<u8>` it cannot itself run out of space, but it exposes the same
//! `put_*` method names as `Cursor`'s `get_*`, so dirent/extra-field code
//! reads the same on both sides of the codec.

use byteorder::{LittleEndian, WriteBytesExt};

/// A read cursor over a borrowed byte slice.
///
/// Once [`Cursor::ok`] becomes `false` it never becomes `true` again except
/// via [`Cursor::set_offset`] (used by the central-directory finder to
/// rewind and retry candidate EOCD offsets).
pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
    ok: bool,
}

impl<'a> Cursor<'a> {
    /// Wrap a byte slice for bounds-checked reading.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0, ok: true }
    }

    /// Total size of the underlying slice.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether every read so far has stayed in bounds.
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// How many bytes remain between the cursor and the end of the slice.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Explicitly reposition the cursor, clearing a prior out-of-bounds
    /// failure. Used when the finder backs up to try a different EOCD
    /// candidate offset.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.data.len());
        self.ok = true;
    }

    /// Returns a slice of the next `n` bytes and advances the cursor, or
    /// sets `ok = false` and returns `None` on under-run.
    pub fn get(&mut self, n: usize) -> Option<&'a [u8]> {
        if !self.ok || n > self.remaining() {
            self.ok = false;
            return None;
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Some(slice)
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Option<u8> {
        self.get(1).map(|s| s[0])
    }

    /// Read a little-endian `u16`.
    pub fn get_u16(&mut self) -> Option<u16> {
        self.get(2).map(|s| u16::from_le_bytes([s[0], s[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn get_u32(&mut self) -> Option<u32> {
        self.get(4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// Read a little-endian `u64`.
    pub fn get_u64(&mut self) -> Option<u64> {
        self.get(8).map(|s| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(s);
            u64::from_le_bytes(buf)
        })
    }

    /// Bounded copy of up to `len` bytes into `dst`; returns the number of
    /// bytes actually copied (which is `0` if the cursor has already
    /// failed, or less than `len` if fewer bytes remained).
    pub fn read(&mut self, dst: &mut [u8], len: usize) -> usize {
        if !self.ok {
            return 0;
        }
        let n = len.min(dst.len()).min(self.remaining());
        if n == 0 {
            return 0;
        }
        dst[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        n
    }

    /// Check for (and consume) a fixed byte-string signature.
    pub fn expect_signature(&mut self, signature: &[u8; 4]) -> bool {
        match self.get(4) {
            Some(s) if s == signature => true,
            Some(_) => {
                // put the bytes back; a failed signature check isn't a
                // bounds failure, it's a semantic mismatch the caller
                // decides how to handle.
                self.offset -= 4;
                false
            }
            None => false,
        }
    }
}

/// A write cursor that serializes little-endian fields into an owned,
/// growable buffer. Mirrors [`Cursor`]'s method names; since growth always
/// succeeds there is no `ok` flag to track.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a writer with pre-reserved capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    /// Current length of the serialized buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether anything has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append raw bytes.
    pub fn put(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a little-endian `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.write_u16::<LittleEndian>(v).expect("Vec<u8> write is infallible");
    }

    /// Append a little-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.write_u32::<LittleEndian>(v).expect("Vec<u8> write is infallible");
    }

    /// Append a little-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.write_u64::<LittleEndian>(v).expect("Vec<u8> write is infallible");
    }

    /// Overwrite `len` bytes at `offset` (used to back-patch a local header
    /// once the real size/CRC is known, for sources that support seek-write).
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Consume the writer, returning the assembled bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Borrow the assembled bytes without consuming the writer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_under_run_is_sticky() {
        let data = [1u8, 2, 3];
        let mut c = Cursor::new(&data);
        assert_eq!(c.get_u16(), Some(0x0201));
        assert_eq!(c.get_u16(), None);
        assert!(!c.ok());
        // further reads stay failed
        assert_eq!(c.get_u8(), None);
        assert!(!c.ok());
    }

    #[test]
    fn cursor_set_offset_clears_failure() {
        let data = [1u8, 2, 3, 4];
        let mut c = Cursor::new(&data);
        let _ = c.get(10);
        assert!(!c.ok());
        c.set_offset(0);
        assert!(c.ok());
        assert_eq!(c.get_u32(), Some(0x04030201));
    }

    #[test]
    fn writer_roundtrips_into_cursor() {
        let mut w = Writer::new();
        w.put_u16(1);
        w.put_u32(2);
        w.put_u64(3);
        let bytes = w.into_vec();
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.get_u16(), Some(1));
        assert_eq!(c.get_u32(), Some(2));
        assert_eq!(c.get_u64(), Some(3));
    }
}
