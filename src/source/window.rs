//! A read-only view over a byte range of a lower [`Source`] (C3).
//!
//! Every compressed entry's data region is exposed this way: rather than
//! copying bytes out of the archive's backing source, a `WindowSource` just
//! remembers `(start, len)` and translates `read`/`seek` calls into calls on
//! the thing underneath, refusing to read past its own boundary even if the
//! lower source has more data after it (e.g. the next entry's local header).

use std::io::SeekFrom;

use crate::error::{Error, InconsistencyDetail};

use super::{Capabilities, Source, SourceStat, StatFields};

#[derive(Debug)]
pub struct WindowSource<S: Source> {
    inner: S,
    start: u64,
    len: u64,
    pos: u64,
}

impl<S: Source> WindowSource<S> {
    /// Bound `inner` to the byte range `[start, start + len)`. The window's
    /// own read position starts at its own offset `0`, i.e. `inner`'s
    /// `start`.
    pub fn new(inner: S, start: u64, len: u64) -> Self {
        Self { inner, start, len, pos: 0 }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Source> Source for WindowSource<S> {
    fn capabilities(&self) -> Capabilities {
        (self.inner.capabilities() & (Capabilities::READABLE | Capabilities::SEEKABLE))
    }

    fn stat(&mut self) -> Result<SourceStat, Error> {
        // A window that would extend past the representable signed 64-bit
        // offset range can never correspond to a valid central directory
        // entry region.
        let in_range = matches!(self.start.checked_add(self.len), Some(end) if end <= i64::MAX as u64);
        if !in_range {
            return Err(Error::inconsistent(InconsistencyDetail::CdirEntryInvalid));
        }
        Ok(SourceStat {
            size: self.len,
            valid: StatFields::SIZE,
            ..Default::default()
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = (self.len - self.pos) as usize;
        let want = buf.len().min(remaining);
        if want == 0 {
            return Ok(0);
        }
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.len as i64 + p,
            SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if new_pos < 0 {
            return Err(Error::NotAllowed("seek before start of window"));
        }
        self.pos = (new_pos as u64).min(self.len);
        Ok(self.pos)
    }

    fn begin_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("window sources are read-only"))
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize, Error> {
        Err(Error::NotAllowed("window sources are read-only"))
    }

    fn commit_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("window sources are read-only"))
    }

    fn rollback_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("window sources are read-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::buffer::BufferSource;

    #[test]
    fn window_bounds_reads() {
        let inner = BufferSource::new(b"0123456789".to_vec());
        let mut win = WindowSource::new(inner, 2, 4); // "2345"
        let mut buf = [0u8; 10];
        let n = win.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"2345");
        assert_eq!(win.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn window_seek_from_end() {
        let inner = BufferSource::new(b"0123456789".to_vec());
        let mut win = WindowSource::new(inner, 0, 6); // "012345"
        win.seek(SeekFrom::End(-2)).unwrap();
        let mut buf = [0u8; 10];
        let n = win.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"45");
    }
}
