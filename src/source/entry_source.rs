//! Adapts an entry already sitting in some archive (the same archive or a
//! different one) into a plain [`Source`], so that copying an entry
//! unchanged — the common case for `file_replace`/`file_add` given another
//! archive's entry as the payload — can read its *compressed* bytes
//! directly rather than decompressing and recompressing for no reason.

use std::io::SeekFrom;

use crate::error::Error;
use crate::format::Method;

use super::{window::WindowSource, Capabilities, Source, SourceStat, StatFields};

/// A read-only source over one entry's raw (still-compressed) data region,
/// carrying the metadata needed to stage it into a new central/local
/// header without re-deriving it.
#[derive(Debug)]
pub struct EntrySource<S: Source> {
    window: WindowSource<S>,
    method: Method,
    crc32: u32,
    uncompressed_size: u64,
}

impl<S: Source> EntrySource<S> {
    /// `inner` must be seekable; `start`/`comp_len` bound the entry's
    /// compressed data region within it (as recorded by the owning
    /// archive's directory entry).
    pub fn new(inner: S, start: u64, comp_len: u64, method: Method, crc32: u32, uncompressed_size: u64) -> Self {
        Self { window: WindowSource::new(inner, start, comp_len), method, crc32, uncompressed_size }
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

impl<S: Source> Source for EntrySource<S> {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE | Capabilities::SEEKABLE
    }

    fn stat(&mut self) -> Result<SourceStat, Error> {
        let inner_stat = self.window.stat()?;
        Ok(SourceStat {
            size: self.uncompressed_size,
            comp_size: inner_stat.size,
            crc: self.crc32,
            method: Some(self.method),
            valid: StatFields::SIZE | StatFields::COMP_SIZE | StatFields::CRC | StatFields::METHOD,
            ..Default::default()
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.window.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        self.window.seek(pos)
    }

    fn begin_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("entry sources are read-only"))
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize, Error> {
        Err(Error::NotAllowed("entry sources are read-only"))
    }

    fn commit_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("entry sources are read-only"))
    }

    fn rollback_write(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("entry sources are read-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::buffer::BufferSource;

    #[test]
    fn reports_logical_metadata() {
        let inner = BufferSource::new(b"compressedbytes".to_vec());
        let mut es = EntrySource::new(inner, 0, 15, Method::Deflate, 0x1234, 9001);
        let stat = es.stat().unwrap();
        assert_eq!(stat.size, 9001);
        assert_eq!(stat.comp_size, 15);
        assert_eq!(stat.crc, 0x1234);
    }
}
