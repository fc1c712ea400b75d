//! An in-memory [`Source`], backing entries added via `file_add` from a
//! caller-supplied byte buffer rather than a path on disk.

use std::io::SeekFrom;

use crate::error::Error;

use super::{Capabilities, Source, SourceStat, StatFields};

#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Vec<u8>,
    pos: u64,
    pending_write: Option<Vec<u8>>,
}

impl BufferSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0, pending_write: None }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Source for BufferSource {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE | Capabilities::WRITABLE | Capabilities::SEEKABLE
    }

    fn stat(&mut self) -> Result<SourceStat, Error> {
        Ok(SourceStat {
            size: self.data.len() as u64,
            comp_size: self.data.len() as u64,
            crc: crc32fast::hash(&self.data),
            valid: StatFields::SIZE | StatFields::COMP_SIZE | StatFields::CRC,
            ..Default::default()
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let start = self.pos as usize;
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.data.len() as i64 + p,
            SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if new_pos < 0 {
            return Err(Error::NotAllowed("seek before start of buffer"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }

    fn begin_write(&mut self) -> Result<(), Error> {
        self.pending_write = Some(Vec::new());
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let pending = self
            .pending_write
            .as_mut()
            .ok_or(Error::NotAllowed("write without begin_write"))?;
        pending.extend_from_slice(data);
        Ok(data.len())
    }

    fn commit_write(&mut self) -> Result<(), Error> {
        let pending = self
            .pending_write
            .take()
            .ok_or(Error::NotAllowed("commit_write without begin_write"))?;
        self.data = pending;
        self.pos = 0;
        Ok(())
    }

    fn rollback_write(&mut self) -> Result<(), Error> {
        self.pending_write = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_seek() {
        let mut src = BufferSource::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        src.seek(SeekFrom::Start(6)).unwrap();
        let mut buf2 = [0u8; 5];
        assert_eq!(src.read(&mut buf2).unwrap(), 5);
        assert_eq!(&buf2, b"world");
    }

    #[test]
    fn write_transaction_replaces_contents() {
        let mut src = BufferSource::new(b"old".to_vec());
        src.begin_write().unwrap();
        src.write(b"new content").unwrap();
        src.commit_write().unwrap();
        assert_eq!(src.into_inner(), b"new content");
    }

    #[test]
    fn rollback_keeps_old_contents() {
        let mut src = BufferSource::new(b"old".to_vec());
        src.begin_write().unwrap();
        src.write(b"garbage").unwrap();
        src.rollback_write().unwrap();
        assert_eq!(src.into_inner(), b"old");
    }
}
