//! An on-disk [`Source`]: reads go through [`positioned_io`] (no shared seek
//! cursor, so concurrent entry reads from the same archive file don't
//! fight over position), writes are staged into a sibling `.part` file and
//! renamed into place on commit, matching the "rewrite to a temp file, then
//! rename" pattern most zip tools use to keep a crash from corrupting the
//! original archive.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use positioned_io::{RandomAccessFile, ReadAt};

use crate::error::Error;

use super::{Capabilities, Source, SourceStat, StatFields};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: RandomAccessFile,
    pos: u64,
    pending: Option<(PathBuf, File)>,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = RandomAccessFile::open(&path)?;
        Ok(Self { path, file, pos: 0, pending: None })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{unique}.part", std::process::id()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE | Capabilities::WRITABLE | Capabilities::SEEKABLE | Capabilities::REMOVABLE
    }

    fn stat(&mut self) -> Result<SourceStat, Error> {
        let meta = fs::metadata(&self.path)?;
        let mtime = meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
        let mut valid = StatFields::SIZE;
        if mtime.is_some() {
            valid |= StatFields::MTIME;
        }
        Ok(SourceStat { size: meta.len(), mtime, valid, ..Default::default() })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let n = match self.file.read_at(self.pos, buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: std::io::SeekFrom) -> Result<u64, Error> {
        let len = fs::metadata(&self.path)?.len();
        let new_pos = match pos {
            std::io::SeekFrom::Start(p) => p as i64,
            std::io::SeekFrom::End(p) => len as i64 + p,
            std::io::SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if new_pos < 0 {
            return Err(Error::NotAllowed("seek before start of file"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }

    fn begin_write(&mut self) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::InUse);
        }
        let temp_path = self.temp_path();
        let file = File::create(&temp_path)?;
        self.pending = Some((temp_path, file));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let (_, file) = self.pending.as_mut().ok_or(Error::NotAllowed("write without begin_write"))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn commit_write(&mut self) -> Result<(), Error> {
        let (temp_path, mut file) = self.pending.take().ok_or(Error::NotAllowed("commit_write without begin_write"))?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;
        self.file = RandomAccessFile::open(&self.path)?;
        self.pos = 0;
        Ok(())
    }

    fn rollback_write(&mut self) -> Result<(), Error> {
        if let Some((temp_path, file)) = self.pending.take() {
            drop(file);
            let _ = fs::remove_file(&temp_path);
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), Error> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}
