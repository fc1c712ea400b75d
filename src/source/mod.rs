//! The `Source` abstraction (C2): a single trait that every byte stream this
//! crate touches goes through, whether it backs reading an existing archive
//! member or staging a write that hasn't been committed yet.
//!
//! This generalizes libzip's `zip_source_t` command dispatch (one function
//! pointer handling `ZIP_SOURCE_OPEN`/`READ`/`STAT`/`BEGIN_WRITE`/... via a
//! big match) into a Rust trait object: each "command" becomes a method, and
//! [`Capabilities`] replaces the `ZIP_SOURCE_SUPPORTS` capability bitmask
//! negotiation.
//!
//! Concrete sources:
//! - [`file::FileSource`] — an on-disk file, read via [`positioned_io`], written
//!   through a sibling temp file that's renamed into place on commit.
//! - [`buffer::BufferSource`] — an in-memory `Vec<u8>`.
//! - [`window::WindowSource`] (C3) — bounds a byte range of any other source,
//!   used to expose one entry's compressed data region without copying.
//! - [`entry_source::EntrySource`] — adapts an [`crate::entry::Entry`] being
//!   read out of one archive into a `Source` that can be staged into another
//!   (cross-archive copy without a round trip through decompression).
//!
//! [`codec`] layers compression, encryption, and CRC verification around a
//! lower `Source` without needing to know what that lower source actually is.

pub mod buffer;
pub mod codec;
pub mod entry_source;
pub mod file;
pub mod window;

use std::io::SeekFrom;

use bitflags::bitflags;

use crate::error::Error;
use crate::format::Method;

bitflags! {
    /// What operations a [`Source`] supports. Mirrors libzip's
    /// `ZIP_SOURCE_SUPPORTS` bitmask: callers (the archive commit algorithm,
    /// mainly) probe this before attempting a write or a seek rather than
    /// relying on every source accepting every call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// `read`/`seek` are meaningful.
        const READABLE = 1 << 0;
        /// `begin_write`/`write`/`commit_write`/`rollback_write` are meaningful.
        const WRITABLE = 1 << 1;
        /// `seek` is meaningful even without a full read (e.g. for `stat`-only sources).
        const SEEKABLE = 1 << 2;
        /// `remove` is meaningful (the backing storage can delete itself).
        const REMOVABLE = 1 << 3;
    }
}

bitflags! {
    /// Which fields of a [`SourceStat`] the source was actually able to
    /// populate — mirrors libzip's `ZIP_STAT_*` valid-bits, since not every
    /// source (e.g. a streaming one) can report every field up front.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatFields: u32 {
        const SIZE = 1 << 0;
        const COMP_SIZE = 1 << 1;
        const MTIME = 1 << 2;
        const CRC = 1 << 3;
        const METHOD = 1 << 4;
        const ENCRYPTION_METHOD = 1 << 5;
    }
}

/// Encryption method reported by [`SourceStat`], independent from the
/// compression [`Method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    TraditionalPkware,
    WinZipAes(crate::format::AesStrength),
}

/// What a [`Source`] knows about the data it serves, before any of it is
/// necessarily read.
#[derive(Debug, Clone, Default)]
pub struct SourceStat {
    pub size: u64,
    pub comp_size: u64,
    pub mtime: Option<chrono::DateTime<chrono::Utc>>,
    pub crc: u32,
    pub method: Option<Method>,
    pub encryption_method: Option<EncryptionMethod>,
    pub valid: StatFields,
}

/// A readable and/or writable byte stream, with explicit capability
/// negotiation and a two-phase write (`begin_write` ... `write`* ...
/// `commit_write`/`rollback_write`) so that an aborted [`crate::archive::Archive::commit`]
/// never leaves a half-written source mistaken for a finished one.
pub trait Source: std::fmt::Debug {
    /// What this source supports; callers should check before calling the
    /// corresponding methods rather than relying on a runtime error.
    fn capabilities(&self) -> Capabilities;

    /// Best-effort metadata, e.g. to avoid a decompression pass just to
    /// report `uncompressed_size()` to a caller.
    fn stat(&mut self) -> Result<SourceStat, Error>;

    /// Read up to `buf.len()` bytes, returning how many were actually read
    /// (`0` at EOF). Requires [`Capabilities::READABLE`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Reposition the read cursor. Requires [`Capabilities::SEEKABLE`].
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error>;

    /// Begin a write transaction. Must be paired with exactly one of
    /// [`Source::commit_write`] or [`Source::rollback_write`]. Requires
    /// [`Capabilities::WRITABLE`].
    fn begin_write(&mut self) -> Result<(), Error>;

    /// Append bytes to the in-progress write.
    fn write(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Atomically make a completed write visible to subsequent `read`/`stat`
    /// calls (for [`file::FileSource`], this is the temp-file rename).
    fn commit_write(&mut self) -> Result<(), Error>;

    /// Discard an in-progress write, leaving the source as it was before
    /// [`Source::begin_write`].
    fn rollback_write(&mut self) -> Result<(), Error>;

    /// Delete the backing storage entirely. Requires [`Capabilities::REMOVABLE`].
    fn remove(&mut self) -> Result<(), Error> {
        Err(Error::NotAllowed("source does not support removal"))
    }
}
