#![warn(missing_docs)]

//! zipforge is a transactional reader/writer for ZIP archives: open an
//! archive, stage renames/additions/replacements/deletions against it, and
//! `commit` them atomically (or `discard` them) — the way libzip's
//! `zip_t`/`zip_source_t` pair works, rebuilt around a `Box<dyn Source>`
//! trait object instead of libzip's command-dispatch callback.
//!
//! It understands PKWARE's APPNOTE format including ZIP64, Info-ZIP UTF-8
//! name/comment extra fields, and both traditional (ZipCrypto) and WinZip
//! AES encryption, and can normalize an archive into TorrentZip canonical
//! form.
//!
//! The crate is organized around the data model its archives share:
//!
//!   * [`format`] — wire-level records (local/central headers, EOCD(+64),
//!     extra fields, dates, versions, methods) and the unified [`format::Dirent`]
//!     built from them.
//!   * [`source`] — the layered byte-source abstraction ([`source::Source`])
//!     that every entry's data flows through: files, in-memory buffers,
//!     windows onto another source's extent, and the compression/crypto
//!     codecs in [`source::codec`].
//!   * [`finder`] — locates and disambiguates the end-of-central-directory
//!     record (and its ZIP64 extension) in a byte stream.
//!   * [`name_index`] — the name-to-entry lookup every mutator goes through.
//!   * [`entry`] and [`archive`] — the per-entry change-set and the archive
//!     state machine that ties everything together.
//!   * [`encoding`] — CP437/UTF-8/Shift-JIS filename and comment decoding.
//!   * [`error`] — the error types every fallible operation in this crate
//!     returns.

pub mod archive;
pub mod buffer;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod finder;
pub mod format;
pub mod name_index;
pub mod source;

pub use archive::{Archive, OpenFlags};
pub use entry::{Entry, PendingEncryption};
pub use error::Error;
