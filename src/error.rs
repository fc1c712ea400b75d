//! All error types used in this crate.
//!
//! The domain/detail split here mirrors libzip's `(code, system_code)` pair:
//! [`Error::Inconsistent`] carries an optional entry index plus an
//! [`InconsistencyDetail`], the way libzip packs `(entry_index << 8) | detail_kind`
//! into the system code of an `INCONS` error.

use crate::format::Method;

use super::encoding;

/// Any zip-related error, from invalid archives to encoding problems to
/// archive-state misuse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a valid zip file, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this crate
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, Shift-JIS, or any problem encountered while decoding text in general.
    #[error("encoding: {0:?}")]
    Encoding(#[from] encoding::DecodingError),

    /// I/O-related error, including errors bubbled up from a [`crate::source::Source`].
    #[error("io: {0}")]
    IO(#[from] std::io::Error),

    /// Decompression-related error
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that failed
        method: Method,
        /// Additional information
        msg: String,
    },

    /// Could not read as a zip because size could not be determined
    #[error("size must be known to open zip file")]
    UnknownSize,

    /// The archive, or one of its entries, is not self-consistent.
    #[error("inconsistent archive{}: {detail}", entry.map(|e| format!(" (entry {e})")).unwrap_or_default())]
    Inconsistent {
        /// The entry index this inconsistency was found at, if any.
        entry: Option<usize>,
        /// What, specifically, was inconsistent.
        detail: InconsistencyDetail,
    },

    /// A mutating call was made on a read-only archive.
    #[error("archive is read-only")]
    ReadOnly,

    /// The requested operation is not allowed in the archive's current state.
    #[error("not allowed: {0}")]
    NotAllowed(&'static str),

    /// `file_add`/`file_rename` target a name that is already in use.
    #[error("entry already exists: {0:?}")]
    EntryExists(String),

    /// The requested entry index does not exist.
    #[error("no such entry: {0}")]
    NoSuchEntry(usize),

    /// The entry was marked deleted and can no longer be read.
    #[error("entry has been deleted")]
    Deleted,

    /// The archive (or the source backing it) has been closed or discarded.
    #[error("archive has been closed")]
    ZipClosed,

    /// A password is required to read this entry but none was supplied.
    #[error("password required")]
    NoPassword,

    /// The supplied password did not decrypt the entry correctly.
    #[error("wrong password")]
    WrongPassword,

    /// `cancel_hook` returned true mid-commit; the rewrite was rolled back.
    #[error("commit cancelled")]
    Cancelled,

    /// A source reported a size/CRC that didn't match what was actually written or read.
    #[error("data length mismatch: {0}")]
    DataLength(String),

    /// A source is already in use (open_count > 0) for an operation that requires exclusivity.
    #[error("source in use")]
    InUse,
}

impl Error {
    /// Create a new error indicating that the given method is not supported.
    pub fn method_not_supported(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotSupported(method))
    }

    /// Create a new error indicating that the given method is not enabled.
    pub fn method_not_enabled(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotEnabled(method))
    }

    /// Create an inconsistency error not tied to a specific entry.
    pub fn inconsistent(detail: InconsistencyDetail) -> Self {
        Self::Inconsistent { entry: None, detail }
    }

    /// Create an inconsistency error tied to a specific entry index.
    pub fn inconsistent_at(entry: usize, detail: InconsistencyDetail) -> Self {
        Self::Inconsistent { entry: Some(entry), detail }
    }
}

/// Some part of the zip format is not supported by this crate.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedError {
    /// The compression method is not supported.
    #[error("compression method not supported: {0:?}")]
    MethodNotSupported(Method),

    /// The compression method is supported, but not enabled in this build.
    #[error("compression method supported, but not enabled in this build: {0:?}")]
    MethodNotEnabled(Method),

    /// The zip file uses a version of LZMA that is not supported.
    #[error("only LZMA2.0 is supported, found LZMA{minor}.{major}")]
    LzmaVersionUnsupported {
        /// major version read from LZMA properties header, cf. appnote 5.8.8
        major: u8,
        /// minor version read from LZMA properties header, cf. appnote 5.8.8
        minor: u8,
    },

    /// The LZMA properties header is not the expected size.
    #[error("LZMA properties header wrong size: expected {expected} bytes, got {actual} bytes")]
    LzmaPropertiesHeaderWrongSize {
        /// expected size in bytes
        expected: u16,
        /// actual size in bytes, read from a u16, cf. appnote 5.8.8
        actual: u16,
    },

    /// Multi-disk (spanned) archives are not supported.
    #[error("multi-disk archives are not supported")]
    MultiDisk,

    /// This crate was not built with encryption support (the `aes-crypto` feature is off).
    #[error("encryption support not enabled in this build")]
    EncryptionNotEnabled,

    /// Encrypting entries with this method is not supported for writing.
    #[error("encryption method not supported for writing")]
    EncryptionMethodNotSupported,
}

/// Specific zip format errors, mostly due to invalid zip archives but that could also stem from
/// implementation shortcomings.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The end of central directory record was not found.
    ///
    /// This usually indicates that the file being read is not a zip archive.
    #[error("end of central directory record not found")]
    DirectoryEndSignatureNotFound,

    /// The zip64 end of central directory record could not be parsed.
    ///
    /// This is only returned when a zip64 end of central directory *locator* was found,
    /// so the archive should be zip64, but isn't.
    #[error("zip64 end of central directory record not found")]
    Directory64EndRecordInvalid,

    /// Corrupted/partial zip file: the offset we found for the central directory
    /// points outside of the current file.
    #[error("directory offset points outside of file")]
    DirectoryOffsetPointsOutsideFile,

    /// The central record is corrupted somewhat.
    ///
    /// This can happen when the end of central directory record advertises
    /// a certain number of files, but we weren't able to read the same number of central directory
    /// headers.
    #[error("invalid central record: expected to read {expected} files, got {actual}")]
    InvalidCentralRecord {
        /// expected number of files
        expected: u64,
        /// actual number of files
        actual: u64,
    },

    /// The header offset of an entry is invalid.
    ///
    /// This can indicate an invalid zip archive, or an invalid user-provided global offset
    #[error("invalid header offset")]
    InvalidHeaderOffset,

    /// End of central directory record claims an impossible number of files.
    ///
    /// Each entry takes a minimum amount of size, so if the overall archive size is smaller than
    /// claimed_records_count * minimum_entry_size, we know it's not a valid zip file.
    #[error("impossible number of files: claims to have {claimed_records_count}, but zip size is {zip_size}")]
    ImpossibleNumberOfFiles {
        /// number of files claimed in the end of central directory record
        claimed_records_count: u64,
        /// total size of the zip file
        zip_size: u64,
    },

    /// The local file header (before the file data) could not be parsed correctly.
    #[error("invalid local file header")]
    InvalidLocalHeader,

    /// The data descriptor (after the file data) could not be parsed correctly.
    #[error("invalid data descriptor")]
    InvalidDataDescriptor,

    /// The uncompressed size didn't match
    #[error("uncompressed size didn't match: expected {expected}, got {actual}")]
    WrongSize {
        /// expected size in bytes (from the local header, data descriptor, etc.)
        expected: u64,
        /// actual size in bytes (from decompressing the entry)
        actual: u64,
    },

    /// The CRC-32 checksum didn't match.
    #[error("checksum didn't match: expected {expected:x?}, got {actual:x?}")]
    WrongChecksum {
        /// expected checksum (from the data descriptor, etc.)
        expected: u32,
        /// actual checksum (from decompressing the entry)
        actual: u32,
    },

    /// The ZIP64 extra field is malformed: wrong size, or residual bytes that
    /// don't match the full 28-byte form (APPNOTE 4.5.3).
    #[error("invalid zip64 extra field")]
    InvalidZip64ExtraField,
}

/// The specific consistency failures `CHECKCONS` (and targeted writer-side
/// checks) can detect, packed alongside an optional entry index in
/// [`Error::Inconsistent`] — this is the Rust analog of libzip's packed
/// `(entry_index << 8) | detail_kind` system code for `ZIP_ER_INCONS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InconsistencyDetail {
    /// The central directory overlaps the EOCD record.
    #[error("central directory overlaps end-of-central-directory record")]
    CdirOverlapsEocd,
    /// The central directory's size doesn't match what the EOCD recorded.
    #[error("central directory length does not match EOCD record")]
    CdirLengthInvalid,
    /// The EOCD's entry count doesn't match the number of headers actually present.
    #[error("central directory entry count does not match EOCD record")]
    CdirWrongEntriesCount,
    /// The EOCD comment-length field doesn't agree with the trailing bytes.
    #[error("comment length field does not match trailing bytes")]
    CommentLengthInvalid,
    /// A local header field disagreed with the corresponding central entry.
    #[error("local file header does not match central directory entry")]
    EntryHeaderMismatch,
    /// Trailing garbage after an extra-field list, beyond the 3-byte APK tolerance.
    #[error("extra field list has trailing garbage")]
    EfTrailingGarbage,
    /// A declared extra-field record length overruns the list.
    #[error("extra field declared length overruns its container")]
    InvalidEfLength,
    /// A requested window extends past the representable offset range.
    #[error("central directory entry describes an invalid (too large) region")]
    CdirEntryInvalid,
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IO(e) => e,
            e => std::io::Error::other(e),
        }
    }
}
