//! Winnow parsers (and their write-side counterparts) for every element
//! that makes up a ZIP file: the end-of-central-directory record, local and
//! central directory headers, extra fields, and the unified [`Dirent`] view
//! over the two.
//!
//! Everything in here follows the PKWARE APPNOTE.TXT, plus the WinZip AES
//! extension for encrypted entries.

mod date_time;
mod dirent;
mod eocd;
mod extra;
mod local;
mod method;
mod version;

pub use date_time::{MsdosTimestamp, NtfsTimestamp};
pub use dirent::{Dirent, CENTRAL_DIRECTORY_HEADER_SIGNATURE};
pub use eocd::{
    EndOfCentralDirectory64Locator, EndOfCentralDirectory64Record, EndOfCentralDirectoryRecord,
    EOCD64_LOCATOR_SIGNATURE, EOCD64_RECORD_SIGNATURE, EOCD_SIGNATURE, ZIP16_SENTINEL, ZIP32_SENTINEL,
};
pub use extra::{
    AesStrength, ExtraFieldParseError, ExtraFieldScope, ExtraFieldStore, ExtraRecord, WinZipAesExtraField,
    Zip64ExtraField, ID_INFOZIP_UNICODE_COMMENT, ID_INFOZIP_UNICODE_PATH, ID_WINZIP_AES, ID_ZIP64,
};
pub use local::{gpbf, DataDescriptorRecord, LocalFileHeaderRecord, DATA_DESCRIPTOR_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE};
pub use method::Method;
pub use version::{HostSystem, Version};
