//! The unified directory-entry view (C6): central and local headers carry
//! mostly the same fields, so this crate parses both into one [`Dirent`]
//! struct rather than the two incompatible structs a literal field-for-field
//! port would produce. Central-only fields (comment, disk/attrs, the local
//! header back-pointer) are simply absent (zeroed) on a local-only parse.
//!
//! Parsing a dirent also resolves the three "internal" extra-field
//! interactions APPNOTE describes:
//!
//! - ZIP64 (`0x0001`): any fixed-size field left at its 16/32-bit sentinel
//!   is expanded from the ZIP64 payload, in APPNOTE's fixed field order.
//! - Info-ZIP UTF-8 (`0x6375`/`0x7075`): if present and its embedded CRC-32
//!   matches the raw name/comment bytes, [`crate::encoding::EncodedString`]
//!   is rebuilt from the UTF-8 payload rather than the guessed encoding.
//! - WinZip AES (`0x9901`): if present, the method field (which reads back
//!   as [`crate::format::Method::AEX`] `== 99`) is swapped for the real
//!   method carried inside the extra field, and encryption parameters are
//!   captured in [`Dirent::aes`].

use winnow::{
    binary::{le_u16, le_u32},
    combinator::preceded,
    PResult, Parser, Partial,
};

use crate::buffer::Writer;
use crate::encoding::{Encoding, EncodedString};
use crate::error::{Error, FormatError, InconsistencyDetail};

use super::{
    date_time::MsdosTimestamp,
    extra::{
        ExtraFieldParseError, ExtraFieldScope, ExtraFieldStore, WinZipAesExtraField, Zip64ExtraField,
        ID_INFOZIP_UNICODE_COMMENT, ID_INFOZIP_UNICODE_PATH, ID_WINZIP_AES, ID_ZIP64,
    },
    local::gpbf,
    method::Method,
    version::Version,
};

fn extra_field_parse_error(e: ExtraFieldParseError) -> Error {
    match e {
        ExtraFieldParseError::Overrun => Error::inconsistent(InconsistencyDetail::InvalidEfLength),
        ExtraFieldParseError::TrailingGarbage => Error::inconsistent(InconsistencyDetail::EfTrailingGarbage),
    }
}

pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: &[u8; 4] = b"PK\x01\x02";

/// A fully-resolved directory entry: the union of what a central directory
/// header and a local file header describe, after ZIP64 expansion, UTF-8
/// promotion, and WinZip-AES unwrapping.
#[derive(Debug, Clone)]
pub struct Dirent {
    pub version_made_by: Version,
    pub version_needed: Version,
    pub flags: u16,
    pub method: Method,
    pub modified: MsdosTimestamp,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Central-only: which disk the local header lives on.
    pub disk_start: u32,
    /// Central-only.
    pub internal_attrs: u16,
    /// Central-only: typically encodes Unix permission bits in the high 16 bits.
    pub external_attrs: u32,
    /// Central-only: byte offset of the local header, relative to the start
    /// of the archive (not the start of the file, if data was prepended).
    pub header_offset: u64,
    pub name: EncodedString,
    /// Central-only; empty on a local-only parse.
    pub comment: EncodedString,
    /// Everything left over once the internal IDs have been extracted.
    pub extra: ExtraFieldStore,
    pub aes: Option<WinZipAesExtraField>,
}

impl Dirent {
    pub fn is_encrypted(&self) -> bool {
        self.flags & gpbf::ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & gpbf::DATA_DESCRIPTOR != 0
    }

    pub fn utf8_flag_set(&self) -> bool {
        self.flags & gpbf::UTF8 != 0
    }

    pub fn needs_zip64(&self) -> bool {
        self.uncompressed_size >= u32::MAX as u64
            || self.compressed_size >= u32::MAX as u64
            || self.header_offset >= u32::MAX as u64
            || self.version_needed.needs_zip64()
    }

    /// Parse a central directory file header at the start of `data`,
    /// returning the entry and the number of bytes consumed.
    pub fn parse_central(data: &[u8], archive_encoding: Encoding) -> Result<(Self, usize), Error> {
        let mut input = Partial::new(data);
        let raw = RawCentral::parser(&mut input)
            .map_err(|_| Error::Format(FormatError::InvalidCentralRecord { expected: 1, actual: 0 }))?;
        let consumed = data.len() - input.len();

        let mut extra = ExtraFieldStore::parse(&raw.extra, ExtraFieldScope::Central)
            .map_err(extra_field_parse_error)?;

        let mut uncompressed_size = raw.uncompressed_size as u64;
        let mut compressed_size = raw.compressed_size as u64;
        let mut header_offset = raw.header_offset as u64;
        let mut disk_start = raw.disk_start as u32;

        for rec in extra.take_internal(ID_ZIP64) {
            if let Some(z64) = Zip64ExtraField::parse(
                &rec.data,
                raw.uncompressed_size == super::eocd::ZIP32_SENTINEL,
                raw.compressed_size == super::eocd::ZIP32_SENTINEL,
                raw.header_offset == super::eocd::ZIP32_SENTINEL,
                raw.disk_start == super::eocd::ZIP16_SENTINEL as u16,
            ) {
                if let Some(v) = z64.uncompressed_size {
                    uncompressed_size = v;
                }
                if let Some(v) = z64.compressed_size {
                    compressed_size = v;
                }
                if let Some(v) = z64.header_offset {
                    header_offset = v;
                }
                if let Some(v) = z64.disk_start {
                    disk_start = v;
                }
            }
        }

        let utf8_flag = raw.flags & gpbf::UTF8 != 0;
        let name = resolve_name(&mut extra, ID_INFOZIP_UNICODE_PATH, raw.name.clone(), archive_encoding, utf8_flag);
        let comment = resolve_name(&mut extra, ID_INFOZIP_UNICODE_COMMENT, raw.comment.clone(), archive_encoding, utf8_flag);

        let (method, aes) = resolve_aes(&mut extra, raw.method);

        Ok((
            Self {
                version_made_by: raw.version_made_by,
                version_needed: raw.version_needed,
                flags: raw.flags,
                method,
                modified: raw.modified,
                crc32: raw.crc32,
                compressed_size,
                uncompressed_size,
                disk_start,
                internal_attrs: raw.internal_attrs,
                external_attrs: raw.external_attrs,
                header_offset,
                name,
                comment,
                extra,
                aes,
            },
            consumed,
        ))
    }

    /// Parse a local file header. Central-only fields are left at their
    /// defaults (empty comment, zero disk/attrs/offset).
    pub fn parse_local(data: &[u8], archive_encoding: Encoding) -> Result<(Self, usize), Error> {
        let mut input = Partial::new(data);
        let raw = super::local::LocalFileHeaderRecord::parser(&mut input)
            .map_err(|_| Error::Format(FormatError::InvalidLocalHeader))?;
        let consumed = data.len() - input.len();

        let mut extra = ExtraFieldStore::parse(&raw.extra, ExtraFieldScope::Local)
            .map_err(extra_field_parse_error)?;

        let mut uncompressed_size = raw.uncompressed_size as u64;
        let mut compressed_size = raw.compressed_size as u64;
        for rec in extra.take_internal(ID_ZIP64) {
            if let Some(z64) = Zip64ExtraField::parse(
                &rec.data,
                raw.uncompressed_size == super::eocd::ZIP32_SENTINEL,
                raw.compressed_size == super::eocd::ZIP32_SENTINEL,
                false,
                false,
            ) {
                if let Some(v) = z64.uncompressed_size {
                    uncompressed_size = v;
                }
                if let Some(v) = z64.compressed_size {
                    compressed_size = v;
                }
            }
        }

        let utf8_flag = raw.flags & gpbf::UTF8 != 0;
        let name = resolve_name(&mut extra, ID_INFOZIP_UNICODE_PATH, raw.name.clone(), archive_encoding, utf8_flag);
        let (method, aes) = resolve_aes(&mut extra, raw.method);

        Ok((
            Self {
                version_made_by: Version::default(),
                version_needed: raw.reader_version,
                flags: raw.flags,
                method,
                modified: raw.modified,
                crc32: raw.crc32,
                compressed_size,
                uncompressed_size,
                disk_start: 0,
                internal_attrs: 0,
                external_attrs: 0,
                header_offset: 0,
                name,
                comment: EncodedString::from_utf8_override(Vec::new(), String::new()),
                extra,
                aes,
            },
            consumed,
        ))
    }

    /// Serialize as a central directory file header.
    pub fn to_central_bytes(&self, force_zip64: bool) -> Vec<u8> {
        let needs64 = force_zip64 || self.needs_zip64();
        let mut extra = self.extra.clone();
        self.reinsert_internal(&mut extra, ExtraFieldScope::Central, needs64);

        let mut w = Writer::new();
        w.put(CENTRAL_DIRECTORY_HEADER_SIGNATURE);
        w.put_u16(self.version_made_by.to_u16());
        w.put_u16(self.version_needed.to_u16());
        w.put_u16(self.flags);
        w.put_u16(self.method.to_u16());
        w.put_u16(self.modified.time);
        w.put_u16(self.modified.date);
        w.put_u32(self.crc32);
        w.put_u32(if needs64 { super::eocd::ZIP32_SENTINEL } else { self.compressed_size as u32 });
        w.put_u32(if needs64 { super::eocd::ZIP32_SENTINEL } else { self.uncompressed_size as u32 });
        w.put_u16(self.name.raw().len() as u16);
        let extra_bytes = extra.to_bytes(ExtraFieldScope::Central);
        w.put_u16(extra_bytes.len() as u16);
        w.put_u16(self.comment.raw().len() as u16);
        w.put_u16(if needs64 { super::eocd::ZIP16_SENTINEL } else { self.disk_start as u16 });
        w.put_u16(self.internal_attrs);
        w.put_u32(self.external_attrs);
        w.put_u32(if needs64 { super::eocd::ZIP32_SENTINEL } else { self.header_offset as u32 });
        w.put(self.name.raw());
        w.put(&extra_bytes);
        w.put(self.comment.raw());
        w.into_vec()
    }

    /// Serialize as a local file header.
    pub fn to_local_bytes(&self, force_zip64: bool) -> Vec<u8> {
        let needs64 = force_zip64 || self.needs_zip64();
        let mut extra = self.extra.clone();
        self.reinsert_internal(&mut extra, ExtraFieldScope::Local, needs64);

        let rec = super::local::LocalFileHeaderRecord {
            reader_version: self.version_needed,
            flags: self.flags,
            method: self.method.to_u16(),
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: if needs64 { super::eocd::ZIP32_SENTINEL } else { self.compressed_size as u32 },
            uncompressed_size: if needs64 { super::eocd::ZIP32_SENTINEL } else { self.uncompressed_size as u32 },
            name: self.name.raw().to_vec(),
            extra: extra.to_bytes(ExtraFieldScope::Local),
        };
        rec.to_bytes()
    }

    fn reinsert_internal(&self, extra: &mut ExtraFieldStore, scope: ExtraFieldScope, needs64: bool) {
        if needs64 {
            let z64 = Zip64ExtraField {
                uncompressed_size: Some(self.uncompressed_size),
                compressed_size: Some(self.compressed_size),
                header_offset: if scope == ExtraFieldScope::Central { Some(self.header_offset) } else { None },
                disk_start: None,
            };
            extra.push(ID_ZIP64, scope, z64.to_bytes());
        }
        if let Some(aes) = self.aes {
            extra.push(ID_WINZIP_AES, scope, aes.to_bytes());
        }
    }
}

/// The fixed-size (plus raw variable-length) portion of a central directory
/// file header, before ZIP64/UTF-8/AES interpretation.
struct RawCentral {
    version_made_by: Version,
    version_needed: Version,
    flags: u16,
    method: u16,
    modified: MsdosTimestamp,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    disk_start: u16,
    internal_attrs: u16,
    external_attrs: u32,
    header_offset: u32,
    name: Vec<u8>,
    extra: Vec<u8>,
    comment: Vec<u8>,
}

impl RawCentral {
    fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        preceded(CENTRAL_DIRECTORY_HEADER_SIGNATURE, |i: &mut Partial<&[u8]>| {
            let version_made_by = Version::parser(i)?;
            let version_needed = Version::parser(i)?;
            let flags = le_u16(i)?;
            let method = le_u16(i)?;
            let modified = MsdosTimestamp::parser(i)?;
            let crc32 = le_u32(i)?;
            let compressed_size = le_u32(i)?;
            let uncompressed_size = le_u32(i)?;
            let name_len = le_u16(i)?;
            let extra_len = le_u16(i)?;
            let comment_len = le_u16(i)?;
            let disk_start = le_u16(i)?;
            let internal_attrs = le_u16(i)?;
            let external_attrs = le_u32(i)?;
            let header_offset = le_u32(i)?;
            let name = winnow::token::take(name_len).parse_next(i)?.to_vec();
            let extra = winnow::token::take(extra_len).parse_next(i)?.to_vec();
            let comment = winnow::token::take(comment_len).parse_next(i)?.to_vec();
            Ok(Self {
                version_made_by,
                version_needed,
                flags,
                method,
                modified,
                crc32,
                compressed_size,
                uncompressed_size,
                disk_start,
                internal_attrs,
                external_attrs,
                header_offset,
                name,
                extra,
                comment,
            })
        })
        .parse_next(i)
    }
}

fn resolve_name(
    extra: &mut ExtraFieldStore,
    unicode_id: u16,
    raw: Vec<u8>,
    archive_encoding: Encoding,
    utf8_flag: bool,
) -> EncodedString {
    for rec in extra.take_internal(unicode_id) {
        if rec.data.len() < 5 {
            continue;
        }
        let crc = u32::from_le_bytes([rec.data[1], rec.data[2], rec.data[3], rec.data[4]]);
        if crc == crc32fast::hash(&raw) {
            if let Ok(utf8) = std::str::from_utf8(&rec.data[5..]) {
                return EncodedString::from_utf8_override(raw, utf8.to_string());
            }
        }
    }
    EncodedString::new(raw, archive_encoding, utf8_flag)
}

fn resolve_aes(extra: &mut ExtraFieldStore, raw_method: u16) -> (Method, Option<WinZipAesExtraField>) {
    if raw_method != Method::AEX {
        return (Method::from(raw_method), None);
    }
    for rec in extra.take_internal(ID_WINZIP_AES) {
        if let Some(aes) = WinZipAesExtraField::parse(&rec.data) {
            return (Method::from(aes.real_method), Some(aes));
        }
    }
    (Method::from(raw_method), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_central(name: &[u8], method: u16) -> Vec<u8> {
        let mut w = Writer::new();
        w.put(CENTRAL_DIRECTORY_HEADER_SIGNATURE);
        w.put_u16(Version::default().to_u16());
        w.put_u16(Version::default().to_u16());
        w.put_u16(0);
        w.put_u16(method);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0xdeadbeef);
        w.put_u32(10);
        w.put_u32(20);
        w.put_u16(name.len() as u16);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u16(0);
        w.put_u32(0);
        w.put_u32(1234);
        w.put(name);
        w.into_vec()
    }

    #[test]
    fn needs_zip64_is_exact_at_the_4gib_boundary() {
        let bytes = sample_central(b"a.bin", 0);
        let (mut dirent, _) = Dirent::parse_central(&bytes, Encoding::Utf8).unwrap();

        dirent.uncompressed_size = u32::MAX as u64 - 1;
        assert!(!dirent.needs_zip64());

        dirent.uncompressed_size = u32::MAX as u64;
        assert!(dirent.needs_zip64());
    }

    #[test]
    fn parse_central_roundtrip() {
        let bytes = sample_central(b"hello.txt", 8);
        let (dirent, consumed) = Dirent::parse_central(&bytes, Encoding::Utf8).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(dirent.name.as_str(), "hello.txt");
        assert_eq!(dirent.method, Method::Deflate);
        assert_eq!(dirent.header_offset, 1234);
    }

    #[test]
    fn central_to_bytes_roundtrip() {
        let bytes = sample_central(b"a.bin", 0);
        let (dirent, _) = Dirent::parse_central(&bytes, Encoding::Utf8).unwrap();
        let out = dirent.to_central_bytes(false);
        let (dirent2, _) = Dirent::parse_central(&out, Encoding::Utf8).unwrap();
        assert_eq!(dirent2.name.as_str(), "a.bin");
        assert_eq!(dirent2.header_offset, dirent.header_offset);
    }
}
