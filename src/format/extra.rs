//! Extra-field records (C5): the variable-length `(id, size, data)` list that
//! trails both local and central file headers.
//!
//! Most extra-field IDs (NTFS timestamps, Unix UID/GID, info-zip timestamps,
//! and anything this crate doesn't have a specific use for) are kept
//! completely opaque: parsed into an [`ExtraRecord`] and re-serialized
//! byte-for-byte on write. Only four IDs are "internal" — this crate
//! interprets their payload directly into typed [`crate::format::Dirent`]
//! fields rather than storing them as opaque records, and regenerates their
//! bytes from those fields at write time:
//!
//! - `0x0001` ZIP64 extended information
//! - `0x6375` / `0x7075` Info-ZIP UTF-8 path/comment
//! - `0x9901` WinZip AES encryption
//!
//! This mirrors the data model's "Extra-field store" entity: order is
//! preserved for round-tripping, and local/central copies of the same ID are
//! tracked independently since zip writers are not required to keep them in
//! sync.

use winnow::{
    binary::{le_u16, length_take},
    combinator::repeat,
    PResult, Parser, Partial,
};

/// The four extra-field IDs this crate interprets itself rather than storing
/// opaquely.
pub const ID_ZIP64: u16 = 0x0001;
pub const ID_INFOZIP_UNICODE_COMMENT: u16 = 0x6375;
pub const ID_INFOZIP_UNICODE_PATH: u16 = 0x7075;
pub const ID_WINZIP_AES: u16 = 0x9901;

/// Which header an extra-field record was read from (or will be written to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFieldScope {
    Local,
    Central,
}

/// One `(id, data)` pair from an extra-field list, plus which header it came
/// from.
#[derive(Debug, Clone)]
pub struct ExtraRecord {
    pub id: u16,
    pub scope: ExtraFieldScope,
    pub data: Vec<u8>,
}

fn record_parser(scope: ExtraFieldScope) -> impl FnMut(&mut Partial<&[u8]>) -> PResult<ExtraRecord> {
    move |i: &mut Partial<&[u8]>| {
        let id = le_u16(i)?;
        let data = length_take(le_u16).parse_next(i)?;
        Ok(ExtraRecord { id, scope, data: data.to_vec() })
    }
}

/// Why [`ExtraFieldStore::parse`] rejected a blob, mirroring spec.md's
/// `INCONS`/`EF_TRAILING_GARBAGE` vs `INVALID_EF_LENGTH` distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFieldParseError {
    /// A record's declared length reaches past the end of the blob.
    Overrun,
    /// More than 3 bytes (or non-zero bytes) were left over after the last
    /// complete record — beyond the tolerated Android-APK zero-padding tail.
    TrailingGarbage,
}

/// An ordered collection of opaque extra-field records, tagged by which
/// header (local/central) they were observed in.
///
/// Internal IDs ([`ID_ZIP64`], [`ID_INFOZIP_UNICODE_PATH`],
/// [`ID_INFOZIP_UNICODE_COMMENT`], [`ID_WINZIP_AES`]) are excluded from this
/// store once [`crate::format::Dirent`] parsing has consumed them — see
/// [`ExtraFieldStore::take_internal`].
#[derive(Debug, Clone, Default)]
pub struct ExtraFieldStore {
    records: Vec<ExtraRecord>,
}

impl ExtraFieldStore {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Parse a raw extra-field blob (as it appears trailing a local or
    /// central header) into a store tagging every record with `scope`.
    ///
    /// A declared record length that reaches past the end of `data` is
    /// [`ExtraFieldParseError::Overrun`]. Once every complete record has
    /// been consumed, up to 3 trailing zero bytes are tolerated (some
    /// packers, notably certain Android `.apk` zips, pad with a short
    /// zeroed tail); anything else left over is
    /// [`ExtraFieldParseError::TrailingGarbage`].
    pub fn parse(data: &[u8], scope: ExtraFieldScope) -> Result<Self, ExtraFieldParseError> {
        let mut records = Vec::new();
        let mut rest = data;
        while rest.len() >= 4 {
            let declared_len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            if 4 + declared_len > rest.len() {
                return Err(ExtraFieldParseError::Overrun);
            }
            let mut input = Partial::new(rest);
            let rec = record_parser(scope)
                .parse_next(&mut input)
                .map_err(|_| ExtraFieldParseError::Overrun)?;
            let consumed = rest.len() - input.len();
            rest = &rest[consumed..];
            records.push(rec);
        }
        if rest.len() > 3 || rest.iter().any(|&b| b != 0) {
            return Err(ExtraFieldParseError::TrailingGarbage);
        }
        Ok(Self { records })
    }

    /// Remove and return every record matching `id` (there may legitimately
    /// be both a local- and central-scoped copy).
    pub fn take_internal(&mut self, id: u16) -> Vec<ExtraRecord> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            self.records.drain(..).partition(|r| r.id == id);
        self.records = kept;
        taken
    }

    /// Look up the first record with the given `id` in the given `scope`.
    pub fn get(&self, id: u16, scope: ExtraFieldScope) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|r| r.id == id && r.scope == scope)
            .map(|r| r.data.as_slice())
    }

    /// Append an opaque record (used when round-tripping an unrecognized ID
    /// or re-adding a regenerated internal record before serialization).
    pub fn push(&mut self, id: u16, scope: ExtraFieldScope, data: Vec<u8>) {
        self.records.push(ExtraRecord { id, scope, data });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtraRecord> {
        self.records.iter()
    }

    /// Serialize every record matching `scope`, in original order, into a
    /// single extra-field blob.
    pub fn to_bytes(&self, scope: ExtraFieldScope) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        for rec in self.records.iter().filter(|r| r.scope == scope) {
            w.put_u16(rec.id);
            w.put_u16(rec.data.len() as u16);
            w.put(&rec.data);
        }
        w.into_vec()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The ZIP64 extended-information payload (`id = 0x0001`).
///
/// Per APPNOTE 4.5.3, only the fields that are themselves at their 32-bit
/// sentinel value in the fixed-size header are present here, *in order*
/// (uncompressed size, compressed size, local header offset, disk number).
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Parse the payload, given which fixed-header fields were sentinel
    /// (`0xFFFFFFFF`/`0xFFFF`) and therefore expected to be present here, in
    /// APPNOTE order.
    pub fn parse(
        data: &[u8],
        need_uncompressed: bool,
        need_compressed: bool,
        need_offset: bool,
        need_disk: bool,
    ) -> Option<Self> {
        let mut i = Partial::new(data);
        let mut out = Self::default();
        if need_uncompressed {
            out.uncompressed_size = Some(le_u64(&mut i).ok()?);
        }
        if need_compressed {
            out.compressed_size = Some(le_u64(&mut i).ok()?);
        }
        if need_offset {
            out.header_offset = Some(le_u64(&mut i).ok()?);
        }
        if need_disk {
            out.disk_start = Some(le_u32(&mut i).ok()?);
        }
        Some(out)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        if let Some(v) = self.uncompressed_size {
            w.put_u64(v);
        }
        if let Some(v) = self.compressed_size {
            w.put_u64(v);
        }
        if let Some(v) = self.header_offset {
            w.put_u64(v);
        }
        if let Some(v) = self.disk_start {
            w.put_u32(v);
        }
        w.into_vec()
    }
}

use winnow::binary::{le_u32, le_u64};

/// The WinZip AES extra-field payload (`id = 0x9901`, APPNOTE-adjacent,
/// documented by the WinZip AES spec rather than APPNOTE itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinZipAesExtraField {
    pub vendor_version: u16,
    pub vendor_id: [u8; 2],
    pub strength: AesStrength,
    /// The compression method that was swapped out for
    /// [`crate::format::Method::AEX`] in the fixed-size header.
    pub real_method: u16,
}

/// AES key length used by a WinZip-AES-encrypted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        self.key_len() / 2
    }
}

impl TryFrom<u8> for AesStrength {
    type Error = ();
    fn try_from(v: u8) -> Result<Self, ()> {
        match v {
            1 => Ok(Self::Aes128),
            2 => Ok(Self::Aes192),
            3 => Ok(Self::Aes256),
            _ => Err(()),
        }
    }
}

impl WinZipAesExtraField {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != 7 {
            return None;
        }
        let vendor_version = u16::from_le_bytes([data[0], data[1]]);
        let vendor_id = [data[2], data[3]];
        let strength = AesStrength::try_from(data[4]).ok()?;
        let real_method = u16::from_le_bytes([data[5], data[6]]);
        Some(Self { vendor_version, vendor_id, strength, real_method })
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put_u16(self.vendor_version);
        w.put(&self.vendor_id);
        w.put_u8(match self.strength {
            AesStrength::Aes128 => 1,
            AesStrength::Aes192 => 2,
            AesStrength::Aes256 => 3,
        });
        w.put_u16(self.real_method);
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_store() {
        let mut w = crate::buffer::Writer::new();
        w.put_u16(0x1234);
        w.put_u16(2);
        w.put(&[0xAA, 0xBB]);
        let bytes = w.into_vec();
        let store = ExtraFieldStore::parse(&bytes, ExtraFieldScope::Central).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0x1234, ExtraFieldScope::Central), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn tolerates_short_trailing_garbage() {
        let mut w = crate::buffer::Writer::new();
        w.put_u16(0x1234);
        w.put_u16(0);
        w.put(&[0, 0]); // 2 trailing garbage bytes, within tolerance
        let bytes = w.into_vec();
        let store = ExtraFieldStore::parse(&bytes, ExtraFieldScope::Local).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn winzip_aes_roundtrip() {
        let field = WinZipAesExtraField {
            vendor_version: 2,
            vendor_id: *b"AE",
            strength: AesStrength::Aes256,
            real_method: 8,
        };
        let bytes = field.to_bytes();
        let back = WinZipAesExtraField::parse(&bytes).unwrap();
        assert_eq!(field, back);
    }
}
