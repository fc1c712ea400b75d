//! End-of-central-directory records: the 22-byte classic [`EndOfCentralDirectoryRecord`]
//! (EOCD), and the ZIP64 extension pair, [`EndOfCentralDirectory64Locator`]
//! and [`EndOfCentralDirectory64Record`].

use winnow::{
    binary::{le_u16, le_u32, le_u64, length_take},
    combinator::preceded,
    error::{ErrMode, ErrorKind, ParserError},
    seq,
    PResult, Parser, Partial,
};

pub const EOCD_SIGNATURE: &[u8; 4] = b"PK\x05\x06";
pub const EOCD64_LOCATOR_SIGNATURE: &[u8; 4] = b"PK\x06\x07";
pub const EOCD64_RECORD_SIGNATURE: &[u8; 4] = b"PK\x06\x06";

/// The sentinel value a 16-bit field takes when the real value lives in the
/// ZIP64 extension instead.
pub const ZIP16_SENTINEL: u16 = 0xFFFF;
/// The sentinel value a 32-bit field takes when the real value lives in the
/// ZIP64 extension instead.
pub const ZIP32_SENTINEL: u32 = 0xFFFFFFFF;

/// The classic (non-ZIP64) end-of-central-directory record.
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectoryRecord {
    pub disk_nbr: u16,
    pub dir_disk_nbr: u16,
    pub dir_records_this_disk: u16,
    pub directory_records: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectoryRecord {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        preceded(
            EOCD_SIGNATURE,
            seq! {Self {
                disk_nbr: le_u16,
                dir_disk_nbr: le_u16,
                dir_records_this_disk: le_u16,
                directory_records: le_u16,
                directory_size: le_u32,
                directory_offset: le_u32,
                comment: length_take(le_u16).map(|s: &[u8]| s.to_vec()),
            }},
        )
        .parse_next(i)
    }

    /// Whether any field that would indicate ZIP64 is in play is at its
    /// sentinel value.
    pub fn needs_zip64(&self) -> bool {
        self.disk_nbr == ZIP16_SENTINEL
            || self.dir_disk_nbr == ZIP16_SENTINEL
            || self.dir_records_this_disk == ZIP16_SENTINEL
            || self.directory_records == ZIP16_SENTINEL
            || self.directory_size == ZIP32_SENTINEL
            || self.directory_offset == ZIP32_SENTINEL
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put(EOCD_SIGNATURE);
        w.put_u16(self.disk_nbr);
        w.put_u16(self.dir_disk_nbr);
        w.put_u16(self.dir_records_this_disk);
        w.put_u16(self.directory_records);
        w.put_u32(self.directory_size);
        w.put_u32(self.directory_offset);
        w.put_u16(self.comment.len() as u16);
        w.put(&self.comment);
        w.into_vec()
    }

    /// Fixed size of the record with an empty comment.
    pub const MIN_SIZE: usize = 22;
}

/// The ZIP64 end-of-central-directory *locator*: a fixed 20-byte record that
/// immediately precedes the classic EOCD and points at the ZIP64
/// end-of-central-directory record proper.
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDirectory64Locator {
    pub dir_disk_number: u32,
    pub directory_offset: u64,
    pub total_disks: u32,
}

impl EndOfCentralDirectory64Locator {
    pub const SIZE: usize = 20;

    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        preceded(
            EOCD64_LOCATOR_SIGNATURE,
            seq! {Self {
                dir_disk_number: le_u32,
                directory_offset: le_u64,
                total_disks: le_u32,
            }},
        )
        .parse_next(i)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put(EOCD64_LOCATOR_SIGNATURE);
        w.put_u32(self.dir_disk_number);
        w.put_u64(self.directory_offset);
        w.put_u32(self.total_disks);
        w.into_vec()
    }
}

/// The ZIP64 end-of-central-directory record proper: a variable-length
/// extension of the classic EOCD with 64-bit counts/offsets.
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory64Record {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_nbr: u32,
    pub dir_disk_nbr: u32,
    pub dir_records_this_disk: u64,
    pub directory_records: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
}

impl EndOfCentralDirectory64Record {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        preceded(
            EOCD64_RECORD_SIGNATURE,
            |i: &mut Partial<&[u8]>| {
                let size = le_u64(i)?;
                if size < 44 {
                    return Err(ErrMode::from_error_kind(i, ErrorKind::Verify));
                }
                let record = seq! {Self {
                    version_made_by: le_u16,
                    version_needed: le_u16,
                    disk_nbr: le_u32,
                    dir_disk_nbr: le_u32,
                    dir_records_this_disk: le_u64,
                    directory_records: le_u64,
                    directory_size: le_u64,
                    directory_offset: le_u64,
                }}
                .parse_next(i)?;
                // consume any trailing "zip64 extensible data sector" bytes
                let extra_len = size - 44;
                if extra_len > 0 {
                    let _ = winnow::token::take(extra_len).parse_next(i)?;
                }
                Ok(record)
            },
        )
        .parse_next(i)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put(EOCD64_RECORD_SIGNATURE);
        w.put_u64(44); // size of record, excluding signature+size field itself
        w.put_u16(self.version_made_by);
        w.put_u16(self.version_needed);
        w.put_u32(self.disk_nbr);
        w.put_u32(self.dir_disk_nbr);
        w.put_u64(self.dir_records_this_disk);
        w.put_u64(self.directory_records);
        w.put_u64(self.directory_size);
        w.put_u64(self.directory_offset);
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_roundtrip() {
        let rec = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 3,
            directory_records: 3,
            directory_size: 100,
            directory_offset: 200,
            comment: b"hi".to_vec(),
        };
        let bytes = rec.to_bytes();
        let mut input = Partial::new(&bytes[..]);
        let parsed = EndOfCentralDirectoryRecord::parser(&mut input).unwrap();
        assert_eq!(parsed.directory_records, 3);
        assert_eq!(parsed.comment, b"hi");
        assert!(!parsed.needs_zip64());
    }

    #[test]
    fn eocd64_locator_roundtrip() {
        let loc = EndOfCentralDirectory64Locator {
            dir_disk_number: 0,
            directory_offset: 123456,
            total_disks: 1,
        };
        let bytes = loc.to_bytes();
        let mut input = Partial::new(&bytes[..]);
        let parsed = EndOfCentralDirectory64Locator::parser(&mut input).unwrap();
        assert_eq!(parsed.directory_offset, 123456);
    }
}
