//! The local file header that precedes every entry's data, and the optional
//! data descriptor that can follow it when sizes/CRC were unknown at the
//! time the header was written (general-purpose bit 3).

use winnow::{
    binary::{le_u16, le_u32, length_take},
    combinator::{opt, preceded},
    seq,
    PResult, Parser, Partial,
};

use super::{date_time::MsdosTimestamp, version::Version};

pub const LOCAL_FILE_HEADER_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8; 4] = b"PK\x07\x08";

/// General-purpose bit flags, APPNOTE 4.4.4.
pub mod gpbf {
    pub const ENCRYPTED: u16 = 1 << 0;
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    pub const STRONG_ENCRYPTION: u16 = 1 << 6;
    pub const UTF8: u16 = 1 << 11;
}

/// The fixed-size portion of a local file header, plus its raw variable
/// name/extra bytes (interpretation into a full [`crate::format::Dirent`]
/// happens one level up, since central and local headers share most of
/// that logic).
#[derive(Debug, Clone)]
pub struct LocalFileHeaderRecord {
    /// version needed to extract
    pub reader_version: Version,
    /// general purpose bit flag
    pub flags: u16,
    /// compression method
    pub method: u16,
    /// last mod file datetime
    pub modified: MsdosTimestamp,
    /// crc-32
    pub crc32: u32,
    /// compressed size
    pub compressed_size: u32,
    /// uncompressed size
    pub uncompressed_size: u32,
    /// file name, raw bytes
    pub name: Vec<u8>,
    /// extra field, raw bytes
    pub extra: Vec<u8>,
}

impl LocalFileHeaderRecord {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        preceded(
            LOCAL_FILE_HEADER_SIGNATURE,
            seq! {Self {
                reader_version: Version::parser,
                flags: le_u16,
                method: le_u16,
                modified: MsdosTimestamp::parser,
                crc32: le_u32,
                compressed_size: le_u32,
                uncompressed_size: le_u32,
                name: length_take(le_u16).map(|s: &[u8]| s.to_vec()),
                extra: length_take(le_u16).map(|s: &[u8]| s.to_vec()),
            }},
        )
        .parse_next(i)
    }

    /// 4.3.9.1 This descriptor MUST exist if bit 3 of the general purpose
    /// bit flag is set.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & gpbf::DATA_DESCRIPTOR != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & gpbf::ENCRYPTED != 0
    }

    /// Size of this header, including signature, up to and including the
    /// extra field (but not the file data that follows).
    pub fn size(&self) -> u64 {
        30 + self.name.len() as u64 + self.extra.len() as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put(LOCAL_FILE_HEADER_SIGNATURE);
        w.put_u16(self.reader_version.to_u16());
        w.put_u16(self.flags);
        w.put_u16(self.method);
        w.put_u16(self.modified.time);
        w.put_u16(self.modified.date);
        w.put_u32(self.crc32);
        w.put_u32(self.compressed_size);
        w.put_u32(self.uncompressed_size);
        w.put_u16(self.name.len() as u16);
        w.put_u16(self.extra.len() as u16);
        w.put(&self.name);
        w.put(&self.extra);
        w.into_vec()
    }
}

/// The optional trailer written after file data when sizes/CRC couldn't be
/// known up front (streamed output).
///
/// From appnote.txt: "Although not originally assigned a signature, the
/// value 0x08074b50 has commonly been adopted as a signature value for the
/// data descriptor record. Implementers SHOULD be aware that ZIP files MAY
/// be encountered with or without this signature". Whether the 32-bit or
/// 64-bit form is in use can only be told from the dirent's `needs_zip64`
/// flag, never from the descriptor's own bytes.
#[derive(Debug, Clone, Copy)]
pub struct DataDescriptorRecord {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptorRecord {
    pub fn mk_parser(is_zip64: bool) -> impl FnMut(&mut Partial<&[u8]>) -> PResult<Self> {
        move |i: &mut Partial<&[u8]>| {
            let _ = opt(DATA_DESCRIPTOR_SIGNATURE).parse_next(i)?;
            if is_zip64 {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: winnow::binary::le_u64,
                    uncompressed_size: winnow::binary::le_u64,
                }}
                .parse_next(i)
            } else {
                seq! {Self {
                    crc32: le_u32,
                    compressed_size: le_u32.map(|x| x as u64),
                    uncompressed_size: le_u32.map(|x| x as u64),
                }}
                .parse_next(i)
            }
        }
    }

    pub fn to_bytes(&self, is_zip64: bool) -> Vec<u8> {
        let mut w = crate::buffer::Writer::new();
        w.put(DATA_DESCRIPTOR_SIGNATURE);
        w.put_u32(self.crc32);
        if is_zip64 {
            w.put_u64(self.compressed_size);
            w.put_u64(self.uncompressed_size);
        } else {
            w.put_u32(self.compressed_size as u32);
            w.put_u32(self.uncompressed_size as u32);
        }
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_header_roundtrip() {
        let rec = LocalFileHeaderRecord {
            reader_version: Version::default(),
            flags: gpbf::UTF8,
            method: 8,
            modified: MsdosTimestamp::default(),
            crc32: 0xdeadbeef,
            compressed_size: 10,
            uncompressed_size: 20,
            name: b"hello.txt".to_vec(),
            extra: vec![],
        };
        let bytes = rec.to_bytes();
        let mut input = Partial::new(&bytes[..]);
        let parsed = LocalFileHeaderRecord::parser(&mut input).unwrap();
        assert_eq!(parsed.name, b"hello.txt");
        assert!(!parsed.has_data_descriptor());
    }

    #[test]
    fn data_descriptor_without_signature() {
        let dd = DataDescriptorRecord { crc32: 1, compressed_size: 2, uncompressed_size: 3 };
        let mut w = crate::buffer::Writer::new();
        w.put_u32(dd.crc32);
        w.put_u32(dd.compressed_size as u32);
        w.put_u32(dd.uncompressed_size as u32);
        let bytes = w.into_vec();
        let mut input = Partial::new(&bytes[..]);
        let parsed = DataDescriptorRecord::mk_parser(false)(&mut input).unwrap();
        assert_eq!(parsed.crc32, 1);
    }
}
