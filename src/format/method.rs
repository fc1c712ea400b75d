use winnow::{binary::le_u16, PResult, Parser, Partial};

/// Compression method used for a file entry.
///
/// In archives that follow ISO/IEC 21320-1:2015, only [`Method::Store`] and
/// [`Method::Deflate`] should be used, but in the wild it's common to
/// encounter [`Method::Bzip2`], [`Method::Lzma`] or others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No compression is applied.
    Store,
    /// [DEFLATE (RFC 1951)](https://www.ietf.org/rfc/rfc1951.txt)
    Deflate,
    /// [DEFLATE64](https://deflate64.com/)
    Deflate64,
    /// BZIP-2
    Bzip2,
    /// LZMA
    Lzma,
    /// zstd
    Zstd,
    /// A compression method that isn't recognized by this crate.
    Unrecognized(u16),
}

impl Method {
    const STORE: u16 = 0;
    const DEFLATE: u16 = 8;
    const DEFLATE64: u16 = 9;
    const BZIP2: u16 = 12;
    const LZMA: u16 = 14;
    const ZSTD: u16 = 93;
    /// Compression method marker used when an entry is AES-encrypted: the
    /// *real* method is stored in the WinZip AES extra field (`0x9901`) and
    /// this value is swapped back in for [`crate::format::Dirent::method`].
    pub(crate) const AEX: u16 = 99;

    /// Parse a method from a byte slice.
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        le_u16(i).map(Self::from)
    }

    /// Raw 16-bit method code as it appears on the wire.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Store => Self::STORE,
            Self::Deflate => Self::DEFLATE,
            Self::Deflate64 => Self::DEFLATE64,
            Self::Bzip2 => Self::BZIP2,
            Self::Lzma => Self::LZMA,
            Self::Zstd => Self::ZSTD,
            Self::Unrecognized(v) => v,
        }
    }
}

impl From<u16> for Method {
    fn from(u: u16) -> Self {
        match u {
            Self::STORE => Self::Store,
            Self::DEFLATE => Self::Deflate,
            Self::DEFLATE64 => Self::Deflate64,
            Self::BZIP2 => Self::Bzip2,
            Self::LZMA => Self::Lzma,
            Self::ZSTD => Self::Zstd,
            other => Self::Unrecognized(other),
        }
    }
}
