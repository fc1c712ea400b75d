//! CRC-32 verification, the last codec layer applied when reading an entry.

use crate::error::{Error, FormatError};

/// Check that `data` hashes to `expected`, the way every entry's
/// uncompressed bytes are checked against its directory entry's `crc32`
/// field after decompression (and decryption, if any) completes.
pub fn verify(data: &[u8], expected: u32) -> Result<(), Error> {
    let actual = crc32fast::hash(data);
    if actual != expected {
        return Err(Error::Format(FormatError::WrongChecksum { expected, actual }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_matching_crc() {
        let data = b"some bytes";
        let crc = crc32fast::hash(data);
        assert!(verify(data, crc).is_ok());
    }

    #[test]
    fn verify_mismatched_crc_errors() {
        let data = b"some bytes";
        let err = verify(data, 0).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::WrongChecksum { .. })));
    }
}
