//! Compression backends (C12), dispatched by [`Method`].
//!
//! Each backend is an optional Cargo feature, same as the teacher; a method
//! whose feature isn't compiled in surfaces as
//! [`crate::error::UnsupportedError::MethodNotEnabled`], and a method this
//! crate has never heard of surfaces as
//! [`crate::error::UnsupportedError::MethodNotSupported`].

use std::io::Read;

use crate::error::Error;
use crate::format::Method;

/// Decompress an entry's complete compressed data into its uncompressed
/// form.
pub fn decompress_all(method: Method, data: &[u8], uncompressed_size: u64) -> Result<Vec<u8>, Error> {
    match method {
        Method::Store => Ok(data.to_vec()),

        #[cfg(feature = "deflate")]
        Method::Deflate => {
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            flate2::read::DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            Ok(out)
        }
        #[cfg(not(feature = "deflate"))]
        Method::Deflate => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "deflate64")]
        Method::Deflate64 => {
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            deflate64::Deflate64Decoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            Ok(out)
        }
        #[cfg(not(feature = "deflate64"))]
        Method::Deflate64 => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "bzip2")]
        Method::Bzip2 => {
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            bzip2::read::BzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            Ok(out)
        }
        #[cfg(not(feature = "bzip2"))]
        Method::Bzip2 => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "lzma")]
        Method::Lzma => {
            let mut input = data;
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            lzma_rs::lzma_decompress(&mut input, &mut out)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            Ok(out)
        }
        #[cfg(not(feature = "lzma"))]
        Method::Lzma => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "zstd")]
        Method::Zstd => {
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            zstd::stream::read::Decoder::new(data)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?
                .read_to_end(&mut out)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            Ok(out)
        }
        #[cfg(not(feature = "zstd"))]
        Method::Zstd => Err(Error::method_not_enabled(method)),

        Method::Unrecognized(_) => Err(Error::method_not_supported(method)),
    }
}

/// Compress `data` under `method`.
///
/// Per the usual zip-writer convention, callers should compare the result's
/// length against `data.len()` and fall back to [`Method::Store`] when
/// compression didn't actually help (common for already-compressed payloads
/// like JPEGs or other zip files).
pub fn compress_all(method: Method, data: &[u8]) -> Result<Vec<u8>, Error> {
    match method {
        Method::Store => Ok(data.to_vec()),

        #[cfg(feature = "deflate")]
        Method::Deflate => {
            use std::io::Write;
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            encoder
                .finish()
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })
        }
        #[cfg(not(feature = "deflate"))]
        Method::Deflate => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "bzip2")]
        Method::Bzip2 => {
            use std::io::Write;
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })?;
            encoder
                .finish()
                .map_err(|e| Error::Decompression { method, msg: e.to_string() })
        }
        #[cfg(not(feature = "bzip2"))]
        Method::Bzip2 => Err(Error::method_not_enabled(method)),

        #[cfg(feature = "zstd")]
        Method::Zstd => zstd::stream::encode_all(data, 0)
            .map_err(|e| Error::Decompression { method, msg: e.to_string() }),
        #[cfg(not(feature = "zstd"))]
        Method::Zstd => Err(Error::method_not_enabled(method)),

        // Deflate64 and LZMA are decode-only in this crate, matching what
        // `lzma-rs`/`deflate64` themselves expose; writers should pick
        // Deflate or Store instead.
        Method::Deflate64 | Method::Lzma => Err(Error::method_not_supported(method)),

        Method::Unrecognized(_) => Err(Error::method_not_supported(method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_identity() {
        let data = b"hello world";
        let compressed = compress_all(Method::Store, data).unwrap();
        assert_eq!(compressed, data);
        let decompressed = decompress_all(Method::Store, &compressed, data.len() as u64).unwrap();
        assert_eq!(decompressed, data);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, many times over";
        let compressed = compress_all(Method::Deflate, data).unwrap();
        let decompressed = decompress_all(Method::Deflate, &compressed, data.len() as u64).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn unrecognized_method_is_unsupported() {
        let err = compress_all(Method::Unrecognized(12345), b"x").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
