//! Codec layers (C4): compression, encryption, and CRC verification,
//! composed around whatever is serving an entry's raw bytes.
//!
//! Unlike [`super::window::WindowSource`], these operate a whole entry's
//! data at a time rather than as an incremental `Read` pipeline: an entry's
//! compressed region is first materialized (it's already bounded, typically
//! to a few MB at most, by the window it was read through), then
//! transformed. This trades streaming large entries in small chunks for a
//! much simpler, easier-to-get-right composition with the encryption layer,
//! which itself needs the whole ciphertext before it can verify its
//! authentication tag (WinZip AES) or trailing check bytes (traditional
//! PKWARE).

pub mod compress;
pub mod crc;
pub mod crypto;
