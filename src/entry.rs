//! One archive member (C9's per-entry half): the `original`/`changes`/`source`
//! triple the data model describes, plus the `deleted` flag.
//!
//! Rather than tracking *which* fields of `changes` diverge from `original`
//! via an explicit bitmask (the mutable-struct-with-dirty-bits approach a C
//! implementation reaches for), this keeps `changes` as `None` until the
//! first mutator runs, then clones `original` wholesale into it — every
//! subsequent mutator just writes through the clone. The round-trip
//! invariant this buys: an entry nobody touched serializes byte-identically
//! to what was parsed, because `effective_dirent()` reads straight from
//! `original` until `changes` exists at all.

use crate::error::Error;
use crate::format::{AesStrength, Dirent};
use crate::source::Source;

/// Encryption requested for an entry's *staged* data at the next commit.
/// Only meaningful together with a `source` (a brand new or replaced
/// entry's plaintext) — an entry carried over unmodified keeps whatever
/// ciphertext (if any) its original ZIP data already had, untouched.
#[derive(Debug, Clone)]
pub enum PendingEncryption {
    /// Traditional (ZipCrypto) PKWARE encryption.
    Traditional {
        /// The password bytes to key the stream cipher from.
        password: Vec<u8>,
    },
    /// WinZip AES encryption at the given key strength.
    WinZipAes {
        /// The password bytes PBKDF2-HMAC-SHA1 derives the AES/HMAC keys from.
        password: Vec<u8>,
        /// AES key length (128/192/256).
        strength: AesStrength,
    },
}

/// One archive member across a session: present in the on-disk archive
/// (`original`), mutated in memory (`changes`), newly staged data
/// (`source`), or some combination of the three.
#[derive(Debug)]
pub struct Entry {
    /// The dirent as parsed from the central directory, if this entry
    /// existed when the archive was opened.
    pub original: Option<Dirent>,
    /// A clone of `original` (or, for a brand new entry, a freshly built
    /// dirent) carrying whatever metadata the caller has changed since.
    /// `None` means nothing about this entry's metadata has been touched.
    pub changes: Option<Dirent>,
    /// Staged replacement (or initial) file data. `None` means "read the
    /// existing on-disk bytes unchanged" — only meaningful when `original`
    /// is `Some`.
    pub source: Option<Box<dyn Source>>,
    /// Set by `delete()`. Only ever set on entries that have an `original`;
    /// an entry added this session is just dropped outright instead (see
    /// [`crate::archive::Archive::delete`]).
    pub deleted: bool,
    /// Requested encryption for `source`'s plaintext, staged via
    /// `set_encryption` and consumed at commit. `None` means "write
    /// `source` out as plaintext" (the default for `file_add`/`file_replace`).
    pub pending_encryption: Option<PendingEncryption>,
}

impl Entry {
    /// Wrap a dirent freshly parsed out of the central directory.
    pub fn from_original(dirent: Dirent) -> Self {
        Self { original: Some(dirent), changes: None, source: None, deleted: false, pending_encryption: None }
    }

    /// Build a brand new entry (`file_add`) with no on-disk counterpart.
    pub fn new_added(dirent: Dirent, source: Box<dyn Source>) -> Self {
        Self { original: None, changes: Some(dirent), source: Some(source), deleted: false, pending_encryption: None }
    }

    /// Whether this entry has no on-disk counterpart at all (added this
    /// session, not yet committed).
    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    /// Whether any metadata or data has been changed relative to what was
    /// (or would be) on disk.
    pub fn is_modified(&self) -> bool {
        self.is_new() || self.changes.is_some() || self.source.is_some() || self.deleted
    }

    /// The dirent reads/writes/commit should treat as authoritative: pending
    /// changes if any were made, otherwise the as-parsed original. Panics if
    /// called on a malformed entry with neither (an invariant violation the
    /// archive layer must never allow to happen).
    pub fn dirent(&self) -> &Dirent {
        self.changes
            .as_ref()
            .or(self.original.as_ref())
            .expect("entry must have an original or staged dirent")
    }

    /// Mutable access to the effective dirent, cloning `original` into
    /// `changes` on first write so later reads of `original` stay pristine.
    fn dirent_mut(&mut self) -> &mut Dirent {
        if self.changes.is_none() {
            let base = self.original.clone().expect("entry must have an original or staged dirent");
            self.changes = Some(base);
        }
        self.changes.as_mut().unwrap()
    }

    /// `file_rename`: stage a new filename. Name-index bookkeeping (rename
    /// collision detection) happens one level up, in
    /// [`crate::archive::Archive::file_rename`], since only the archive
    /// knows about every other entry's name.
    pub fn set_name(&mut self, name: crate::encoding::EncodedString) {
        self.dirent_mut().name = name;
    }

    pub fn set_comment(&mut self, comment: crate::encoding::EncodedString) {
        self.dirent_mut().comment = comment;
    }

    pub fn set_external_attrs(&mut self, attrs: u32) {
        self.dirent_mut().external_attrs = attrs;
    }

    pub fn set_modified(&mut self, ts: crate::format::MsdosTimestamp) {
        self.dirent_mut().modified = ts;
    }

    pub fn set_method(&mut self, method: crate::format::Method) {
        self.dirent_mut().method = method;
    }

    /// `file_replace`: attach new data, and force recompression at commit
    /// time with the default method rather than trusting whatever
    /// `comp_method` the original entry (or the caller) last set, matching
    /// the "mark REPLACED_DEFAULT" step the state machine describes.
    pub fn replace_source(&mut self, source: Box<dyn Source>) {
        self.source = Some(source);
        self.pending_encryption = None;
        self.dirent_mut().method = crate::format::Method::Deflate;
    }

    /// `file_set_encryption`: request that this entry's staged `source`
    /// plaintext be encrypted at the next commit. Only meaningful on an
    /// entry that has (or will have, via `file_replace`) a `source` — an
    /// unmodified original entry's ciphertext (or lack of one) is carried
    /// over as-is regardless of this setting.
    pub fn set_encryption(&mut self, request: Option<PendingEncryption>) {
        self.pending_encryption = request;
    }

    /// `delete(i)`: only legal on an entry that has an on-disk counterpart —
    /// an entry added this session with no `original` is dropped from the
    /// archive outright instead, by [`crate::archive::Archive::delete`].
    pub fn mark_deleted(&mut self) -> Result<(), Error> {
        if self.original.is_none() {
            return Err(Error::NotAllowed("a newly-added entry cannot be soft-deleted"));
        }
        self.deleted = true;
        Ok(())
    }

    /// `unchange(i)`: revert pending metadata/data changes, restoring the
    /// as-parsed view. No-op (but always legal) on a newly added entry's
    /// metadata; its `source` is never reverted since it has nothing to
    /// revert to.
    pub fn unchange(&mut self) {
        self.changes = None;
        self.deleted = false;
        self.pending_encryption = None;
        if self.original.is_some() {
            self.source = None;
        }
    }

    /// The name this entry is currently known by, for name-index lookups
    /// and commit ordering.
    pub fn name(&self) -> &[u8] {
        self.dirent().name.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodedString, Encoding};
    use crate::format::{Dirent, Method, MsdosTimestamp, Version};
    use crate::source::buffer::BufferSource;

    fn sample_dirent(name: &str) -> Dirent {
        Dirent {
            version_made_by: Version::default(),
            version_needed: Version::default(),
            flags: 0,
            method: Method::Store,
            modified: MsdosTimestamp::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            header_offset: 0,
            name: EncodedString::new(name.as_bytes().to_vec(), Encoding::Utf8, true),
            comment: EncodedString::from_utf8_override(Vec::new(), String::new()),
            extra: Default::default(),
            aes: None,
        }
    }

    #[test]
    fn untouched_entry_reads_through_to_original() {
        let entry = Entry::from_original(sample_dirent("a.txt"));
        assert!(entry.changes.is_none());
        assert_eq!(entry.dirent().name.as_str(), "a.txt");
        assert!(!entry.is_modified());
    }

    #[test]
    fn setting_name_clones_into_changes_only_once() {
        let mut entry = Entry::from_original(sample_dirent("a.txt"));
        entry.set_name(EncodedString::new(b"b.txt".to_vec(), Encoding::Utf8, true));
        assert_eq!(entry.dirent().name.as_str(), "b.txt");
        assert!(entry.original.as_ref().unwrap().name.as_str() == "a.txt");
        assert!(entry.is_modified());
    }

    #[test]
    fn delete_requires_original() {
        let source: Box<dyn Source> = Box::new(BufferSource::new(b"hi".to_vec()));
        let mut entry = Entry::new_added(sample_dirent("new.txt"), source);
        assert!(entry.mark_deleted().is_err());
    }

    #[test]
    fn unchange_clears_pending_edits() {
        let mut entry = Entry::from_original(sample_dirent("a.txt"));
        entry.set_name(EncodedString::new(b"b.txt".to_vec(), Encoding::Utf8, true));
        entry.mark_deleted().unwrap();
        entry.unchange();
        assert!(entry.changes.is_none());
        assert!(!entry.deleted);
        assert_eq!(entry.dirent().name.as_str(), "a.txt");
    }
}
