//! End-to-end coverage of the transactional archive lifecycle: create,
//! stage changes, commit, and read back through a fresh [`Archive::open`]
//! of the committed bytes — exercising the same "bytes in, bytes out" path
//! a real caller would.

use zipforge::archive::{Archive, OpenFlags};
use zipforge::encoding::{EncodedString, Encoding};
use zipforge::format::{AesStrength, Method};
use zipforge::name_index::AddFlags;
use zipforge::source::buffer::BufferSource;
use zipforge::source::Source;
use zipforge::PendingEncryption;

fn name(s: &str) -> EncodedString {
    EncodedString::new(s.as_bytes().to_vec(), Encoding::Utf8, true)
}

fn boxed(data: &[u8]) -> Box<dyn Source> {
    Box::new(BufferSource::new(data.to_vec()))
}

fn fresh_archive() -> Archive {
    Archive::open(boxed(b""), OpenFlags::CREATE).unwrap()
}

fn reopen(archive: &mut Archive, flags: OpenFlags) -> Archive {
    let bytes = archive.raw_bytes().unwrap();
    Archive::open(Box::new(BufferSource::new(bytes)), flags).unwrap()
}

#[test_log::test]
fn create_add_commit_reopen_and_read() {
    let mut archive = fresh_archive();

    let idx = archive
        .file_add(name("hello.txt"), boxed(b"hello, world\n"), Method::Deflate, AddFlags::Default)
        .unwrap();
    assert_eq!(idx, 0);

    archive.commit().unwrap();
    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);

    assert_eq!(reopened.len(), 1);
    let bytes = reopened.read_entry(0).unwrap();
    assert_eq!(bytes, b"hello, world\n");
    assert_eq!(reopened.entries()[0].name(), b"hello.txt");
}

#[test_log::test]
fn rename_then_unchange_restores_original_name() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"abc"), Method::Store, AddFlags::Default).unwrap();
    archive.commit().unwrap();
    let mut archive = reopen(&mut archive, OpenFlags::empty());

    archive.file_rename(0, name("b.txt")).unwrap();
    assert_eq!(archive.entries()[0].name(), b"b.txt");

    archive.unchange(0).unwrap();
    assert_eq!(archive.entries()[0].name(), b"a.txt");
}

#[test_log::test]
fn delete_then_commit_drops_entry() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"one"), Method::Store, AddFlags::Default).unwrap();
    archive.file_add(name("b.txt"), boxed(b"two"), Method::Store, AddFlags::Default).unwrap();
    archive.commit().unwrap();

    let mut archive = reopen(&mut archive, OpenFlags::empty());
    let idx = archive.index_for_name(b"a.txt").unwrap();
    archive.delete(idx).unwrap();
    archive.commit().unwrap();

    let reopened = reopen(&mut archive, OpenFlags::RDONLY);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.entries()[0].name(), b"b.txt");
}

#[test_log::test]
fn duplicate_name_add_is_rejected_without_overwrite_flag() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"one"), Method::Store, AddFlags::Default).unwrap();
    let err = archive
        .file_add(name("a.txt"), boxed(b"two"), Method::Store, AddFlags::Default)
        .unwrap_err();
    assert!(matches!(err, zipforge::Error::EntryExists(_)));
}

#[test_log::test]
fn overwrite_flag_replaces_existing_name() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"one"), Method::Store, AddFlags::Default).unwrap();
    archive
        .file_add(name("a.txt"), boxed(b"two"), Method::Store, AddFlags::Overwrite)
        .unwrap();
    archive.commit().unwrap();

    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.read_entry(0).unwrap(), b"two");
}

#[test_log::test]
fn torrentzip_commit_is_byte_deterministic_across_runs() {
    let mut a1 = fresh_archive();
    a1.want_torrentzip(true);
    a1.file_add(name("f.bin"), boxed(b"payload"), Method::Deflate, AddFlags::Default).unwrap();
    a1.commit().unwrap();
    let bytes1 = a1.raw_bytes().unwrap();

    let mut a2 = fresh_archive();
    a2.want_torrentzip(true);
    a2.file_add(name("f.bin"), boxed(b"payload"), Method::Deflate, AddFlags::Default).unwrap();
    a2.commit().unwrap();
    let bytes2 = a2.raw_bytes().unwrap();

    // same inputs, same torrentzip-normalized timestamp/comment/method ⇒
    // byte-identical archives, independent of when the test runs.
    assert_eq!(bytes1, bytes2);

    let reopened = Archive::open(Box::new(BufferSource::new(bytes1)), OpenFlags::RDONLY).unwrap();
    assert!(reopened.is_torrentzip());
}

#[test_log::test]
fn read_only_archive_rejects_mutation() {
    let mut archive = fresh_archive();
    archive.file_add(name("x.txt"), boxed(b"x"), Method::Store, AddFlags::Default).unwrap();
    archive.commit().unwrap();

    let mut archive = reopen(&mut archive, OpenFlags::RDONLY);
    let err = archive
        .file_add(name("y.txt"), boxed(b"y"), Method::Store, AddFlags::Default)
        .unwrap_err();
    assert!(matches!(err, zipforge::Error::ReadOnly));
}

#[test_log::test]
fn comment_roundtrips_through_commit() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"a"), Method::Store, AddFlags::Default).unwrap();
    archive.set_comment(b"archive comment".to_vec()).unwrap();
    archive.commit().unwrap();

    let reopened = reopen(&mut archive, OpenFlags::RDONLY);
    assert_eq!(reopened.comment(), b"archive comment");
}

#[test_log::test]
fn opening_empty_buffer_without_create_fails() {
    let err = Archive::open(boxed(b""), OpenFlags::empty()).unwrap_err();
    assert!(matches!(
        err,
        zipforge::Error::Format(zipforge::error::FormatError::DirectoryEndSignatureNotFound)
    ));
}

#[test_log::test]
fn traditional_encryption_round_trips_with_the_right_password() {
    let mut archive = fresh_archive();
    let idx = archive
        .file_add(name("secret.txt"), boxed(b"shh, it's a secret"), Method::Deflate, AddFlags::Default)
        .unwrap();
    archive
        .file_set_encryption(idx, Some(PendingEncryption::Traditional { password: b"hunter2".to_vec() }))
        .unwrap();
    archive.commit().unwrap();

    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);
    assert!(reopened.entries()[0].dirent().is_encrypted());
    reopened.set_default_password(Some(b"hunter2".to_vec()));
    assert_eq!(reopened.read_entry(0).unwrap(), b"shh, it's a secret");
}

#[test_log::test]
fn winzip_aes_round_trips_with_the_right_password() {
    let mut archive = fresh_archive();
    let idx = archive
        .file_add(name("secret.bin"), boxed(b"aes protected payload"), Method::Deflate, AddFlags::Default)
        .unwrap();
    archive
        .file_set_encryption(
            idx,
            Some(PendingEncryption::WinZipAes { password: b"correct horse".to_vec(), strength: AesStrength::Aes256 }),
        )
        .unwrap();
    archive.commit().unwrap();

    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);
    assert!(reopened.entries()[0].dirent().is_encrypted());
    assert!(reopened.entries()[0].dirent().aes.is_some());
    reopened.set_default_password(Some(b"correct horse".to_vec()));
    assert_eq!(reopened.read_entry(0).unwrap(), b"aes protected payload");
}

#[test_log::test]
fn wrong_password_is_rejected_rather_than_silently_returning_garbage() {
    let mut archive = fresh_archive();
    let idx = archive
        .file_add(name("secret.txt"), boxed(b"top secret contents"), Method::Deflate, AddFlags::Default)
        .unwrap();
    archive
        .file_set_encryption(idx, Some(PendingEncryption::Traditional { password: b"hunter2".to_vec() }))
        .unwrap();
    archive.commit().unwrap();

    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);
    reopened.set_default_password(Some(b"wrong password".to_vec()));
    let err = reopened.read_entry(0).unwrap_err();
    assert!(matches!(err, zipforge::Error::WrongPassword));
}

#[test_log::test]
fn missing_password_is_reported_distinctly_from_a_wrong_one() {
    let mut archive = fresh_archive();
    let idx = archive
        .file_add(name("secret.txt"), boxed(b"top secret contents"), Method::Deflate, AddFlags::Default)
        .unwrap();
    archive
        .file_set_encryption(idx, Some(PendingEncryption::Traditional { password: b"hunter2".to_vec() }))
        .unwrap();
    archive.commit().unwrap();

    let mut reopened = reopen(&mut archive, OpenFlags::RDONLY);
    let err = reopened.read_entry(0).unwrap_err();
    assert!(matches!(err, zipforge::Error::NoPassword));
}

#[test_log::test]
fn corrupted_entry_bytes_fail_crc_check_instead_of_decoding_silently() {
    let mut archive = fresh_archive();
    archive
        .file_add(name("data.bin"), boxed(b"the quick brown fox jumps"), Method::Store, AddFlags::Default)
        .unwrap();
    archive.commit().unwrap();

    let mut bytes = archive.raw_bytes().unwrap();
    let at = bytes.windows(5).position(|w| w == b"quick").unwrap();
    bytes[at] ^= 0xff;

    let mut reopened = Archive::open(Box::new(BufferSource::new(bytes)), OpenFlags::RDONLY).unwrap();
    let err = reopened.read_entry(0).unwrap_err();
    assert!(matches!(
        err,
        zipforge::Error::Format(zipforge::error::FormatError::WrongChecksum { .. })
    ));
}

#[test_log::test]
fn cancel_hook_aborts_commit_and_leaves_the_backing_bytes_untouched() {
    let mut archive = fresh_archive();
    archive.file_add(name("a.txt"), boxed(b"one"), Method::Store, AddFlags::Default).unwrap();
    archive.commit().unwrap();
    let before = archive.raw_bytes().unwrap();

    let mut archive = reopen(&mut archive, OpenFlags::empty());
    archive.file_add(name("b.txt"), boxed(b"two"), Method::Store, AddFlags::Default).unwrap();
    archive.set_cancel_hook(Box::new(|| true));

    let err = archive.commit().unwrap_err();
    assert!(matches!(err, zipforge::Error::Cancelled));

    let after = archive.raw_bytes().unwrap();
    assert_eq!(before, after);
}
