//! The central-directory finder (C7): locates the EOCD (promoting to EOCD64
//! when present), reads every central directory header, and optionally runs
//! the `CHECKCONS` cross-validation pass against local headers.
//!
//! Grounded on the teacher's own `fsm/archive.rs` tail-scan (same backward
//! search for `PK\x05\x06`, same ZIP64-locator promotion), rewritten against
//! [`crate::source::Source`] instead of an incremental push-based parser
//! since this crate's archive model reads its backing store synchronously.

use tracing::trace;
use winnow::Partial;

use crate::encoding::{guess_archive_encoding, Encoding};
use crate::error::{Error, FormatError, InconsistencyDetail, UnsupportedError};
use crate::format::{
    Dirent, EndOfCentralDirectory64Locator, EndOfCentralDirectory64Record, EndOfCentralDirectoryRecord,
    EOCD64_LOCATOR_SIGNATURE, EOCD64_RECORD_SIGNATURE, EOCD_SIGNATURE, ZIP16_SENTINEL, ZIP32_SENTINEL,
};
use crate::source::Source;

/// `MAXCOMLEN (65,535) + EOCDLEN (22) + EOCD64LOCLEN (20) + 1`: the largest
/// tail slice that could possibly contain an EOCD with a maximum-length
/// comment plus a preceding ZIP64 locator.
const CDBUFSIZE: u64 = 65_578;

/// What the finder found: the parsed entries, the archive comment (with any
/// torrentzip signature already stripped), and bookkeeping the archive layer
/// needs to reconstruct the same record shape on commit.
#[derive(Debug)]
pub struct CDir {
    pub entries: Vec<Dirent>,
    pub comment: Vec<u8>,
    pub offset: u64,
    pub size: u64,
    pub is_zip64: bool,
    pub is_torrentzip: bool,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Copy)]
pub struct FinderOptions {
    pub check_consistency: bool,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self { check_consistency: false }
    }
}

struct Candidate {
    abs_offset: u64,
    eocd: EndOfCentralDirectoryRecord,
    dir_offset: u64,
    dir_size: u64,
    entry_count: u64,
    is_zip64: bool,
    /// Whether this candidate's EOCD (or EOCD64) indicates more than one
    /// disk. Spanned archives are an explicit non-goal (spec §1): any
    /// candidate with this set is rejected outright once chosen as `best`,
    /// never silently truncated to "disk 0 only".
    multi_disk: bool,
}

/// Locate and parse the central directory of `source`, which must be
/// seekable.
pub fn find(source: &mut dyn Source, opts: FinderOptions) -> Result<CDir, Error> {
    let stat = source.stat()?;
    let total_len = stat.size;

    let tail_len = total_len.min(CDBUFSIZE);
    let tail_start = total_len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    read_exact_at(source, tail_start, &mut tail)?;

    let mut candidates = Vec::new();
    for idx in find_all(&tail, EOCD_SIGNATURE) {
        let abs_offset = tail_start + idx as u64;
        if let Some(candidate) = try_parse_candidate(source, &tail, idx, abs_offset, total_len, opts.check_consistency)?
        {
            candidates.push(candidate);
        }
    }

    if candidates.is_empty() {
        return Err(Error::Format(FormatError::DirectoryEndSignatureNotFound));
    }
    trace!(count = candidates.len(), "find | candidate EOCD records");

    let best = if opts.check_consistency && candidates.len() > 1 {
        pick_best_by_local_header_match(source, &candidates)?
    } else {
        candidates.into_iter().max_by_key(|c| c.abs_offset).expect("non-empty")
    };
    trace!(dir_offset = best.dir_offset, dir_size = best.dir_size, is_zip64 = best.is_zip64, "find | winning candidate");

    if best.multi_disk {
        return Err(Error::Unsupported(UnsupportedError::MultiDisk));
    }

    if best.dir_offset > total_len || best.dir_offset + best.dir_size > total_len {
        return Err(Error::Format(FormatError::DirectoryOffsetPointsOutsideFile));
    }
    if best.dir_offset + best.dir_size > best.abs_offset {
        return Err(Error::inconsistent(InconsistencyDetail::CdirOverlapsEocd));
    }

    let mut cd_bytes = vec![0u8; best.dir_size as usize];
    read_exact_at(source, best.dir_offset, &mut cd_bytes)?;

    let (entries_utf8, sizes) = parse_entries(&cd_bytes, Encoding::Utf8)?;
    let encoding = guess_archive_encoding(
        entries_utf8.iter().map(|e| (e.name.raw(), e.comment.raw(), e.flags)),
    );
    let entries = if encoding == Encoding::Utf8 {
        entries_utf8
    } else {
        parse_entries(&cd_bytes, encoding)?.0
    };

    if opts.check_consistency && entries.len() as u64 != best.entry_count {
        return Err(Error::inconsistent(InconsistencyDetail::CdirWrongEntriesCount));
    }

    let actual_size: usize = sizes.iter().sum();
    if opts.check_consistency && actual_size as u64 != best.dir_size {
        return Err(Error::inconsistent(InconsistencyDetail::CdirLengthInvalid));
    } else if actual_size as u64 > best.dir_size {
        return Err(Error::inconsistent(InconsistencyDetail::CdirLengthInvalid));
    }

    if opts.check_consistency {
        check_entries_against_local_headers(source, &entries)?;
    }

    let (comment, is_torrentzip) = detect_torrentzip(&best.eocd.comment, &cd_bytes);

    Ok(CDir {
        entries,
        comment,
        offset: best.dir_offset,
        size: best.dir_size,
        is_zip64: best.is_zip64,
        is_torrentzip,
        encoding,
    })
}

fn find_all(haystack: &[u8], needle: &[u8; 4]) -> Vec<usize> {
    let mut out = Vec::new();
    if haystack.len() < needle.len() {
        return out;
    }
    for i in 0..=haystack.len() - needle.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.push(i);
        }
    }
    out
}

fn try_parse_candidate(
    source: &mut dyn Source,
    tail: &[u8],
    idx: usize,
    abs_offset: u64,
    total_len: u64,
    check_consistency: bool,
) -> Result<Option<Candidate>, Error> {
    let mut input = Partial::new(&tail[idx..]);
    let eocd = match EndOfCentralDirectoryRecord::parser(&mut input) {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };

    let record_end = abs_offset + (tail[idx..].len() - input.len()) as u64;
    let remaining = total_len - record_end;
    if check_consistency {
        if remaining != eocd.comment.len() as u64 {
            return Err(Error::inconsistent(InconsistencyDetail::CommentLengthInvalid));
        }
    } else if remaining < eocd.comment.len() as u64 {
        return Ok(None);
    }

    let mut dir_offset = eocd.directory_offset as u64;
    let mut dir_size = eocd.directory_size as u64;
    let mut entry_count = eocd.directory_records as u64;
    let mut is_zip64 = false;
    let mut multi_disk = eocd.disk_nbr != 0 || eocd.dir_disk_nbr != 0;

    if abs_offset >= EndOfCentralDirectory64Locator::SIZE as u64 {
        let loc_start = abs_offset - EndOfCentralDirectory64Locator::SIZE as u64;
        if let Some(loc_bytes) = slice_at(tail, tail_relative(loc_start, tail, total_len), EndOfCentralDirectory64Locator::SIZE)
        {
            if loc_bytes.starts_with(EOCD64_LOCATOR_SIGNATURE) {
                let mut li = Partial::new(loc_bytes);
                if let Ok(locator) = EndOfCentralDirectory64Locator::parser(&mut li) {
                    let mut rec_buf = [0u8; 56];
                    if read_exact_at(source, locator.directory_offset, &mut rec_buf).is_ok() {
                        if rec_buf.starts_with(EOCD64_RECORD_SIGNATURE) {
                            let mut ri = Partial::new(&rec_buf[..]);
                            if let Ok(rec) = EndOfCentralDirectory64Record::parser(&mut ri) {
                                dir_offset = rec.directory_offset;
                                dir_size = rec.directory_size;
                                entry_count = rec.directory_records;
                                is_zip64 = true;
                                multi_disk = rec.disk_nbr != 0 || rec.dir_disk_nbr != 0 || locator.total_disks != 1;
                            } else {
                                return Err(Error::Format(FormatError::Directory64EndRecordInvalid));
                            }
                        } else {
                            return Err(Error::Format(FormatError::Directory64EndRecordInvalid));
                        }
                    }
                }
            }
        }
    }

    if !is_zip64 {
        if eocd.directory_offset == ZIP32_SENTINEL || eocd.directory_records == ZIP16_SENTINEL {
            // sentinel present but no locator found: malformed, not a candidate.
            return Ok(None);
        }
    }

    Ok(Some(Candidate { abs_offset, eocd, dir_offset, dir_size, entry_count, is_zip64, multi_disk }))
}

/// Translate an absolute file offset into an index into `tail`, if it falls
/// within the range that was actually read.
fn tail_relative(abs: u64, tail: &[u8], total_len: u64) -> i64 {
    let tail_start = total_len - tail.len() as u64;
    abs as i64 - tail_start as i64
}

fn slice_at(tail: &[u8], rel: i64, len: usize) -> Option<&[u8]> {
    if rel < 0 {
        return None;
    }
    let rel = rel as usize;
    tail.get(rel..rel + len)
}

fn pick_best_by_local_header_match(source: &mut dyn Source, candidates: &[Candidate]) -> Result<Candidate, Error> {
    let mut best_idx = 0;
    let mut best_mismatches = usize::MAX;
    for (i, c) in candidates.iter().enumerate() {
        let mismatches = score_candidate(source, c).unwrap_or(usize::MAX);
        if mismatches < best_mismatches || (mismatches == best_mismatches && c.abs_offset > candidates[best_idx].abs_offset)
        {
            best_mismatches = mismatches;
            best_idx = i;
        }
    }
    // Candidate doesn't implement Clone; rebuild the winner by index.
    let winner = &candidates[best_idx];
    Ok(Candidate {
        abs_offset: winner.abs_offset,
        eocd: winner.eocd.clone(),
        dir_offset: winner.dir_offset,
        dir_size: winner.dir_size,
        entry_count: winner.entry_count,
        is_zip64: winner.is_zip64,
        multi_disk: winner.multi_disk,
    })
}

fn score_candidate(source: &mut dyn Source, c: &Candidate) -> Result<usize, Error> {
    if c.dir_offset + c.dir_size > c.abs_offset {
        return Ok(usize::MAX);
    }
    let mut cd_bytes = vec![0u8; c.dir_size as usize];
    read_exact_at(source, c.dir_offset, &mut cd_bytes)?;
    let (entries, _) = parse_entries(&cd_bytes, Encoding::Utf8)?;
    let mut mismatches = 0;
    for entry in &entries {
        if local_header_mismatches(source, entry)? {
            mismatches += 1;
        }
    }
    Ok(mismatches)
}

/// Parse every central directory header out of `data`, returning the
/// entries and each one's consumed byte length (so the caller can detect
/// both truncation and trailing garbage).
fn parse_entries(data: &[u8], encoding: Encoding) -> Result<(Vec<Dirent>, Vec<usize>), Error> {
    let mut entries = Vec::new();
    let mut sizes = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let (dirent, consumed) = Dirent::parse_central(rest, encoding).map_err(|e| attach_entry_index(e, entries.len()))?;
        sizes.push(consumed);
        entries.push(dirent);
        rest = &rest[consumed..];
    }
    Ok((entries, sizes))
}

/// Tag an otherwise entry-less [`Error::Inconsistent`] (e.g. a bad extra
/// field, raised from inside [`Dirent::parse_central`] before it knows its
/// own index) with the entry index the caller was in the middle of parsing.
fn attach_entry_index(err: Error, index: usize) -> Error {
    match err {
        Error::Inconsistent { entry: None, detail } => Error::inconsistent_at(index, detail),
        other => other,
    }
}

fn local_header_mismatches(source: &mut dyn Source, central: &Dirent) -> Result<bool, Error> {
    let mut head = [0u8; 30];
    if read_exact_at(source, central.header_offset, &mut head).is_err() {
        return Ok(true);
    }
    let name_len = u16::from_le_bytes([head[26], head[27]]) as usize;
    let extra_len = u16::from_le_bytes([head[28], head[29]]) as usize;
    let mut full = vec![0u8; 30 + name_len + extra_len];
    if read_exact_at(source, central.header_offset, &mut full).is_err() {
        return Ok(true);
    }
    let local = match Dirent::parse_local(&full, Encoding::Utf8) {
        Ok((d, _)) => d,
        Err(_) => return Ok(true),
    };

    if local.version_needed.to_u16() != central.version_needed.to_u16() {
        return Ok(true);
    }
    if local.method != central.method {
        return Ok(true);
    }
    if local.modified.to_u32() != central.modified.to_u32() {
        return Ok(true);
    }
    if local.name.raw() != central.name.raw() {
        return Ok(true);
    }
    if !central.has_data_descriptor() {
        if local.crc32 != central.crc32 {
            return Ok(true);
        }
        if local.compressed_size != central.compressed_size && local.compressed_size != 0 {
            return Ok(true);
        }
        if local.uncompressed_size != central.uncompressed_size && local.uncompressed_size != 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

fn check_entries_against_local_headers(source: &mut dyn Source, entries: &[Dirent]) -> Result<(), Error> {
    for (i, entry) in entries.iter().enumerate() {
        if local_header_mismatches(source, entry)? {
            return Err(Error::inconsistent_at(i, InconsistencyDetail::EntryHeaderMismatch));
        }
    }
    Ok(())
}

/// APPNOTE doesn't define this; the torrentzip convention puts a fixed
/// `TORRENTZIPPED-XXXXXXXX` (22 ASCII bytes) archive comment whose 8 hex
/// digits are the CRC-32 of the central directory bytes, so that rebuilding
/// the same archive from the same inputs reproduces the same bytes exactly.
fn detect_torrentzip(comment: &[u8], cd_bytes: &[u8]) -> (Vec<u8>, bool) {
    const PREFIX: &[u8] = b"TORRENTZIPPED-";
    if comment.len() != 22 || !comment.starts_with(PREFIX) {
        return (comment.to_vec(), false);
    }
    let hex = &comment[PREFIX.len()..];
    let Ok(hex_str) = std::str::from_utf8(hex) else {
        return (comment.to_vec(), false);
    };
    let Ok(claimed) = u32::from_str_radix(hex_str, 16) else {
        return (comment.to_vec(), false);
    };
    if claimed == crc32fast::hash(cd_bytes) {
        (Vec::new(), true)
    } else {
        (comment.to_vec(), false)
    }
}

fn read_exact_at(source: &mut dyn Source, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    source.seek(std::io::SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::Format(FormatError::DirectoryOffsetPointsOutsideFile));
        }
        filled += n;
    }
    Ok(())
}

/// Same as [`read_exact_at`], but returning a freshly allocated buffer —
/// used by [`crate::archive`] to pull an entry's raw compressed bytes off
/// disk without the caller needing to size a buffer up front.
pub(crate) fn read_exact_at_owned(source: &mut dyn Source, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    read_exact_at(source, offset, &mut buf)?;
    Ok(buf)
}

/// Reparse the local header at `dirent.header_offset` to find where the
/// entry's compressed data actually starts (the local header's name/extra
/// fields aren't always the same length as the central copy), and return
/// `(data_offset, compressed_size)`.
pub(crate) fn entry_data_region(source: &mut dyn Source, dirent: &Dirent) -> Result<(u64, u64), Error> {
    let mut head = [0u8; 30];
    read_exact_at(source, dirent.header_offset, &mut head)?;
    let name_len = u16::from_le_bytes([head[26], head[27]]) as usize;
    let extra_len = u16::from_le_bytes([head[28], head[29]]) as usize;
    let data_offset = dirent.header_offset + 30 + name_len as u64 + extra_len as u64;
    Ok((data_offset, dirent.compressed_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Writer;
    use crate::format::{Method, Version};
    use crate::source::buffer::BufferSource;

    fn build_trivial_archive(names: &[&str]) -> Vec<u8> {
        let mut w = Writer::new();
        let mut offsets = Vec::new();
        for name in names {
            offsets.push(w.len() as u32);
            w.put(crate::format::LOCAL_FILE_HEADER_SIGNATURE);
            w.put_u16(Version::default().to_u16());
            w.put_u16(0);
            w.put_u16(Method::Store.to_u16());
            w.put_u16(0);
            w.put_u16(0);
            w.put_u32(0);
            w.put_u32(0);
            w.put_u32(0);
            w.put_u16(name.len() as u16);
            w.put_u16(0);
            w.put(name.as_bytes());
        }
        let dir_offset = w.len() as u32;
        for (name, offset) in names.iter().zip(offsets.iter()) {
            w.put(crate::format::CENTRAL_DIRECTORY_HEADER_SIGNATURE);
            w.put_u16(Version::default().to_u16());
            w.put_u16(Version::default().to_u16());
            w.put_u16(0);
            w.put_u16(Method::Store.to_u16());
            w.put_u16(0);
            w.put_u16(0);
            w.put_u32(0);
            w.put_u32(0);
            w.put_u32(0);
            w.put_u16(name.len() as u16);
            w.put_u16(0);
            w.put_u16(0);
            w.put_u16(0);
            w.put_u16(0);
            w.put_u32(0);
            w.put_u32(*offset);
            w.put(name.as_bytes());
        }
        let dir_size = w.len() as u32 - dir_offset;
        let eocd = EndOfCentralDirectoryRecord {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: names.len() as u16,
            directory_records: names.len() as u16,
            directory_size: dir_size,
            directory_offset: dir_offset,
            comment: Vec::new(),
        };
        w.put(&eocd.to_bytes());
        w.into_vec()
    }

    #[test]
    fn finds_simple_archive() {
        let bytes = build_trivial_archive(&["a.txt", "b.txt"]);
        let mut source = BufferSource::new(bytes);
        let cdir = find(&mut source, FinderOptions::default()).unwrap();
        assert_eq!(cdir.entries.len(), 2);
        assert_eq!(cdir.entries[0].name.as_str(), "a.txt");
        assert_eq!(cdir.entries[1].name.as_str(), "b.txt");
        assert!(!cdir.is_zip64);
        assert!(!cdir.is_torrentzip);
    }

    #[test]
    fn finds_archive_with_trailing_comment() {
        let mut bytes = build_trivial_archive(&["only.txt"]);
        // Patch the comment-length field and append comment bytes.
        let comment = b"hello from the end";
        let len = bytes.len();
        bytes[len - 2] = (comment.len() & 0xff) as u8;
        bytes[len - 1] = ((comment.len() >> 8) & 0xff) as u8;
        bytes.extend_from_slice(comment);
        let mut source = BufferSource::new(bytes);
        let cdir = find(&mut source, FinderOptions::default()).unwrap();
        assert_eq!(cdir.entries.len(), 1);
        assert_eq!(cdir.comment, comment);
    }

    #[test]
    fn missing_eocd_is_an_error() {
        let mut source = BufferSource::new(b"not a zip file at all".to_vec());
        let err = find(&mut source, FinderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::DirectoryEndSignatureNotFound)));
    }

    #[test]
    fn multi_disk_eocd_is_rejected() {
        let mut bytes = build_trivial_archive(&["a.txt"]);
        // Patch `disk_nbr` (the first u16 after the EOCD signature) to claim
        // a second disk; `find` must reject this outright rather than
        // silently reading disk 0's central directory as if it were whole.
        let eocd_at = bytes.len() - EndOfCentralDirectoryRecord::MIN_SIZE;
        bytes[eocd_at + 4] = 1;
        let mut source = BufferSource::new(bytes);
        let err = find(&mut source, FinderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(crate::error::UnsupportedError::MultiDisk)));
    }

    #[test]
    fn check_consistency_passes_for_well_formed_archive() {
        let bytes = build_trivial_archive(&["x.bin"]);
        let mut source = BufferSource::new(bytes);
        let cdir = find(&mut source, FinderOptions { check_consistency: true }).unwrap();
        assert_eq!(cdir.entries.len(), 1);
    }
}
