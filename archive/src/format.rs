//! The append-only archive container.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [0..4)    magic "HARC"
//! [4..8)    u32 format version (currently 1)
//! [8..16)   u64 entry count
//! [16..24)  u64 string table length
//! [24..)    string table (UTF-8 path bytes, back to back)
//! then      entry records, 32 bytes each:
//!             u32 path_off   offset into the string table
//!             u32 path_len
//!             u64 size
//!             i64 mtime_ns
//!             u64 data_off   absolute offset of the file bytes
//! then      file data
//! ```
//!
//! [`read_index`] validates the header and every table reference before
//! anything is served from the archive; [`ArchiveBuilder`] writes the same
//! layout and exists mostly so tests can produce fixtures.

use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"HARC";
pub const VERSION: u32 = 1;

const HEADER_LEN: u64 = 24;
const ENTRY_LEN: u64 = 32;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("bad archive magic")]
    BadMagic,
    #[error("unsupported archive version {0}")]
    Version(u32),
    #[error("archive truncated")]
    Truncated,
    #[error("entry references bytes outside the archive")]
    Bounds,
    #[error("entry path is not valid utf-8")]
    Utf8,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One raw entry record, exactly as stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub path_off: u32,
    pub path_len: u32,
    pub size: u64,
    pub mtime_ns: i64,
    pub data_off: u64,
}

/// The parsed tables of an archive.
#[derive(Debug)]
pub struct Index {
    strings: Vec<u8>,
    entries: Vec<RawEntry>,
}

impl Index {
    pub fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    /// The path of `entry`. In-bounds UTF-8 by construction.
    pub fn path(&self, entry: &RawEntry) -> &str {
        let start = entry.path_off as usize;
        let end = start + entry.path_len as usize;
        std::str::from_utf8(&self.strings[start..end]).expect("validated path bytes")
    }
}

/// Parse and validate the archive tables.
pub fn read_index(file: &fs::File) -> Result<Index, ParseError> {
    let archive_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 4];
    read_exact(&mut reader, &mut magic)?;
    if magic != MAGIC {
        return Err(ParseError::BadMagic);
    }
    let version = read_u32(&mut reader)?;
    if version != VERSION {
        return Err(ParseError::Version(version));
    }
    let entry_count = read_u64(&mut reader)?;
    let string_len = read_u64(&mut reader)?;

    let tables_len = string_len
        .checked_add(entry_count.checked_mul(ENTRY_LEN).ok_or(ParseError::Bounds)?)
        .and_then(|len| len.checked_add(HEADER_LEN))
        .ok_or(ParseError::Bounds)?;
    if tables_len > archive_len {
        return Err(ParseError::Truncated);
    }

    let mut strings = vec![0u8; string_len as usize];
    read_exact(&mut reader, &mut strings)?;

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let entry = RawEntry {
            path_off: read_u32(&mut reader)?,
            path_len: read_u32(&mut reader)?,
            size: read_u64(&mut reader)?,
            mtime_ns: read_i64(&mut reader)?,
            data_off: read_u64(&mut reader)?,
        };
        let path_end = entry
            .path_off
            .checked_add(entry.path_len)
            .ok_or(ParseError::Bounds)? as u64;
        if path_end > string_len {
            return Err(ParseError::Bounds);
        }
        let data_end = entry
            .data_off
            .checked_add(entry.size)
            .ok_or(ParseError::Bounds)?;
        if data_end > archive_len {
            return Err(ParseError::Bounds);
        }
        let start = entry.path_off as usize;
        if std::str::from_utf8(&strings[start..start + entry.path_len as usize]).is_err() {
            return Err(ParseError::Utf8);
        }
        entries.push(entry);
    }

    Ok(Index { strings, entries })
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ParseError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ParseError::Truncated
        } else {
            ParseError::Io(err)
        }
    })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, ParseError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, ParseError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, ParseError> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Writes archives in the layout above.
#[derive(Default)]
pub struct ArchiveBuilder {
    files: Vec<(String, i64, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: &str, mtime_ns: i64, data: &[u8]) -> &mut Self {
        self.files.push((path.to_string(), mtime_ns, data.to_vec()));
        self
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let string_len: u64 = self.files.iter().map(|(path, _, _)| path.len() as u64).sum();
        let entries_off = HEADER_LEN + string_len;
        let mut data_off = entries_off + self.files.len() as u64 * ENTRY_LEN;

        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(self.files.len() as u64).to_le_bytes())?;
        writer.write_all(&string_len.to_le_bytes())?;

        for (path, _, _) in &self.files {
            writer.write_all(path.as_bytes())?;
        }

        let mut path_off = 0u32;
        for (path, mtime_ns, data) in &self.files {
            writer.write_all(&path_off.to_le_bytes())?;
            writer.write_all(&(path.len() as u32).to_le_bytes())?;
            writer.write_all(&(data.len() as u64).to_le_bytes())?;
            writer.write_all(&mtime_ns.to_le_bytes())?;
            writer.write_all(&data_off.to_le_bytes())?;
            path_off += path.len() as u32;
            data_off += data.len() as u64;
        }

        for (_, _, data) in &self.files {
            writer.write_all(data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Seek;

    use super::*;

    fn fixture() -> fs::File {
        let mut file = tempfile::tempfile().expect("tempfile");
        ArchiveBuilder::new()
            .add_file("hello.txt", 42, b"hello")
            .add_file("dir/nested.txt", 7, b"nested bytes")
            .write_to(&mut file)
            .expect("write archive");
        file.rewind().expect("rewind");
        file
    }

    #[test]
    fn roundtrip() {
        let file = fixture();
        let index = read_index(&file).expect("parse");
        assert_eq!(index.entries().len(), 2);

        let first = index.entries()[0];
        assert_eq!(index.path(&first), "hello.txt");
        assert_eq!(first.size, 5);
        assert_eq!(first.mtime_ns, 42);

        let second = index.entries()[1];
        assert_eq!(index.path(&second), "dir/nested.txt");
        assert_eq!(second.size, 12);
        // Data follows the tables contiguously.
        assert_eq!(second.data_off, first.data_off + first.size);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(b"NOPE").expect("write");
        file.rewind().expect("rewind");
        assert!(matches!(read_index(&file), Err(ParseError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_tables() {
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(&MAGIC).expect("write");
        file.write_all(&VERSION.to_le_bytes()).expect("write");
        file.write_all(&100u64.to_le_bytes()).expect("write");
        file.write_all(&0u64.to_le_bytes()).expect("write");
        file.rewind().expect("rewind");
        assert!(matches!(read_index(&file), Err(ParseError::Truncated)));
    }

    #[test]
    fn rejects_out_of_bounds_data() {
        let mut buf = Vec::new();
        ArchiveBuilder::new()
            .add_file("a.txt", 0, b"abc")
            .write_to(&mut buf)
            .expect("write");
        // Corrupt the entry size so data_off + size overruns the file.
        let entry_off = (HEADER_LEN + "a.txt".len() as u64 + 8) as usize;
        buf[entry_off..entry_off + 8].copy_from_slice(&u64::MAX.to_le_bytes());

        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(&buf).expect("write");
        file.rewind().expect("rewind");
        assert!(matches!(read_index(&file), Err(ParseError::Bounds)));
    }
}
