//! On-disk persistence for the sparse table, so an index can be reloaded
//! without rescanning its source file.
//!
//! The table is an immutable key/value map written exactly once per build:
//!
//! ```text
//! +--------------------------------------------+
//! | magic (u32) | version (u16) | count (u64)  |
//! +--------------------------------------------+
//! | key_len | key | val_len | value | crc64    |
//! +--------------------------------------------+
//! | ...                                        |
//! +--------------------------------------------+
//! ```
//!
//! Values stored by the index builder are always checkpoint offsets in the
//! fixed 8-byte big-endian encoding of [`serialize_offset`]. The entry count
//! in the header is rewritten when the writer closes. Iteration order on
//! reopen is not part of the contract; consumers sort.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

const TABLE_MAGIC: u32 = 0x5349_4658; // ASCII "SIFX"
const TABLE_VERSION: u16 = 1;

/// Encodes a checkpoint offset as stored in the table.
pub fn serialize_offset(offset: u64) -> [u8; 8] {
    offset.to_be_bytes()
}

/// Decodes a checkpoint offset read back from the table.
pub fn deserialize_offset(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        Error::Corrupted(format!("checkpoint offset is {} bytes, want 8", value.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Writes a checkpoint table. Entries may arrive in any order; the builder
/// happens to emit them in key order but readers never rely on that.
pub struct TableWriter {
    file: File,
    writer: BufWriter<File>,
    entry_count: u64,
    path: PathBuf,
}

impl TableWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut writer = BufWriter::new(file.try_clone()?);
        writer
            .write_u32::<BigEndian>(TABLE_MAGIC)
            .map_err(|e| Error::Encode("table magic", e))?;
        writer
            .write_u16::<BigEndian>(TABLE_VERSION)
            .map_err(|e| Error::Encode("table version", e))?;
        // Placeholder count, rewritten on close.
        writer
            .write_u64::<BigEndian>(0)
            .map_err(|e| Error::Encode("entry count", e))?;

        Ok(Self {
            file,
            writer,
            entry_count: 0,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writer
            .write_u32::<BigEndian>(key.len() as u32)
            .map_err(|e| Error::Encode("key length", e))?;
        self.writer
            .write_all(key)
            .map_err(|e| Error::Encode("entry key", e))?;
        self.writer
            .write_u32::<BigEndian>(value.len() as u32)
            .map_err(|e| Error::Encode("value length", e))?;
        self.writer
            .write_all(value)
            .map_err(|e| Error::Encode("entry value", e))?;

        let mut digest = crc64fast::Digest::new();
        digest.write(key);
        digest.write(value);
        self.writer
            .write_u64::<BigEndian>(digest.sum64())
            .map_err(|e| Error::Encode("entry checksum", e))?;

        self.entry_count += 1;
        Ok(())
    }

    /// Flushes all entries, rewrites the header with the final count, and
    /// syncs the file to disk.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;

        self.file.seek(SeekFrom::Start(6))?;
        self.file
            .write_u64::<BigEndian>(self.entry_count)
            .map_err(|e| Error::Encode("entry count", e))?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Reads a checkpoint table back, yielding `(key, value)` pairs and
/// verifying the per-entry checksum as it goes.
pub struct TableReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl TableReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::MissingTable(format!("{}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);

        let magic = reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("table magic", e))?;
        if magic != TABLE_MAGIC {
            return Err(Error::InvalidHeader(format!(
                "unexpected table magic {magic:#010x}"
            )));
        }

        let version = reader
            .read_u16::<BigEndian>()
            .map_err(|e| Error::Decode("table version", e))?;
        if version != TABLE_VERSION {
            return Err(Error::InvalidHeader(format!(
                "unsupported table version {version}"
            )));
        }

        let remaining = reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("entry count", e))?;

        Ok(Self { reader, remaining })
    }

    pub fn entry_count(&self) -> u64 {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let key_len = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("key length", e))? as usize;
        let mut key = vec![0u8; key_len];
        self.reader
            .read_exact(&mut key)
            .map_err(|e| Error::Decode("entry key", e))?;

        let val_len = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("value length", e))? as usize;
        let mut value = vec![0u8; val_len];
        self.reader
            .read_exact(&mut value)
            .map_err(|e| Error::Decode("entry value", e))?;

        let stored = self
            .reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("entry checksum", e))?;

        let mut digest = crc64fast::Digest::new();
        digest.write(&key);
        digest.write(&value);
        let computed = digest.sum64();

        if computed != stored {
            return Err(Error::Corrupted(format!(
                "entry checksum mismatch: stored={stored}, computed={computed}"
            )));
        }
        Ok((key, value))
    }
}

impl Iterator for TableReader {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.read_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn test_table_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".index-sparse-part-0.tbl");

        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100u64)
            .map(|i| {
                (
                    format!("key-{i:04}").into_bytes(),
                    serialize_offset(i * 512).to_vec(),
                )
            })
            .collect();

        let mut writer = TableWriter::create(&path)?;
        for (key, value) in &entries {
            writer.put(key, value)?;
        }
        writer.close()?;

        let reader = TableReader::open(&path)?;
        assert_eq!(reader.entry_count(), 100);
        let read: Vec<(Vec<u8>, Vec<u8>)> = reader.collect::<Result<Vec<_>>>()?;
        assert_eq!(read, entries);

        Ok(())
    }

    #[test]
    fn test_offset_serialization() {
        let encoded = serialize_offset(0x0102_0304_0506_0708);
        assert_eq!(encoded, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            deserialize_offset(&encoded).unwrap(),
            0x0102_0304_0506_0708
        );

        let result = deserialize_offset(&[1, 2, 3]);
        assert!(matches!(result, Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_empty_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".index-sparse-empty.tbl");

        let writer = TableWriter::create(&path)?;
        writer.close()?;

        let mut reader = TableReader::open(&path)?;
        assert_eq!(reader.entry_count(), 0);
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn test_missing_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.tbl");

        let result = TableReader::open(&path);
        assert!(matches!(result, Err(Error::MissingTable(_))));
    }

    #[test]
    fn test_unknown_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.tbl");
        std::fs::write(&path, [0u8; 64]).unwrap();

        let result = TableReader::open(&path);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_corrupted_entry() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("corrupt.tbl");

        let mut writer = TableWriter::create(&path)?;
        writer.put(b"key-0000", &serialize_offset(26))?;
        writer.put(b"key-0001", &serialize_offset(1000))?;
        writer.close()?;

        // Flip a byte inside the first entry's key.
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(14 + 4 + 2))?;
        file.write_all(&[0xFF])?;
        file.sync_all()?;

        let reader = TableReader::open(&path)?;
        let results: Vec<Result<(Vec<u8>, Vec<u8>)>> = reader.collect();
        assert!(matches!(results[0], Err(Error::Corrupted(_))));
        Ok(())
    }

    #[test]
    fn test_truncated_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("truncated.tbl");

        let mut writer = TableWriter::create(&path)?;
        writer.put(b"key-0000", &serialize_offset(26))?;
        writer.put(b"key-0001", &serialize_offset(1000))?;
        writer.close()?;

        let data = std::fs::read(&path)?;
        std::fs::write(&path, &data[..data.len() - 4])?;

        let reader = TableReader::open(&path)?;
        let results: Vec<Result<(Vec<u8>, Vec<u8>)>> = reader.collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        Ok(())
    }
}
