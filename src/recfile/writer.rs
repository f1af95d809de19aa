use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use super::header::{Header, DEFAULT_SYNC_INTERVAL, HEADER_SIZE};
use super::SYNC_ESCAPE;
use crate::error::Result;
use crate::Error;

/// Writes a record file. Records are appended in the order given; the writer
/// does not check that keys are sorted, the index builder does that when the
/// file is indexed.
#[derive(Debug)]
pub struct RecordWriter {
    writer: BufWriter<File>,
    header: Header,
    offset: u64,
    // Record bytes written since the last sync marker.
    since_sync: u64,
}

impl RecordWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_sync_interval(path, DEFAULT_SYNC_INTERVAL)
    }

    pub fn with_sync_interval(path: impl AsRef<Path>, sync_interval: u32) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header::new(sync_interval);
        header.encode(&mut writer)?;

        Ok(Self {
            writer,
            header,
            offset: HEADER_SIZE as u64,
            since_sync: 0,
        })
    }

    /// Appends a key-value pair, preceded by a sync marker whenever at least
    /// `sync_interval` record bytes have accumulated since the last one.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() as u64 >= SYNC_ESCAPE as u64 {
            return Err(Error::Encode(
                "record key",
                io::Error::new(io::ErrorKind::InvalidInput, "key too long"),
            ));
        }

        if self.since_sync >= self.header.sync_interval as u64 {
            self.writer
                .write_u32::<BigEndian>(SYNC_ESCAPE)
                .map_err(|e| Error::Encode("sync escape", e))?;
            self.writer
                .write_all(&self.header.sync_marker)
                .map_err(|e| Error::Encode("sync marker", e))?;
            self.offset += 4 + self.header.sync_marker.len() as u64;
            self.since_sync = 0;
        }

        self.writer
            .write_u32::<BigEndian>(key.len() as u32)
            .map_err(|e| Error::Encode("key length", e))?;
        self.writer
            .write_u32::<BigEndian>(value.len() as u32)
            .map_err(|e| Error::Encode("value length", e))?;
        self.writer
            .write_all(key)
            .map_err(|e| Error::Encode("record key", e))?;
        self.writer
            .write_all(value)
            .map_err(|e| Error::Encode("record value", e))?;

        let written = 8 + key.len() as u64 + value.len() as u64;
        self.offset += written;
        self.since_sync += written;

        Ok(())
    }

    /// Current file offset, i.e. where the next append will land.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flushes buffered records and syncs the file to disk.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_offset_accounting() {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let mut writer =
            RecordWriter::create(temp_file.path()).expect("Failed to create writer");
        assert_eq!(writer.offset(), HEADER_SIZE as u64);

        writer.append(b"key", b"value").expect("Failed to append");
        assert_eq!(writer.offset(), HEADER_SIZE as u64 + 8 + 3 + 5);

        writer.finish().expect("Failed to finish");
        let size = std::fs::metadata(temp_file.path()).unwrap().len();
        assert_eq!(size, HEADER_SIZE as u64 + 16);
    }

    #[test]
    fn test_sync_marker_placement() {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let mut writer = RecordWriter::with_sync_interval(temp_file.path(), 100)
            .expect("Failed to create writer");

        // Each record is 8 + 4 + 8 = 20 bytes, so a marker lands after every
        // fifth record.
        for i in 0..10u32 {
            let key = format!("k{i:03}");
            let value = format!("val-{i:04}");
            writer
                .append(key.as_bytes(), value.as_bytes())
                .expect("Failed to append");
        }
        let final_offset = writer.offset();
        writer.finish().expect("Failed to finish");

        let size = std::fs::metadata(temp_file.path()).unwrap().len();
        assert_eq!(size, final_offset);
        // 10 records plus one marker at the 100-byte boundary.
        assert_eq!(size, HEADER_SIZE as u64 + 10 * 20 + 20);
    }

}
