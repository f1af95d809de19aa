use std::io::{self, BufReader, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use super::header::{Header, HEADER_SIZE, SYNC_MARKER_SIZE};
use super::SYNC_ESCAPE;
use crate::error::Result;
use crate::Error;

/// Reads records sequentially from a record file.
///
/// The scanner is stateful: it holds the current byte position and the key
/// and value buffers of the last record read. `scan_key` advances past a
/// record without materializing its value, which is what the index builder
/// wants; `scan` materializes both.
///
/// Seeks are only safe to offsets where a record (or a sync block preceding
/// one) is known to begin. After a blind seek to any other offset, `sync`
/// realigns the scanner on the next sync marker.
#[derive(Debug)]
pub struct Scanner<R: Read + Seek> {
    reader: BufReader<R>,
    header: Option<Header>,
    pos: u64,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl<R: Read + Seek> Scanner<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
            header: None,
            pos: 0,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Consumes and validates the file preamble. Must be called once, before
    /// any scanning.
    pub fn read_header(&mut self) -> Result<()> {
        let header = Header::decode(&mut self.reader)?;
        self.pos = HEADER_SIZE as u64;
        self.header = Some(header);
        Ok(())
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Byte offset the next `scan` or `scan_key` will read from.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Key of the last record scanned.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value of the last record scanned. Empty after `scan_key`.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Repositions the scanner at an absolute byte offset, discarding any
    /// buffered data.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Io)?;
        self.pos = offset;
        Ok(())
    }

    /// Advances past the next record, materializing key and value. Returns
    /// false at a clean end of file.
    pub fn scan(&mut self) -> Result<bool> {
        self.next_record(true)
    }

    /// Advances past the next record, materializing only the key. Returns
    /// false at a clean end of file.
    pub fn scan_key(&mut self) -> Result<bool> {
        self.next_record(false)
    }

    /// After a blind seek, advances to the position just past the next sync
    /// marker, so the next `scan` yields a whole record. Returns false if no
    /// marker exists before end of file.
    pub fn sync(&mut self) -> Result<bool> {
        let header = self.require_header()?;

        let mut target = [0u8; 4 + SYNC_MARKER_SIZE];
        target[..4].copy_from_slice(&SYNC_ESCAPE.to_be_bytes());
        target[4..].copy_from_slice(&header.sync_marker);

        let mut window = [0u8; 4 + SYNC_MARKER_SIZE];
        let mut filled = 0;

        loop {
            let mut byte = [0u8; 1];
            match self.reader.read_exact(&mut byte) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(Error::Io(e)),
            }
            self.pos += 1;

            if filled < window.len() {
                window[filled] = byte[0];
                filled += 1;
            } else {
                window.copy_within(1.., 0);
                window[window.len() - 1] = byte[0];
            }

            if filled == window.len() && window == target {
                return Ok(true);
            }
        }
    }

    fn next_record(&mut self, with_value: bool) -> Result<bool> {
        loop {
            // A clean EOF can only occur here, at a record boundary. EOF
            // anywhere further into the frame is corruption.
            let key_len = match self.reader.read_u32::<BigEndian>() {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(e) => return Err(Error::Io(e)),
            };
            self.pos += 4;

            if key_len == SYNC_ESCAPE {
                self.read_sync_marker()?;
                continue;
            }

            let val_len = self
                .reader
                .read_u32::<BigEndian>()
                .map_err(|e| Error::Decode("value length", e))?;
            self.pos += 4;

            self.key.resize(key_len as usize, 0);
            self.reader
                .read_exact(&mut self.key)
                .map_err(|e| Error::Decode("record key", e))?;
            self.pos += key_len as u64;

            if with_value {
                self.value.resize(val_len as usize, 0);
                self.reader
                    .read_exact(&mut self.value)
                    .map_err(|e| Error::Decode("record value", e))?;
            } else {
                self.value.clear();
                self.reader
                    .seek_relative(val_len as i64)
                    .map_err(|e| Error::Decode("record value", e))?;
            }
            self.pos += val_len as u64;

            return Ok(true);
        }
    }

    fn read_sync_marker(&mut self) -> Result<()> {
        let expected = self.require_header()?.sync_marker;

        let mut marker = [0u8; SYNC_MARKER_SIZE];
        self.reader
            .read_exact(&mut marker)
            .map_err(|e| Error::Decode("sync marker", e))?;
        self.pos += SYNC_MARKER_SIZE as u64;

        if marker != expected {
            return Err(Error::Corrupted(format!(
                "sync marker mismatch at offset {}",
                self.pos - SYNC_MARKER_SIZE as u64
            )));
        }
        Ok(())
    }

    fn require_header(&self) -> Result<&Header> {
        self.header.as_ref().ok_or_else(|| {
            Error::InvalidHeader("scanner used before read_header".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recfile::writer::RecordWriter;
    use std::fs::File;
    use tempfile::NamedTempFile;

    fn write_records(
        sync_interval: u32,
        entries: &[(&[u8], &[u8])],
    ) -> NamedTempFile {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let mut writer = RecordWriter::with_sync_interval(temp_file.path(), sync_interval)
            .expect("Failed to create writer");
        for (key, value) in entries {
            writer.append(key, value).expect("Failed to append");
        }
        writer.finish().expect("Failed to finish");
        temp_file
    }

    fn open_scanner(temp_file: &NamedTempFile) -> Scanner<File> {
        let file = File::open(temp_file.path()).expect("Failed to open file");
        let mut scanner = Scanner::new(file);
        scanner.read_header().expect("Failed to read header");
        scanner
    }

    #[test]
    fn test_scan_roundtrip() {
        let entries: Vec<(&[u8], &[u8])> = vec![
            (b"apple", b"fruit"),
            (b"banana", b"fruit"),
            (b"cherry", b"fruit"),
        ];
        let temp_file = write_records(2000, &entries);
        let mut scanner = open_scanner(&temp_file);

        for (key, value) in &entries {
            assert!(scanner.scan().expect("Failed to scan"));
            assert_eq!(scanner.key(), *key);
            assert_eq!(scanner.value(), *value);
        }
        assert!(!scanner.scan().expect("Scan past EOF failed"));
    }

    #[test]
    fn test_scan_key_skips_value() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"b", b"2")];
        let temp_file = write_records(2000, &entries);
        let mut scanner = open_scanner(&temp_file);

        assert!(scanner.scan_key().unwrap());
        assert_eq!(scanner.key(), b"a");
        assert!(scanner.value().is_empty());

        // The value bytes were still consumed, so the next scan starts at
        // the following record.
        assert!(scanner.scan().unwrap());
        assert_eq!(scanner.key(), b"b");
        assert_eq!(scanner.value(), b"2");
    }

    #[test]
    fn test_scan_through_sync_markers() {
        // A tiny sync interval forces a marker between every pair of records.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50u32)
            .map(|i| {
                (
                    format!("key-{i:04}").into_bytes(),
                    format!("value-{i:04}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let temp_file = write_records(16, &borrowed);
        let mut scanner = open_scanner(&temp_file);

        let mut count = 0;
        while scanner.scan().expect("Failed to scan") {
            assert_eq!(scanner.key(), entries[count].0.as_slice());
            assert_eq!(scanner.value(), entries[count].1.as_slice());
            count += 1;
        }
        assert_eq!(count, entries.len());
    }

    #[test]
    fn test_position_is_resumable() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"b", b"2"), (b"c", b"3")];
        let temp_file = write_records(2000, &entries);
        let mut scanner = open_scanner(&temp_file);

        assert!(scanner.scan().unwrap());
        let offset = scanner.position();
        assert!(scanner.scan().unwrap());
        assert_eq!(scanner.key(), b"b");

        // Seeking back to a recorded position replays the same record.
        scanner.seek(offset).expect("Failed to seek");
        assert!(scanner.scan().unwrap());
        assert_eq!(scanner.key(), b"b");
        assert_eq!(scanner.value(), b"2");
    }

    #[test]
    fn test_sync_realigns_after_blind_seek() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..200u32)
            .map(|i| {
                (
                    format!("key-{i:04}").into_bytes(),
                    format!("value-{i:04}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let temp_file = write_records(100, &borrowed);
        let mut scanner = open_scanner(&temp_file);

        // Land in the middle of some record's bytes.
        scanner.seek(HEADER_SIZE as u64 + 13).expect("Failed to seek");
        assert!(scanner.sync().expect("Failed to sync"));

        // The next scan yields a whole record from the file.
        assert!(scanner.scan().expect("Failed to scan"));
        assert!(entries
            .iter()
            .any(|(k, v)| k.as_slice() == scanner.key() && v.as_slice() == scanner.value()));
    }

    #[test]
    fn test_sync_reports_eof_without_marker() {
        // Large interval: the file contains no sync marker at all.
        let entries: Vec<(&[u8], &[u8])> = vec![(b"a", b"1"), (b"b", b"2")];
        let temp_file = write_records(1_000_000, &entries);
        let mut scanner = open_scanner(&temp_file);

        scanner.seek(HEADER_SIZE as u64 + 1).expect("Failed to seek");
        assert!(!scanner.sync().expect("Sync failed"));
    }

    #[test]
    fn test_truncated_record_is_corruption() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"abcdef", b"123456")];
        let temp_file = write_records(2000, &entries);

        let data = std::fs::read(temp_file.path()).unwrap();
        let truncated = NamedTempFile::new().unwrap();
        std::fs::write(truncated.path(), &data[..data.len() - 3]).unwrap();

        let mut scanner = open_scanner(&truncated);
        let result = scanner.scan();
        assert!(matches!(result, Err(Error::Decode("record value", _))));
    }

    #[test]
    fn test_foreign_sync_marker_is_corruption() {
        // Splice the records of one file after the header of another; the
        // marker bytes no longer match the header's.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
            .map(|i| {
                (
                    format!("key-{i:04}").into_bytes(),
                    format!("value-{i:04}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let file_a = write_records(50, &borrowed);
        let file_b = write_records(50, &borrowed);

        let header = &std::fs::read(file_a.path()).unwrap()[..HEADER_SIZE];
        let body = &std::fs::read(file_b.path()).unwrap()[HEADER_SIZE..];
        let spliced = NamedTempFile::new().unwrap();
        std::fs::write(spliced.path(), [header, body].concat()).unwrap();

        let mut scanner = open_scanner(&spliced);
        let mut result = Ok(true);
        while matches!(result, Ok(true)) {
            result = scanner.scan();
        }
        assert!(matches!(result, Err(Error::Corrupted(_))));
    }
}
