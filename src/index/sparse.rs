use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::persist::{deserialize_offset, serialize_offset, TableReader, TableWriter};
use super::table::SparseTable;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::manifest::{IndexProperties, ManifestEntry};
use crate::recfile::{Scanner, HEADER_SIZE};
use crate::Error;

/// A sparse index over a sorted record file.
///
/// The index holds an in-memory subset of the file's keys. On a get, it
/// binary searches for the closest checkpoint lexicographically at or before
/// the target key, then scans the file from that checkpoint's offset until
/// it either finds the target or passes it. Passing it is proof of absence,
/// which is why the file must be sorted: [`SparseIndex::build`] returns
/// [`Error::NotSorted`] for a file that is not, and the caller has to fall
/// back to indexing every key.
///
/// Besides the in-memory table, a build serializes the checkpoint subset to
/// a sibling file (see [`super::persist`]) so the next process start can
/// [`SparseIndex::load`] without rescanning the source.
#[derive(Debug)]
pub struct SparseIndex {
    path: PathBuf,
    table_path: PathBuf,
    table: SparseTable,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    scanner: Mutex<Scanner<File>>,
}

impl SparseIndex {
    /// Scans through the file and builds the sparse index, checking the
    /// whole time that the file is sorted.
    ///
    /// Until at least `skip_size` bytes have been consumed, every record is
    /// read: sort violations surface promptly, the minimum key is exactly
    /// the first record's key, and tiny files are never passed over. After
    /// that, each iteration records one checkpoint and then jumps
    /// `skip_size` bytes ahead, resynchronizing on the next marker. When a
    /// jump runs off the end of the file, the builder rewinds to the last
    /// checkpoint and reads the tail record-by-record, so the maximum key
    /// is the file's actual last record.
    pub fn build(path: impl Into<PathBuf>, config: IndexConfig) -> Result<Self> {
        let path = path.into();
        let table_path = sibling_table_path(&path);
        let mut scanner = open_scanner(&path)?;

        match build_table(&mut scanner, &table_path, config.skip_size) {
            Ok((table, min_key, max_key)) => {
                tracing::debug!(
                    path = %path.display(),
                    checkpoints = table.len(),
                    "built sparse index"
                );
                Ok(Self {
                    path,
                    table_path,
                    table,
                    min_key,
                    max_key,
                    scanner: Mutex::new(scanner),
                })
            }
            Err(e) => {
                // Never leave a partial checkpoint table behind for a later
                // load to trust.
                let _ = std::fs::remove_file(&table_path);
                Err(e)
            }
        }
    }

    /// Reconstructs an index from its manifest entry and the checkpoint
    /// table saved by a previous build. Does not re-check that the file is
    /// sorted, and never rescans or resynchronizes the source.
    pub fn load(path: impl Into<PathBuf>, entry: &ManifestEntry) -> Result<Self> {
        let path = path.into();
        let table_path = sibling_table_path(&path);
        let scanner = open_scanner(&path)?;
        let source_size = std::fs::metadata(&path)?.len();

        let min_key = entry.properties.min_key.clone();
        let max_key = entry.properties.max_key.clone();

        let mut table = SparseTable::new();
        for item in TableReader::open(&table_path)? {
            let (key, value) = item?;
            let offset = deserialize_offset(&value)?;

            if offset < HEADER_SIZE as u64 || offset >= source_size {
                return Err(Error::Corrupted(format!(
                    "checkpoint offset {offset} outside file of {source_size} bytes"
                )));
            }
            let in_bounds = match (&min_key, &max_key) {
                (Some(min), Some(max)) => {
                    key.as_slice() >= min.as_slice() && key.as_slice() <= max.as_slice()
                }
                _ => false,
            };
            if !in_bounds {
                return Err(Error::Corrupted(
                    "checkpoint key outside manifest bounds".to_string(),
                ));
            }

            table.push(key, offset);
        }

        // The persisted table makes no promise about iteration order.
        table.sort();

        tracing::debug!(
            path = %path.display(),
            checkpoints = table.len(),
            "loaded sparse index"
        );

        Ok(Self {
            path,
            table_path,
            table,
            min_key,
            max_key,
            scanner: Mutex::new(scanner),
        })
    }

    /// Looks up the value for a key.
    ///
    /// Keys outside the file's bounds are rejected from the in-memory
    /// bounds alone; those lookups never touch the file or its lock. For
    /// everything else, the closest checkpoint is found by binary search,
    /// the file is positioned there, and records are scanned forward until
    /// the key is found or passed.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (min_key, max_key) = match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(None),
        };
        if key < min_key.as_slice() || key > max_key.as_slice() {
            return Ok(None);
        }

        // The first checkpoint's key is the minimum key, so any key that
        // survived the bounds check has a checkpoint at or before it.
        let checkpoint = match self.table.closest(key) {
            Some(checkpoint) => checkpoint,
            None => return Ok(None),
        };

        let mut scanner = self.scanner.lock().map_err(|_| Error::MutexPoisoned)?;
        scanner.seek(checkpoint.offset)?;

        while scanner.scan()? {
            match scanner.key().cmp(key) {
                Ordering::Equal => return Ok(Some(scanner.value().to_vec())),
                Ordering::Greater => break,
                Ordering::Less => {}
            }
        }

        Ok(None)
    }

    /// The manifest entry describing this file, for the dataset version
    /// manifest. [`SparseIndex::load`] consumes it in reverse.
    pub fn manifest_entry(&self) -> Result<ManifestEntry> {
        let stat = std::fs::metadata(&self.path)?;

        Ok(ManifestEntry {
            name: self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: stat.len(),
            properties: IndexProperties {
                sparse: true,
                hash_partition: 0,
                min_key: self.min_key.clone(),
                max_key: self.max_key.clone(),
            },
        })
    }

    /// Smallest key in the file, verbatim. `None` for an empty file.
    pub fn min_key(&self) -> Option<&[u8]> {
        self.min_key.as_deref()
    }

    /// Largest key in the file, verbatim. `None` for an empty file.
    pub fn max_key(&self) -> Option<&[u8]> {
        self.max_key.as_deref()
    }

    /// The in-memory checkpoint table.
    pub fn checkpoints(&self) -> &SparseTable {
        &self.table
    }

    /// Path of the persisted checkpoint table.
    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    /// Releases the source file handle. Call after all readers have
    /// quiesced; the persisted table stays on disk for the next load.
    pub fn close(self) {}

    /// Deletes the persisted checkpoint table from disk. Called when the
    /// dataset version owning this file is discarded.
    pub fn cleanup(&self) -> Result<()> {
        tracing::debug!(table = %self.table_path.display(), "removing checkpoint table");
        std::fs::remove_file(&self.table_path).map_err(Error::Io)
    }
}

/// `.index-sparse-<basename>.tbl`, hidden next to the source file.
fn sibling_table_path(path: &Path) -> PathBuf {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    path.with_file_name(format!(".index-sparse-{base}.tbl"))
}

fn open_scanner(path: &Path) -> Result<Scanner<File>> {
    let file = File::open(path)?;
    let mut scanner = Scanner::new(file);
    scanner.read_header()?;
    Ok(scanner)
}

type Bounds = (SparseTable, Option<Vec<u8>>, Option<Vec<u8>>);

fn build_table(scanner: &mut Scanner<File>, table_path: &Path, skip_size: u64) -> Result<Bounds> {
    let mut writer = TableWriter::create(table_path)?;
    let mut table = SparseTable::new();
    let mut min_key: Option<Vec<u8>> = None;
    let mut max_key: Option<Vec<u8>> = None;
    let mut skip = skip_size > 0;

    // Jump through the file, recording keys as we go.
    loop {
        let offset = scanner.position();

        if !scanner.scan_key()? {
            break;
        }
        let key = scanner.key();

        if min_key.is_none() {
            min_key = Some(key.to_vec());
        }

        // Track the maximum key and check sortedness as we go. A key equal
        // to the running maximum is a duplicate; only the first occurrence
        // is indexed, so a lookup scans from there and returns the first
        // record in the run.
        let include = match max_key.as_deref().map(|max| key.cmp(max)) {
            None => {
                max_key = Some(key.to_vec());
                true
            }
            Some(Ordering::Less) => return Err(Error::NotSorted),
            Some(Ordering::Equal) => false,
            Some(Ordering::Greater) => {
                max_key = Some(key.to_vec());
                true
            }
        };

        if include {
            // Both tables take their own copy of the key; the scanner
            // reuses its buffer on the next scan.
            table.push(key.to_vec(), offset);
            writer.put(key, &serialize_offset(offset))?;
        }

        // Don't skip at all until a clump of consecutive records has been
        // read at the beginning of the file.
        if skip && offset > skip_size {
            let checkpoint = offset;
            scanner.seek(scanner.position() + skip_size)?;

            if !scanner.sync()? {
                // Ran off the end of the file while skipping. Jump back to
                // the last checkpoint and read the tail sequentially: the
                // maximum key has to be the actual last record, and another
                // consecutive run of keys double-checks the sort order.
                skip = false;
                scanner.seek(checkpoint)?;
                // Consume the record already recorded at the checkpoint.
                scanner.scan_key()?;
            }
        }
    }

    writer.close()?;
    Ok((table, min_key, max_key))
}
