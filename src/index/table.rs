use std::cmp::Ordering;

/// A single checkpoint: a key known to start at `offset` in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// The in-memory sparse table: checkpoints ordered by key (equivalently by
/// offset, since the source file is sorted).
///
/// A build pushes checkpoints in file order, which is already sorted. A load
/// pushes them in whatever order the persisted table yields and must call
/// [`sort`](SparseTable::sort) once before the first search.
#[derive(Debug, Clone)]
pub struct SparseTable {
    entries: Vec<Checkpoint>,
}

impl SparseTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(1024),
        }
    }

    pub fn push(&mut self, key: Vec<u8>, offset: u64) {
        self.entries.push(Checkpoint { key, offset });
    }

    pub fn sort(&mut self) {
        self.entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
    }

    /// Finds the closest checkpoint at or before the given key.
    ///
    /// Returns `None` when the key sorts before every checkpoint; callers
    /// prune such keys against the file bounds first, so in practice a
    /// non-empty table always yields a hit.
    pub fn closest(&self, key: &[u8]) -> Option<&Checkpoint> {
        let mut low = 0;
        let mut high = self.entries.len();

        while low < high {
            let mid = (low + high) / 2;

            match self.entries[mid].key.as_slice().cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => {
                    if mid == 0 {
                        break;
                    }
                    high = mid;
                }
                Ordering::Equal => return Some(&self.entries[mid]),
            }
        }

        // No exact match; back up to the closest preceding checkpoint.
        if low > 0 {
            Some(&self.entries[low - 1])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&Checkpoint> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.entries.last()
    }

    /// Checkpoints in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entries.iter()
    }
}

impl Default for SparseTable {
    fn default() -> Self {
        Self::new()
    }
}
