/// Configuration for building a sparse file index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Minimum byte distance between recorded checkpoints (default: 100000).
    ///
    /// Must be zero or at least the source file's sync interval, ideally a
    /// small integer multiple of it. Zero disables skipping entirely, so
    /// every record in the file becomes a checkpoint.
    pub skip_size: u64,
}

pub const DEFAULT_SKIP_SIZE: u64 = 100_000;

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            skip_size: DEFAULT_SKIP_SIZE,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum byte distance between checkpoints.
    pub fn skip_size(mut self, size: u64) -> Self {
        self.skip_size = size;
        self
    }
}
