use serde::{Deserialize, Serialize};

/// Metadata describing one indexed file within a dataset version manifest.
///
/// Produced by [`SparseIndex::manifest_entry`](crate::SparseIndex) after a
/// build and consumed by [`SparseIndex::load`](crate::SparseIndex) on
/// restart, so the bounds never have to be re-derived from the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Base name of the source file.
    pub name: String,
    /// Size of the source file in bytes.
    pub size: u64,
    pub properties: IndexProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProperties {
    /// Whether the file is served through a sparse index.
    pub sparse: bool,
    /// Reserved for sharding a single logical dataset across multiple files
    /// by key hash. Always 0 for now; never interpreted here.
    pub hash_partition: i32,
    /// Smallest key in the file, verbatim. `None` for an empty file.
    pub min_key: Option<Vec<u8>>,
    /// Largest key in the file, verbatim. `None` for an empty file.
    pub max_key: Option<Vec<u8>>,
}
