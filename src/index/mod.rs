//! Sparse indexes over sorted record files.
//!
//! A sparse index holds an in-memory subset of the keys in its file. On a
//! get, instead of looking up the offset of the key directly as a total
//! index would, it binary searches for the closest checkpoint at or before
//! the target key, then scans the file from that offset until it finds the
//! key or passes it.

pub mod persist;
pub mod sparse;
pub mod table;

pub use sparse::SparseIndex;
