use std::fmt::Display;
use std::io;

/// siftkv errors.
#[derive(Debug)]
pub enum Error {
    /// An IO error from the underlying file.
    Io(io::Error),
    /// A read of the named on-disk field failed.
    Decode(&'static str, io::Error),
    /// A write of the named on-disk field failed.
    Encode(&'static str, io::Error),
    /// A file header carried an unknown magic number or version.
    InvalidHeader(String),
    /// On-disk data failed a consistency check (sync marker mismatch,
    /// checksum mismatch, checkpoint outside the file bounds).
    Corrupted(String),
    /// The persisted checkpoint table could not be opened. The index must be
    /// rebuilt from the source file.
    MissingTable(String),
    /// The source file is not sorted by key, so it cannot be sparsely
    /// indexed. The caller must fall back to a full index.
    NotSorted,
    /// The scanner lock was poisoned by a panicking reader.
    MutexPoisoned,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::Decode(_, err) | Error::Encode(_, err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Decode(field, err) => write!(f, "failed to decode {field}: {err}"),
            Error::Encode(field, err) => write!(f, "failed to encode {field}: {err}"),
            Error::InvalidHeader(msg) => write!(f, "invalid header: {msg}"),
            Error::Corrupted(msg) => write!(f, "corrupted data: {msg}"),
            Error::MissingTable(msg) => write!(f, "missing checkpoint table: {msg}"),
            Error::NotSorted => write!(f, "file is not sorted, cannot build a sparse index"),
            Error::MutexPoisoned => write!(f, "scanner lock poisoned"),
        }
    }
}

/// A siftkv Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
