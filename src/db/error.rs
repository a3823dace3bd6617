use std::fmt::{Debug, Display};

use crate::impl_sourceless_error;

/// Errors while parsing a serialized snapshot.
#[derive(Debug)]
pub enum SnapshotDecodeError {
    /// The stream does not start with the snapshot magic bytes.
    BadMagic,
    /// The snapshot was written by a format we do not understand.
    UnsupportedVersion(u8),
    /// The declared bucket geometry cannot belong to a real book.
    BadGeometry,
    /// A field could not be deserialized into a known datatype.
    Encoding(bitcoin::consensus::encode::Error),
}

impl core::fmt::Display for SnapshotDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotDecodeError::BadMagic => {
                write!(f, "the stream does not look like an address book snapshot.")
            }
            SnapshotDecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported snapshot version: {version}.")
            }
            SnapshotDecodeError::BadGeometry => {
                write!(f, "the snapshot declares an impossible bucket geometry.")
            }
            SnapshotDecodeError::Encoding(e) => {
                write!(f, "a field could not be deserialized: {e}")
            }
        }
    }
}

impl std::error::Error for SnapshotDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotDecodeError::Encoding(error) => Some(error),
            _ => None,
        }
    }
}

impl From<bitcoin::consensus::encode::Error> for SnapshotDecodeError {
    fn from(value: bitcoin::consensus::encode::Error) -> Self {
        Self::Encoding(value)
    }
}

/// Errors while reading or writing snapshots on the filesystem.
#[derive(Debug)]
pub enum FileStoreError {
    /// A file or directory could not be opened, created or replaced.
    IO(std::io::Error),
}

impl core::fmt::Display for FileStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStoreError::IO(e) => {
                write!(f, "a file or directory could not be opened or created: {e}")
            }
        }
    }
}

impl std::error::Error for FileStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileStoreError::IO(error) => Some(error),
        }
    }
}

impl From<std::io::Error> for FileStoreError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

/// Errors for the in-memory snapshot store, of which there are none.
#[derive(Debug)]
pub enum MemoryStoreError {}

impl core::fmt::Display for MemoryStoreError {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {}
    }
}

impl_sourceless_error!(MemoryStoreError);

/// Errors while reading or writing snapshots in a SQLite backend.
#[cfg(feature = "database")]
#[derive(Debug)]
pub enum SqlStoreError {
    /// A file or directory could not be opened or created.
    IO(std::io::Error),
    /// An error occured performing a SQL operation.
    SQL(rusqlite::Error),
}

#[cfg(feature = "database")]
impl core::fmt::Display for SqlStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlStoreError::IO(e) => {
                write!(f, "a file or directory could not be opened or created: {e}")
            }
            SqlStoreError::SQL(e) => {
                write!(f, "reading or writing from the database failed: {e}")
            }
        }
    }
}

#[cfg(feature = "database")]
impl std::error::Error for SqlStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SqlStoreError::IO(error) => Some(error),
            SqlStoreError::SQL(error) => Some(error),
        }
    }
}

#[cfg(feature = "database")]
impl From<rusqlite::Error> for SqlStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::SQL(value)
    }
}

#[cfg(feature = "database")]
impl From<std::io::Error> for SqlStoreError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

/// Errors when operating a managed address book.
#[derive(Debug)]
pub enum BookManagerError<S: Debug + Display> {
    /// Reading or writing the snapshot backend failed.
    Store(S),
}

impl<S: Debug + Display> core::fmt::Display for BookManagerError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookManagerError::Store(e) => {
                write!(f, "reading or writing from the snapshot store failed: {e}")
            }
        }
    }
}

impl<S: Debug + Display> std::error::Error for BookManagerError<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl<S: Debug + Display> From<S> for BookManagerError<S> {
    fn from(value: S) -> Self {
        BookManagerError::Store(value)
    }
}
