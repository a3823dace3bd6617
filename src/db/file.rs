use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::warn;

use crate::prelude::FutureResult;

use super::error::FileStoreError;
use super::traits::SnapshotStore;
use super::{decode_snapshot, encode_snapshot, BookSnapshot};

/// A snapshot store writing the serialized book to a single file.
///
/// Saves go through a sibling temporary file followed by a rename, so a crash
/// mid-write leaves the previous snapshot intact. A missing file is a cold
/// start, and so is a file too mangled to parse: a corrupt address book is
/// rediscoverable state, never worth failing the host over.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store persisting to `path`. Parent directories are created on
    /// the first save.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&mut self) -> Result<Option<BookSnapshot>, FileStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match decode_snapshot(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("discarding unreadable snapshot at {:?}: {e}", self.path);
                Ok(None)
            }
        }
    }

    async fn save(&mut self, snapshot: BookSnapshot) -> Result<(), FileStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encode_snapshot(&snapshot))?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl SnapshotStore for FileStore {
    type Error = FileStoreError;

    fn load(&mut self) -> FutureResult<Option<BookSnapshot>, Self::Error> {
        Box::pin(self.load())
    }

    fn save(&mut self, snapshot: BookSnapshot) -> FutureResult<(), Self::Error> {
        Box::pin(self.save(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewEntry, PersistedAddress, SNAPSHOT_VERSION};
    use bitcoin::p2p::address::AddrV2;
    use bitcoin::p2p::ServiceFlags;

    fn sample_snapshot() -> BookSnapshot {
        BookSnapshot {
            version: SNAPSHOT_VERSION,
            new_bucket_count: 1024,
            tried_bucket_count: 256,
            bucket_size: 64,
            tried: Vec::new(),
            new: vec![NewEntry {
                record: PersistedAddress {
                    addr: AddrV2::Ipv4("45.33.2.1".parse().unwrap()),
                    port: 8333,
                    services: ServiceFlags::NETWORK,
                    source: AddrV2::Ipv4("45.33.2.2".parse().unwrap()),
                    last_seen: 1_700_000_000,
                    last_success: 0,
                    last_attempt: 0,
                    attempts: 0,
                },
                positions: vec![(1, 2)],
            }],
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_a_cold_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = FileStore::new(dir.path().join("book.dat"));
        assert!(SnapshotStore::load(&mut store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut store = FileStore::new(dir.path().join("peers").join("book.dat"));
        let snapshot = sample_snapshot();
        SnapshotStore::save(&mut store, snapshot.clone())
            .await
            .unwrap();
        let loaded = SnapshotStore::load(&mut store).await.unwrap();
        assert_eq!(loaded, Some(snapshot));
    }

    #[tokio::test]
    async fn test_garbage_file_is_a_cold_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("book.dat");
        fs::write(&path, b"not a snapshot").unwrap();
        let mut store = FileStore::new(path);
        assert!(SnapshotStore::load(&mut store).await.unwrap().is_none());
    }
}
