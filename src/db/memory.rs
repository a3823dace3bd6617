use crate::prelude::FutureResult;

use super::error::MemoryStoreError;
use super::traits::SnapshotStore;
use super::BookSnapshot;

/// A snapshot store that keeps everything in memory and forgets it when the
/// session ends. Nodes using it rediscover the network on every start, which
/// suits tests and privacy-conscious setups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Option<BookSnapshot>,
}

impl MemoryStore {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn load(&mut self) -> Result<Option<BookSnapshot>, MemoryStoreError> {
        Ok(self.snapshot.clone())
    }

    async fn save(&mut self, snapshot: BookSnapshot) -> Result<(), MemoryStoreError> {
        self.snapshot = Some(snapshot);
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    type Error = MemoryStoreError;

    fn load(&mut self) -> FutureResult<Option<BookSnapshot>, Self::Error> {
        Box::pin(self.load())
    }

    fn save(&mut self, snapshot: BookSnapshot) -> FutureResult<(), Self::Error> {
        Box::pin(self.save(snapshot))
    }
}
