use std::fmt::{Debug, Display};

use crate::prelude::FutureResult;

use super::BookSnapshot;

/// Methods required to persist an address book between sessions.
///
/// A backend stores whole snapshots: the book is saved and restored as a
/// unit, never record by record, so the backend needs no knowledge of bucket
/// semantics.
pub trait SnapshotStore: Debug + Send + Sync {
    /// Errors that may occur within a [`SnapshotStore`].
    type Error: Debug + Display;

    /// Load the most recently saved snapshot, or `None` when nothing was ever
    /// saved. A missing snapshot is a cold start, not an error.
    fn load(&mut self) -> FutureResult<Option<BookSnapshot>, Self::Error>;

    /// Replace the stored snapshot with a new one.
    fn save(&mut self, snapshot: BookSnapshot) -> FutureResult<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Errors for the [`SnapshotStore`] of unit type.
    #[derive(Debug)]
    pub enum UnitStoreError {}

    impl core::fmt::Display for UnitStoreError {
        fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match *self {}
        }
    }

    impl SnapshotStore for () {
        type Error = UnitStoreError;

        fn load(&mut self) -> FutureResult<Option<BookSnapshot>, Self::Error> {
            async fn do_load() -> Result<Option<BookSnapshot>, UnitStoreError> {
                Ok(None)
            }
            Box::pin(do_load())
        }

        fn save(&mut self, _snapshot: BookSnapshot) -> FutureResult<(), Self::Error> {
            async fn do_save() -> Result<(), UnitStoreError> {
                Ok(())
            }
            Box::pin(do_save())
        }
    }

    #[tokio::test]
    async fn test_unit_store() {
        let mut store = ();
        assert!(store.load().await.unwrap().is_none());
    }
}
