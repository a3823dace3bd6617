//! An async, shareable handle over an address book and its snapshot store.

use std::sync::Arc;

use bitcoin::p2p::address::AddrV2;
use tokio::sync::Mutex;
use tracing::info;

use crate::book::record::PeerAddress;
use crate::book::{AddressBook, RestoreSummary};
use crate::db::error::BookManagerError;
use crate::db::traits::SnapshotStore;
use crate::time::TimeKeeper;

/// Gossip timestamps are penalized by this many seconds unless the peer is
/// telling us about itself.
pub const DEFAULT_TIME_PENALTY: u64 = 2 * 60 * 60;

/// Owns an [`AddressBook`] on behalf of the connection-handling tasks.
///
/// Clones share one book. Every operation takes the book's lock for its full
/// duration and releases it before returning, so concurrent callers observe a
/// linearizable sequence of updates. Disk I/O never happens under that lock:
/// saving snapshots the book first and writes afterwards.
#[derive(Debug)]
pub struct BookManager<S: SnapshotStore> {
    book: Arc<Mutex<AddressBook>>,
    store: Arc<Mutex<S>>,
    clock: Arc<Mutex<TimeKeeper>>,
}

impl<S: SnapshotStore> Clone for BookManager<S> {
    fn clone(&self) -> Self {
        Self {
            book: Arc::clone(&self.book),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: SnapshotStore> BookManager<S> {
    /// Wrap a book and a snapshot backend into a shared handle.
    pub fn new(book: AddressBook, store: S) -> Self {
        Self {
            book: Arc::new(Mutex::new(book)),
            store: Arc::new(Mutex::new(store)),
            clock: Arc::new(Mutex::new(TimeKeeper::default())),
        }
    }

    async fn now(&self) -> u64 {
        self.clock.lock().await.now()
    }

    /// Feed the clock a peer-reported timestamp from a handshake.
    pub async fn record_peer_time(&self, peer_unix: u64) {
        self.clock.lock().await.add_peer_time(peer_unix);
    }

    /// Insert a batch of gossiped addresses learned from `source`. Returns
    /// whether any address was previously unknown, which callers use to
    /// decide if the gossip is worth relaying further.
    pub async fn add(&self, addrs: &[PeerAddress], source: &AddrV2, penalty: u64) -> bool {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.add_many(addrs, source, penalty, now) > 0
    }

    /// Record a completed handshake with an address, promoting it toward the
    /// tried table.
    pub async fn good(&self, addr: &AddrV2, port: u16) {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.good(addr, port, now);
    }

    /// Record that we are dialing an address.
    pub async fn attempt(&self, addr: &AddrV2, port: u16) {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.attempt(addr, port, now);
    }

    /// Record that a connection to an address is currently alive.
    pub async fn connected(&self, addr: &AddrV2, port: u16) {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.connected(addr, port, now);
    }

    /// Pick one address to dial, or `None` if the book has no candidates.
    pub async fn select(&self, new_only: bool) -> Option<PeerAddress> {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.select(new_only, now)
    }

    /// A capped, shuffled sample of relay-worthy addresses for a peer that
    /// asked.
    pub async fn get_addr(&self, max_count: usize, max_pct: usize) -> Vec<PeerAddress> {
        let now = self.now().await;
        let mut book = self.book.lock().await;
        book.get_addr(max_count, max_pct, now)
    }

    /// Total number of addresses known.
    pub async fn size(&self) -> usize {
        self.book.lock().await.len()
    }

    /// Forget every known address.
    pub async fn clear(&self) {
        self.book.lock().await.clear();
    }

    /// Persist the current state of the book. The snapshot is taken under the
    /// book lock; the write happens after it is released.
    pub async fn save(&self) -> Result<(), BookManagerError<S::Error>> {
        let snapshot = {
            let book = self.book.lock().await;
            book.snapshot()
        };
        let mut store = self.store.lock().await;
        store.save(snapshot).await.map_err(BookManagerError::Store)
    }

    /// Restore the book from the snapshot store. An empty store is a cold
    /// start and leaves the book empty and valid.
    pub async fn load(&self) -> Result<RestoreSummary, BookManagerError<S::Error>> {
        let snapshot = {
            let mut store = self.store.lock().await;
            store.load().await.map_err(BookManagerError::Store)?
        };
        let Some(snapshot) = snapshot else {
            info!("no address book snapshot found, starting cold");
            return Ok(RestoreSummary {
                restored: 0,
                dropped: 0,
            });
        };
        let mut book = self.book.lock().await;
        let summary = book.restore(snapshot);
        info!(
            "restored {} addresses from snapshot, dropped {}",
            summary.restored, summary.dropped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::p2p::ServiceFlags;

    use super::*;
    use crate::config::BookConfig;
    use crate::db::memory::MemoryStore;
    use crate::prelude::unix_now;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> AddrV2 {
        AddrV2::Ipv4(std::net::Ipv4Addr::new(a, b, c, d))
    }

    fn gossip(addr: AddrV2) -> PeerAddress {
        PeerAddress::new(addr, 8333, ServiceFlags::NETWORK, unix_now())
    }

    #[tokio::test]
    async fn test_manager_flow() {
        let manager = BookManager::new(AddressBook::new(BookConfig::default()), MemoryStore::new());
        let source = v4(51, 52, 53, 54);

        let batch: Vec<PeerAddress> = (0..10u8).map(|i| gossip(v4(60, i, 1, 1))).collect();
        assert!(manager.add(&batch, &source, 0).await);
        assert!(!manager.add(&batch, &source, 0).await);
        assert_eq!(manager.size().await, 10);

        manager.attempt(&v4(60, 0, 1, 1), 8333).await;
        manager.good(&v4(60, 0, 1, 1), 8333).await;
        assert!(manager.select(false).await.is_some());
        assert!(manager.get_addr(5, 100).await.len() <= 5);

        manager.clear().await;
        assert_eq!(manager.size().await, 0);
        assert_eq!(manager.select(false).await, None);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let manager = BookManager::new(AddressBook::new(BookConfig::default()), MemoryStore::new());
        let source = v4(51, 52, 53, 54);
        let batch: Vec<PeerAddress> = (0..25u8).map(|i| gossip(v4(60, i, 1, 1))).collect();
        manager.add(&batch, &source, 0).await;
        manager.good(&v4(60, 3, 1, 1), 8333).await;
        let size = manager.size().await;

        manager.save().await.unwrap();
        manager.clear().await;
        let summary = manager.load().await.unwrap();
        assert_eq!(summary.restored, size);
        assert_eq!(summary.dropped, 0);
        assert_eq!(manager.size().await, size);
    }

    #[tokio::test]
    async fn test_cold_start_load() {
        let manager = BookManager::new(AddressBook::new(BookConfig::default()), MemoryStore::new());
        let summary = manager.load().await.unwrap();
        assert_eq!(summary.restored, 0);
        assert_eq!(manager.size().await, 0);
    }
}
