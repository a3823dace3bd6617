//! An eclipse-resistant address manager for Bitcoin P2P nodes.
//!
//! Nodes on a peer-to-peer network must keep finding peers to dial without
//! trusting any single party to tell them who exists. This crate maintains
//! that view of the network: a bounded [`AddressBook`] of gossiped addresses,
//! split into a *new* table for hearsay and a *tried* table for addresses
//! that actually answered, with salted deterministic bucket placement so an
//! attacker flooding us with addresses cannot choose what they displace.
//!
//! The connection-handling side of a node drives the book through a
//! [`BookManager`], which serializes access behind a lock and persists
//! snapshots through a pluggable [`SnapshotStore`](db::traits::SnapshotStore):
//! a flat file, a SQLite database, or plain memory for nodes that should
//! forget everything on shutdown.
//!
//! ```no_run
//! use peerbook::{AddressBook, BookConfig, BookManager};
//! use peerbook::db::file::FileStore;
//!
//! # async fn run() {
//! let book = AddressBook::new(BookConfig::default());
//! let store = FileStore::new("data/book.dat".into());
//! let manager = BookManager::new(book, store);
//! manager.load().await.unwrap();
//! if let Some(_peer) = manager.select(false).await {
//!     // dial the peer, then report back with attempt/good/connected
//! }
//! # }
//! ```

/// The address book and its bucket machinery.
pub mod book;
/// Address book configuration options.
pub mod config;
/// Snapshot persistence: formats, backends and their errors.
pub mod db;
/// The async handle shared between connection tasks.
pub mod manager;
mod netaddr;
mod prelude;
/// Network-adjusted time from peer-reported clocks.
pub mod time;

pub use bitcoin::p2p::address::AddrV2;
pub use bitcoin::p2p::ServiceFlags;

pub use book::record::PeerAddress;
pub use book::{AddressBook, RestoreSummary};
pub use config::BookConfig;
pub use db::BookSnapshot;
pub use manager::BookManager;
pub use netaddr::is_routable;
pub use time::TimeKeeper;
