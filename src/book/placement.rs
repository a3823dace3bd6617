//! Salted, deterministic mapping from addresses to bucket positions.
//!
//! Placement is a pure function of (address, source, salt). An attacker who
//! does not know the salt cannot precompute which of their forged addresses
//! collide, while the book itself can always re-derive where an address
//! belongs. Every derivation is domain-separated so the new-table, tried-table
//! and slot mappings are uncorrelated.

use bitcoin::hashes::siphash24;
use bitcoin::p2p::address::AddrV2;
use rand::{thread_rng, Rng};

use crate::netaddr;

/// An address group may only claim this many distinct tried buckets.
const TRIED_BUCKETS_PER_GROUP: u64 = 8;

/// A single source group may only spread its gossip over this many new buckets.
const NEW_BUCKETS_PER_SOURCE_GROUP: u64 = 64;

// Domain tags, one per derivation.
const TAG_TRIED_ENTROPY: &[u8] = b"tried/entropy";
const TAG_TRIED_BUCKET: &[u8] = b"tried/bucket";
const TAG_NEW_ENTROPY: &[u8] = b"new/entropy";
const TAG_NEW_BUCKET: &[u8] = b"new/bucket";
const TAG_SLOT: &[u8] = b"slot";

/// The placement function, carrying the per-instance salt.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    bucket_keys: (u64, u64),
    slot_keys: (u64, u64),
}

impl Placement {
    pub(crate) fn from_salt(salt: &[u8; 32]) -> Self {
        let word = |i: usize| u64::from_le_bytes(salt[i..i + 8].try_into().expect("8 byte chunk"));
        Self {
            bucket_keys: (word(0), word(8)),
            slot_keys: (word(16), word(24)),
        }
    }

    pub(crate) fn random_salt() -> [u8; 32] {
        let mut salt = [0u8; 32];
        thread_rng().fill(&mut salt);
        salt
    }

    fn hash(keys: (u64, u64), tag: &[u8], parts: &[&[u8]]) -> u64 {
        let mut message = Vec::with_capacity(tag.len() + 1 + 16);
        message.extend(tag);
        message.push(0x00); // tag terminator, keeps tags prefix-free
        for part in parts {
            message.extend(*part);
        }
        siphash24::Hash::hash_to_u64_with_keys(keys.0, keys.1, &message)
    }

    /// The tried-table bucket for an address. Each address group is confined
    /// to a small set of buckets, so one operator cannot flood the table.
    pub(crate) fn tried_bucket(&self, addr: &AddrV2, port: u16, bucket_count: usize) -> usize {
        let key = netaddr::hash_key(addr, port);
        let entropy = Self::hash(self.bucket_keys, TAG_TRIED_ENTROPY, &[&key]);
        let slice = (entropy % TRIED_BUCKETS_PER_GROUP).to_le_bytes();
        let group = netaddr::group(addr);
        let hash = Self::hash(self.bucket_keys, TAG_TRIED_BUCKET, &[&group, &slice]);
        (hash % bucket_count as u64) as usize
    }

    /// The new-table bucket for an address learned from `source`. The bucket
    /// depends on the source group, so every gossip origin is confined to its
    /// own slice of the table.
    pub(crate) fn new_bucket(
        &self,
        addr: &AddrV2,
        source: &AddrV2,
        bucket_count: usize,
    ) -> usize {
        let group = netaddr::group(addr);
        let source_group = netaddr::group(source);
        let entropy = Self::hash(self.bucket_keys, TAG_NEW_ENTROPY, &[&source_group, &group]);
        let slice = (entropy % NEW_BUCKETS_PER_SOURCE_GROUP).to_le_bytes();
        let hash = Self::hash(self.bucket_keys, TAG_NEW_BUCKET, &[&source_group, &slice]);
        (hash % bucket_count as u64) as usize
    }

    /// The slot within `bucket` for an address, separated per table.
    pub(crate) fn slot(
        &self,
        new_table: bool,
        bucket: usize,
        addr: &AddrV2,
        port: u16,
        bucket_size: usize,
    ) -> usize {
        let key = netaddr::hash_key(addr, port);
        let table = [new_table as u8];
        let bucket_bytes = (bucket as u64).to_le_bytes();
        let hash = Self::hash(self.slot_keys, TAG_SLOT, &[&table, &bucket_bytes, &key]);
        (hash % bucket_size as u64) as usize
    }
}
