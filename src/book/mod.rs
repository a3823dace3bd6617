//! The address book keeps track of every peer address this node has heard of
//! and decides which ones are worth dialing. It is the main line of defense
//! against eclipse attacks: addresses are pinned into buckets derived from a
//! secret salt, so an attacker flooding us with gossip cannot choose where
//! their addresses land, and verified addresses are protected in a separate
//! table that gossip alone can never touch.

use std::collections::HashMap;

use bitcoin::p2p::address::AddrV2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::BookConfig;
use crate::db::{BookSnapshot, NewEntry, PersistedAddress, TriedEntry, SNAPSHOT_VERSION};
use crate::netaddr;

pub(crate) mod placement;
/// Peer addresses and the metadata retained about them.
pub mod record;
pub(crate) mod table;

use placement::Placement;
use record::{AddressRecord, PeerAddress};
use table::BucketTable;

/// Give up on a selection round after this many random draws.
const SELECT_DRAW_LIMIT: usize = 4096;

/// Below this many occupants, selection scans the table instead of probing
/// random slots.
const SPARSE_SELECT_THRESHOLD: usize = 1024;

/// How often a live connection refreshes the last-seen timestamp.
const CONNECTED_REFRESH: u64 = 20 * 60;

/// An address seen within this window counts as currently online, making us
/// reluctant to accept newer gossiped timestamps for it.
const ONLINE_HORIZON: u64 = 24 * 60 * 60;

const UPDATE_INTERVAL_ONLINE: u64 = 60 * 60;
const UPDATE_INTERVAL_OFFLINE: u64 = 24 * 60 * 60;

type AddrKey = (AddrV2, u16);

/// Outcome of rebuilding a book from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records accepted into the rebuilt book.
    pub restored: usize,
    /// Records dropped because their stored placement was invalid.
    pub dropped: usize,
}

/// A bounded, bucketed database of peer addresses.
///
/// Addresses live in one of two tables: the *new* table for gossip we have
/// never verified, and the *tried* table for addresses that answered at least
/// one connection. All records are owned by a single arena; the tables hold
/// arena ids only. Every operation takes the current adjusted network time
/// from the caller, so the book itself never consults a clock.
#[derive(Debug, Clone)]
pub struct AddressBook {
    cfg: BookConfig,
    placement: Placement,
    records: HashMap<u32, AddressRecord>,
    by_key: HashMap<AddrKey, u32>,
    new_table: BucketTable,
    tried_table: BucketTable,
    new_count: usize,
    tried_count: usize,
    next_id: u32,
    rng: StdRng,
}

impl AddressBook {
    /// An empty book with a freshly randomized placement salt.
    pub fn new(cfg: BookConfig) -> Self {
        Self::build(cfg, Placement::random_salt(), StdRng::from_entropy())
    }

    /// An empty book with an explicit placement salt. The salt also seeds the
    /// internal random state, making the bucket layout a pure function of the
    /// operations applied. Production nodes should prefer [`AddressBook::new`];
    /// a predictable salt surrenders the anti-collision defense.
    pub fn with_salt(cfg: BookConfig, salt: [u8; 32]) -> Self {
        Self::build(cfg, salt, StdRng::from_seed(salt))
    }

    fn build(cfg: BookConfig, salt: [u8; 32], rng: StdRng) -> Self {
        Self {
            placement: Placement::from_salt(&salt),
            records: HashMap::new(),
            by_key: HashMap::new(),
            new_table: BucketTable::new(cfg.new_bucket_count, cfg.bucket_size),
            tried_table: BucketTable::new(cfg.tried_bucket_count, cfg.bucket_size),
            new_count: 0,
            tried_count: 0,
            next_id: 0,
            rng,
            cfg,
        }
    }

    /// Total number of addresses known, across both tables.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the book knows no addresses at all.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of addresses awaiting a first successful connection.
    pub fn new_count(&self) -> usize {
        self.new_count
    }

    /// Number of addresses that answered us at least once.
    pub fn tried_count(&self) -> usize {
        self.tried_count
    }

    /// Forget everything. The placement salt is retained.
    pub fn clear(&mut self) {
        self.records.clear();
        self.by_key.clear();
        self.new_table.reset();
        self.tried_table.reset();
        self.new_count = 0;
        self.tried_count = 0;
    }

    /// Insert a batch of gossiped addresses from one source, returning how
    /// many were previously unknown. Unroutable or zero-port entries are
    /// dropped without affecting the rest of the batch. `penalty` is
    /// subtracted from every claimed timestamp, damping sources that
    /// advertise everything as seen just now.
    pub fn add_many(
        &mut self,
        addrs: &[PeerAddress],
        source: &AddrV2,
        penalty: u64,
        now: u64,
    ) -> usize {
        let mut added = 0;
        for addr in addrs {
            if self.add(addr, source, penalty, now) {
                added += 1;
            }
        }
        added
    }

    /// Insert or refresh a single gossiped address. Returns whether the
    /// address was previously unknown and claimed a slot.
    pub fn add(&mut self, addr: &PeerAddress, source: &AddrV2, penalty: u64, now: u64) -> bool {
        if addr.port == 0 || !netaddr::is_routable(&addr.addr) {
            debug!("dropping unroutable gossip: {:?}", addr.addr);
            return false;
        }
        let seen = addr.last_seen.saturating_sub(penalty).min(now);
        if let Some(&id) = self.by_key.get(&(addr.addr.clone(), addr.port)) {
            self.refresh_known(id, addr, source, seen, now);
            return false;
        }

        let bucket = self
            .placement
            .new_bucket(&addr.addr, source, self.cfg.new_bucket_count);
        let slot = self
            .placement
            .slot(true, bucket, &addr.addr, addr.port, self.cfg.bucket_size);
        if !self.new_slot_yields(bucket, slot, 0, now) {
            return false;
        }
        self.evict_new_slot(bucket, slot);

        let mut rec = AddressRecord::new(
            addr.addr.clone(),
            addr.port,
            addr.services,
            source.clone(),
            seen,
        );
        rec.ref_count = 1;
        let id = self.next_id;
        self.next_id += 1;
        self.new_table.set(bucket, slot, id);
        self.by_key.insert((addr.addr.clone(), addr.port), id);
        self.records.insert(id, rec);
        self.new_count += 1;
        true
    }

    /// Refresh metadata for an address we already track, possibly granting it
    /// one more new-table reference when another source vouches for it.
    fn refresh_known(&mut self, id: u32, addr: &PeerAddress, source: &AddrV2, seen: u64, now: u64) {
        let current_refs = {
            let rec = self
                .records
                .get_mut(&id)
                .expect("key index points at a live record");
            let online = now.saturating_sub(rec.last_seen) < ONLINE_HORIZON;
            let interval = if online {
                UPDATE_INTERVAL_ONLINE
            } else {
                UPDATE_INTERVAL_OFFLINE
            };
            if seen > rec.last_seen.saturating_add(interval) {
                rec.last_seen = seen;
            }
            rec.services = rec.services | addr.services;
            if rec.in_tried || rec.ref_count >= self.cfg.max_new_references {
                return;
            }
            // each extra reference is exponentially harder to earn
            let odds = 1u64 << rec.ref_count.min(16);
            if odds > 1 && self.rng.gen_range(0..odds) != 0 {
                return;
            }
            rec.ref_count
        };

        let bucket = self
            .placement
            .new_bucket(&addr.addr, source, self.cfg.new_bucket_count);
        let slot = self
            .placement
            .slot(true, bucket, &addr.addr, addr.port, self.cfg.bucket_size);
        if self.new_table.get(bucket, slot) == Some(id) {
            return;
        }
        if !self.new_slot_yields(bucket, slot, current_refs, now) {
            return;
        }
        self.evict_new_slot(bucket, slot);
        self.new_table.set(bucket, slot, id);
        self.records
            .get_mut(&id)
            .expect("key index points at a live record")
            .ref_count += 1;
    }

    /// Whether a new-table slot is free, or held by an occupant weak enough
    /// to displace: terrible, or multiply referenced while the newcomer would
    /// hold its only reference.
    fn new_slot_yields(&self, bucket: usize, slot: usize, newcomer_refs: u32, now: u64) -> bool {
        match self.new_table.get(bucket, slot) {
            None => true,
            Some(occupant) => {
                let occupant = self
                    .records
                    .get(&occupant)
                    .expect("table slot points at a live record");
                occupant.is_terrible(now, &self.cfg)
                    || (occupant.ref_count > 1 && newcomer_refs == 0)
            }
        }
    }

    /// Empty a new-table slot, deleting the occupant when this was its last
    /// reference.
    fn evict_new_slot(&mut self, bucket: usize, slot: usize) {
        let Some(occupant) = self.new_table.get(bucket, slot) else {
            return;
        };
        self.new_table.clear(bucket, slot);
        let delete = {
            let rec = self
                .records
                .get_mut(&occupant)
                .expect("table slot points at a live record");
            debug_assert!(rec.ref_count > 0, "new-table reference count underflow");
            rec.ref_count = rec.ref_count.saturating_sub(1);
            rec.ref_count == 0 && !rec.in_tried
        };
        if delete {
            self.delete_record(occupant);
        }
    }

    fn delete_record(&mut self, id: u32) {
        if let Some(rec) = self.records.remove(&id) {
            self.by_key.remove(&(rec.addr, rec.port));
            if rec.in_tried {
                self.tried_count -= 1;
            } else {
                self.new_count -= 1;
            }
        }
    }

    /// Record a successful round-trip with an address and promote it to the
    /// tried table. When the tried slot is contested, the entry with fewer
    /// failures and fresher success keeps it; the loser goes back to the new
    /// table (incumbent) or stays there (candidate). Unknown addresses are
    /// ignored.
    pub fn good(&mut self, addr: &AddrV2, port: u16, now: u64) {
        let Some(&id) = self.by_key.get(&(addr.clone(), port)) else {
            return;
        };
        {
            let rec = self
                .records
                .get_mut(&id)
                .expect("key index points at a live record");
            rec.last_success = now;
            rec.last_attempt = now;
            rec.attempts = 0;
            if rec.in_tried {
                return;
            }
        }

        let bucket = self
            .placement
            .tried_bucket(addr, port, self.cfg.tried_bucket_count);
        let slot = self
            .placement
            .slot(false, bucket, addr, port, self.cfg.bucket_size);
        match self.tried_table.get(bucket, slot) {
            None => {
                self.detach_from_new(id);
                self.attach_to_tried(id, bucket, slot);
            }
            Some(incumbent) => {
                debug_assert_ne!(incumbent, id, "untried record found in tried table");
                let candidate_wins = {
                    let cand = self.records.get(&id).expect("live record");
                    let inc = self.records.get(&incumbent).expect("live record");
                    cand.outranks(inc, now, &self.cfg)
                };
                if candidate_wins {
                    debug!("tried slot contested, demoting incumbent {incumbent}");
                    // release the candidate's slots first, so the demoted
                    // incumbent cannot land on one of them and delete it
                    self.detach_from_new(id);
                    self.demote(incumbent, bucket, slot);
                    self.attach_to_tried(id, bucket, slot);
                }
            }
        }
    }

    /// Release every new-table reference a record holds.
    fn detach_from_new(&mut self, id: u32) {
        for (b, s) in self.new_table.positions_of(id) {
            self.new_table.clear(b, s);
        }
        let rec = self
            .records
            .get_mut(&id)
            .expect("key index points at a live record");
        debug_assert!(rec.ref_count > 0, "promoting a record with no references");
        rec.ref_count = 0;
        self.new_count -= 1;
    }

    fn attach_to_tried(&mut self, id: u32, bucket: usize, slot: usize) {
        self.records
            .get_mut(&id)
            .expect("key index points at a live record")
            .in_tried = true;
        self.tried_count += 1;
        self.tried_table.set(bucket, slot, id);
    }

    /// Push a tried record back into the new table, displacing whatever sits
    /// in its new-table slot.
    fn demote(&mut self, id: u32, bucket: usize, slot: usize) {
        self.tried_table.clear(bucket, slot);
        let (addr, port, source) = {
            let rec = self
                .records
                .get_mut(&id)
                .expect("table slot points at a live record");
            rec.in_tried = false;
            (rec.addr.clone(), rec.port, rec.source.clone())
        };
        self.tried_count -= 1;

        let new_bucket = self
            .placement
            .new_bucket(&addr, &source, self.cfg.new_bucket_count);
        let new_slot = self
            .placement
            .slot(true, new_bucket, &addr, port, self.cfg.bucket_size);
        self.evict_new_slot(new_bucket, new_slot);
        self.new_table.set(new_bucket, new_slot, id);
        self.records
            .get_mut(&id)
            .expect("table slot points at a live record")
            .ref_count = 1;
        self.new_count += 1;
    }

    /// Note a connection attempt towards an address. Unknown addresses are
    /// ignored.
    pub fn attempt(&mut self, addr: &AddrV2, port: u16, now: u64) {
        if let Some(&id) = self.by_key.get(&(addr.clone(), port)) {
            let rec = self
                .records
                .get_mut(&id)
                .expect("key index points at a live record");
            rec.last_attempt = now;
            rec.attempts = rec.attempts.saturating_add(1);
        }
    }

    /// Note that a connection to an address is alive right now. Refreshes the
    /// last-seen timestamp at most every twenty minutes; table membership is
    /// unchanged.
    pub fn connected(&mut self, addr: &AddrV2, port: u16, now: u64) {
        if let Some(&id) = self.by_key.get(&(addr.clone(), port)) {
            let rec = self
                .records
                .get_mut(&id)
                .expect("key index points at a live record");
            if now.saturating_sub(rec.last_seen) > CONNECTED_REFRESH {
                rec.last_seen = now;
            }
        }
    }

    /// Choose one address to dial. Verified addresses win the coin toss with
    /// the configured bias unless `new_only` forces gossip-only sampling.
    /// Within a table, candidates are drawn uniformly and accepted with odds
    /// proportional to their quality, so flaky addresses still surface, just
    /// rarely. Returns `None` when the chosen table has nothing to offer.
    pub fn select(&mut self, new_only: bool, now: u64) -> Option<PeerAddress> {
        if self.by_key.is_empty() {
            return None;
        }
        let use_tried = if new_only || self.tried_count == 0 {
            false
        } else if self.new_count == 0 {
            true
        } else {
            self.rng.gen_bool(self.cfg.tried_bias)
        };
        if !use_tried && self.new_count == 0 {
            return None;
        }

        let count = if use_tried {
            self.tried_count
        } else {
            self.new_count
        };
        let mut factor = 1.0_f64;
        if count < SPARSE_SELECT_THRESHOLD {
            // random slot probing rarely hits anything in a near-empty
            // table, so draw from the occupied slots directly
            let ids: Vec<u32> = if use_tried {
                self.tried_table.occupied().map(|(_, _, id)| id).collect()
            } else {
                self.new_table.occupied().map(|(_, _, id)| id).collect()
            };
            for _ in 0..SELECT_DRAW_LIMIT {
                let id = ids[self.rng.gen_range(0..ids.len())];
                if let Some(picked) = self.consider(id, factor, now) {
                    return Some(picked);
                }
                factor *= 1.2;
            }
            return None;
        }

        let (buckets, slots) = if use_tried {
            (self.tried_table.buckets(), self.tried_table.slots_per_bucket())
        } else {
            (self.new_table.buckets(), self.new_table.slots_per_bucket())
        };
        for _ in 0..SELECT_DRAW_LIMIT {
            let bucket = self.rng.gen_range(0..buckets);
            let slot = self.rng.gen_range(0..slots);
            let occupant = if use_tried {
                self.tried_table.get(bucket, slot)
            } else {
                self.new_table.get(bucket, slot)
            };
            let Some(id) = occupant else {
                factor *= 1.2;
                continue;
            };
            if let Some(picked) = self.consider(id, factor, now) {
                return Some(picked);
            }
            factor *= 1.2;
        }
        None
    }

    /// One rejection-sampling round: accept the candidate with odds scaled by
    /// its quality and by how long the search has been going.
    fn consider(&mut self, id: u32, factor: f64, now: u64) -> Option<PeerAddress> {
        let rec = self
            .records
            .get(&id)
            .expect("table slot points at a live record");
        if rec.is_terrible(now, &self.cfg) {
            return None;
        }
        let accept = (factor * rec.chance(now)).min(1.0);
        if self.rng.gen::<f64>() < accept {
            return Some(rec.to_peer_address());
        }
        None
    }

    /// A shuffled sample of addresses fit to relay to a requesting peer:
    /// recently seen, not judged terrible, capped both by `max_count` and by
    /// `max_pct` percent of everything we know. Never reveals the whole book.
    pub fn get_addr(&mut self, max_count: usize, max_pct: usize, now: u64) -> Vec<PeerAddress> {
        let cap = max_count.min(self.by_key.len() * max_pct.min(100) / 100);
        if cap == 0 {
            return Vec::new();
        }
        let mut ids: Vec<u32> = self.records.keys().copied().collect();
        ids.shuffle(&mut self.rng);
        let mut out = Vec::with_capacity(cap);
        for id in ids {
            if out.len() >= cap {
                break;
            }
            let rec = self.records.get(&id).expect("live record");
            if rec.is_terrible(now, &self.cfg) {
                continue;
            }
            if rec.last_seen.saturating_add(self.cfg.getaddr_recency) < now {
                continue;
            }
            out.push(rec.to_peer_address());
        }
        out
    }

    /// A point-in-time copy of the whole book, with every record's bucket
    /// positions spelled out so a restart reproduces the layout even under a
    /// different salt.
    pub fn snapshot(&self) -> BookSnapshot {
        let mut new_positions: HashMap<u32, Vec<(u32, u32)>> = HashMap::new();
        for (bucket, slot, id) in self.new_table.occupied() {
            new_positions
                .entry(id)
                .or_default()
                .push((bucket as u32, slot as u32));
        }
        let new = new_positions
            .into_iter()
            .map(|(id, positions)| NewEntry {
                record: PersistedAddress::from(
                    self.records.get(&id).expect("table slot points at a live record"),
                ),
                positions,
            })
            .collect();
        let tried = self
            .tried_table
            .occupied()
            .map(|(bucket, slot, id)| TriedEntry {
                record: PersistedAddress::from(
                    self.records.get(&id).expect("table slot points at a live record"),
                ),
                bucket: bucket as u32,
                slot: slot as u32,
            })
            .collect();
        BookSnapshot {
            version: SNAPSHOT_VERSION,
            new_bucket_count: self.cfg.new_bucket_count as u32,
            tried_bucket_count: self.cfg.tried_bucket_count as u32,
            bucket_size: self.cfg.bucket_size as u32,
            tried,
            new,
        }
    }

    /// Rebuild the book from a snapshot. Stored placement is authoritative:
    /// entries keep the bucket positions they were saved with, while records
    /// with out-of-range positions, duplicate keys or fully contested slots
    /// are dropped rather than failing the whole load.
    pub fn restore(&mut self, snapshot: BookSnapshot) -> RestoreSummary {
        self.clear();
        let mut restored = 0;
        let mut dropped = 0;

        for TriedEntry { record, bucket, slot } in snapshot.tried {
            let (bucket, slot) = (bucket as usize, slot as usize);
            let key = (record.addr.clone(), record.port);
            if bucket >= self.cfg.tried_bucket_count
                || slot >= self.cfg.bucket_size
                || self.tried_table.get(bucket, slot).is_some()
                || self.by_key.contains_key(&key)
            {
                dropped += 1;
                continue;
            }
            let mut rec = AddressRecord::from(record);
            rec.in_tried = true;
            let id = self.next_id;
            self.next_id += 1;
            self.tried_table.set(bucket, slot, id);
            self.by_key.insert(key, id);
            self.records.insert(id, rec);
            self.tried_count += 1;
            restored += 1;
        }

        for NewEntry { record, positions } in snapshot.new {
            let key = (record.addr.clone(), record.port);
            if self.by_key.contains_key(&key) {
                dropped += 1;
                continue;
            }
            let id = self.next_id;
            let mut refs = 0;
            for (bucket, slot) in positions {
                let (bucket, slot) = (bucket as usize, slot as usize);
                if bucket >= self.cfg.new_bucket_count
                    || slot >= self.cfg.bucket_size
                    || self.new_table.get(bucket, slot).is_some()
                {
                    continue;
                }
                self.new_table.set(bucket, slot, id);
                refs += 1;
            }
            if refs == 0 {
                dropped += 1;
                continue;
            }
            self.next_id += 1;
            let mut rec = AddressRecord::from(record);
            rec.in_tried = false;
            rec.ref_count = refs;
            self.by_key.insert(key, id);
            self.records.insert(id, rec);
            self.new_count += 1;
            restored += 1;
        }

        if dropped > 0 {
            tracing::warn!("dropped {dropped} invalid snapshot entries, kept {restored}");
        }
        RestoreSummary { restored, dropped }
    }

    #[cfg(test)]
    pub(crate) fn record_state(&self, addr: &AddrV2, port: u16) -> Option<(bool, u32)> {
        let id = self.by_key.get(&(addr.clone(), port))?;
        let rec = self.records.get(id)?;
        Some((rec.in_tried, rec.ref_count))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::p2p::ServiceFlags;

    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> AddrV2 {
        AddrV2::Ipv4(std::net::Ipv4Addr::new(a, b, c, d))
    }

    fn peer(addr: AddrV2, port: u16) -> PeerAddress {
        PeerAddress::new(addr, port, ServiceFlags::NETWORK, NOW)
    }

    fn book() -> AddressBook {
        AddressBook::with_salt(BookConfig::default(), [21u8; 32])
    }

    fn source() -> AddrV2 {
        v4(51, 52, 53, 54)
    }

    #[test]
    fn test_add_rejects_invalid_gossip() {
        let mut book = book();
        let batch = vec![
            peer(v4(127, 0, 0, 1), 8333),
            peer(v4(10, 0, 0, 1), 8333),
            peer(v4(8, 8, 8, 8), 0),
            peer(v4(8, 8, 8, 8), 8333),
        ];
        let added = book.add_many(&batch, &source(), 0, NOW);
        assert_eq!(added, 1);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut book = book();
        let addr = peer(v4(8, 8, 8, 8), 8333);
        assert!(book.add(&addr, &source(), 0, NOW));
        assert!(!book.add(&addr, &source(), 0, NOW));
        assert_eq!(book.len(), 1);
        assert_eq!(book.new_count(), 1);

        let twice = book.snapshot();
        let mut other = AddressBook::with_salt(BookConfig::default(), [21u8; 32]);
        other.add(&addr, &source(), 0, NOW);
        let once = other.snapshot();
        assert_eq!(once.new.len(), twice.new.len());
        assert_eq!(once.new[0].positions, twice.new[0].positions);
    }

    #[test]
    fn test_refresh_merges_services() {
        let mut book = book();
        let addr = v4(8, 8, 8, 8);
        book.add(&peer(addr.clone(), 8333), &source(), 0, NOW);
        let update = PeerAddress::new(addr.clone(), 8333, ServiceFlags::COMPACT_FILTERS, NOW);
        book.add(&update, &source(), 0, NOW);
        let relayed = book.get_addr(10, 100, NOW);
        assert!(relayed[0].services.has(ServiceFlags::NETWORK));
        assert!(relayed[0].services.has(ServiceFlags::COMPACT_FILTERS));
    }

    #[test]
    fn test_good_promotes_to_tried_exclusively() {
        let mut book = book();
        let addr = v4(8, 8, 8, 8);
        book.add(&peer(addr.clone(), 8333), &source(), 0, NOW);
        assert_eq!(book.record_state(&addr, 8333), Some((false, 1)));

        book.good(&addr, 8333, NOW);
        assert_eq!(book.new_count(), 0);
        assert_eq!(book.tried_count(), 1);
        // in tried with zero new-table references, never both
        assert_eq!(book.record_state(&addr, 8333), Some((true, 0)));

        // unknown addresses are a no-op
        book.good(&v4(9, 9, 9, 9), 8333, NOW);
        assert_eq!(book.tried_count(), 1);
    }

    #[test]
    fn test_attempt_and_connected_bookkeeping() {
        let mut book = book();
        let addr = v4(8, 8, 8, 8);
        book.add(&peer(addr.clone(), 8333), &source(), 0, NOW);
        for _ in 0..3 {
            book.attempt(&addr, 8333, NOW + 100);
        }
        // three failed attempts with no success make the record terrible,
        // so it is no longer offered
        assert_eq!(book.get_addr(10, 100, NOW + 2000), Vec::new());

        book.good(&addr, 8333, NOW + 3000);
        assert_eq!(book.get_addr(10, 100, NOW + 3000).len(), 1);

        // connected refreshes last_seen only after a while
        book.connected(&addr, 8333, NOW + 3000 + CONNECTED_REFRESH + 1);
        let relayed = book.get_addr(10, 100, NOW + 3000 + CONNECTED_REFRESH + 2);
        assert_eq!(relayed[0].last_seen, NOW + 3000 + CONNECTED_REFRESH + 1);
    }

    #[test]
    fn test_select_on_empty_book() {
        let mut book = book();
        assert_eq!(book.select(false, NOW), None);
        assert_eq!(book.select(true, NOW), None);
    }

    #[test]
    fn test_select_new_only_ignores_tried() {
        let mut book = book();
        let tried = v4(8, 8, 8, 8);
        book.add(&peer(tried.clone(), 8333), &source(), 0, NOW);
        book.good(&tried, 8333, NOW);
        assert_eq!(book.select(true, NOW), None);

        let fresh = v4(9, 9, 9, 9);
        book.add(&peer(fresh.clone(), 8333), &source(), 0, NOW);
        let picked = book.select(true, NOW).expect("new table is populated");
        assert_eq!(picked.addr, fresh);
    }

    #[test]
    fn test_select_returns_good_address() {
        let mut book = book();
        let addr = v4(8, 8, 8, 8);
        book.add(&peer(addr.clone(), 8333), &source(), 0, NOW);
        book.good(&addr, 8333, NOW);
        let picked = book.select(false, NOW).expect("only candidate");
        assert_eq!(picked.addr, addr);
        assert_eq!(picked.port, 8333);
    }

    #[test]
    fn test_get_addr_caps() {
        let mut book = book();
        for i in 0..100u8 {
            book.add(&peer(v4(60, i, 1, 1), 8333), &source(), 0, NOW);
        }
        let known = book.len();
        assert_eq!(book.get_addr(0, 100, NOW), Vec::new());
        assert_eq!(book.get_addr(10, 0, NOW), Vec::new());
        assert_eq!(book.get_addr(10, 100, NOW).len(), 10);
        let pct_capped = book.get_addr(usize::MAX, 23, NOW);
        assert_eq!(pct_capped.len(), known * 23 / 100);
    }

    #[test]
    fn test_bucket_capacity_bounds_collisions() {
        // same source and same /16 pin every address into a single bucket
        let cfg = BookConfig::default();
        let mut book = AddressBook::with_salt(cfg.clone(), [5u8; 32]);
        for i in 0..200u8 {
            book.add(&peer(v4(44, 44, i, 1), 8333), &source(), 0, NOW);
        }
        assert!(book.len() <= cfg.bucket_size);
        assert!(book.len() > cfg.bucket_size / 2);
    }

    fn tiny_config() -> BookConfig {
        BookConfig {
            new_bucket_count: 1,
            tried_bucket_count: 1,
            bucket_size: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_terrible_occupant_is_evicted() {
        // one bucket, one slot: every address contends for the same place
        let mut book = AddressBook::with_salt(tiny_config(), [5u8; 32]);
        let stale = PeerAddress::new(v4(44, 44, 7, 1), 8333, ServiceFlags::NONE, 1000);
        book.add(&stale, &source(), 0, NOW);
        assert_eq!(book.len(), 1);

        book.add(&peer(v4(44, 44, 7, 2), 8333), &source(), 0, NOW);
        assert_eq!(book.record_state(&v4(44, 44, 7, 1), 8333), None);
        assert_eq!(book.record_state(&v4(44, 44, 7, 2), 8333), Some((false, 1)));
    }

    #[test]
    fn test_strong_occupant_is_kept() {
        let mut book = AddressBook::with_salt(tiny_config(), [5u8; 32]);
        book.add(&peer(v4(44, 44, 7, 2), 8333), &source(), 0, NOW);
        book.add(&peer(v4(44, 44, 7, 3), 8333), &source(), 0, NOW);
        // the fresh incumbent holds the only slot, the newcomer is dropped
        assert_eq!(book.len(), 1);
        assert_eq!(book.record_state(&v4(44, 44, 7, 3), 8333), None);
    }

    #[test]
    fn test_tried_contention_prefers_fresher_success() {
        let mut book = AddressBook::with_salt(tiny_config(), [5u8; 32]);
        let first = v4(44, 44, 7, 2);
        book.add(&peer(first.clone(), 8333), &source(), 0, NOW);
        book.good(&first, 8333, NOW);
        assert_eq!(book.record_state(&first, 8333), Some((true, 0)));

        // a second address contends for the single tried slot with a fresher
        // success; the incumbent is demoted back into the new table
        let second = v4(44, 44, 7, 3);
        book.add(&peer(second.clone(), 8333), &source(), 0, NOW);
        book.good(&second, 8333, NOW + 10);
        assert_eq!(book.record_state(&second, 8333), Some((true, 0)));
        assert_eq!(book.record_state(&first, 8333), Some((false, 1)));
        assert_eq!(book.tried_count(), 1);
        assert_eq!(book.new_count(), 1);
    }

    #[test]
    fn test_tried_contention_rejects_weaker_candidate() {
        let mut book = AddressBook::with_salt(tiny_config(), [5u8; 32]);
        let incumbent = v4(44, 44, 7, 2);
        book.add(&peer(incumbent.clone(), 8333), &source(), 0, NOW);
        book.good(&incumbent, 8333, NOW + 50);

        // the challenger's only success is older than the incumbent's, so
        // the promotion is refused and the challenger stays in new
        let challenger = v4(44, 44, 7, 3);
        book.add(&peer(challenger.clone(), 8333), &source(), 0, NOW + 60);
        book.good(&challenger, 8333, NOW + 40);
        assert_eq!(book.record_state(&incumbent, 8333), Some((true, 0)));
        assert_eq!(book.record_state(&challenger, 8333), Some((false, 1)));
    }

    #[test]
    fn test_same_salt_same_layout() {
        let mut a = AddressBook::with_salt(BookConfig::default(), [9u8; 32]);
        let mut b = AddressBook::with_salt(BookConfig::default(), [9u8; 32]);
        for i in 0..50u8 {
            let addr = peer(v4(60, i, 1, 1), 8000 + i as u16);
            a.add(&addr, &source(), 0, NOW);
            b.add(&addr, &source(), 0, NOW);
        }
        let layout = |book: &AddressBook| {
            let snapshot = book.snapshot();
            let mut entries: Vec<_> = snapshot
                .new
                .into_iter()
                .map(|e| {
                    let mut positions = e.positions;
                    positions.sort();
                    (crate::netaddr::hash_key(&e.record.addr, e.record.port), positions)
                })
                .collect();
            entries.sort();
            entries
        };
        assert_eq!(layout(&a), layout(&b));
    }

    #[test]
    fn test_restore_drops_invalid_entries() {
        let cfg = BookConfig::default();
        let persisted = |last_octet: u8| PersistedAddress {
            addr: v4(60, 1, 1, last_octet),
            port: 8333,
            services: ServiceFlags::NETWORK,
            source: source(),
            last_seen: NOW,
            last_success: NOW,
            last_attempt: NOW,
            attempts: 0,
        };
        let snapshot = BookSnapshot {
            version: SNAPSHOT_VERSION,
            new_bucket_count: cfg.new_bucket_count as u32,
            tried_bucket_count: cfg.tried_bucket_count as u32,
            bucket_size: cfg.bucket_size as u32,
            tried: vec![
                TriedEntry {
                    record: persisted(1),
                    bucket: 3,
                    slot: 3,
                },
                // out-of-range bucket
                TriedEntry {
                    record: persisted(2),
                    bucket: cfg.tried_bucket_count as u32,
                    slot: 0,
                },
                // same slot as the first entry
                TriedEntry {
                    record: persisted(3),
                    bucket: 3,
                    slot: 3,
                },
                // same address as the first entry
                TriedEntry {
                    record: persisted(1),
                    bucket: 9,
                    slot: 9,
                },
            ],
            new: vec![
                NewEntry {
                    record: persisted(4),
                    // one valid position among garbage keeps the record
                    positions: vec![(0, cfg.bucket_size as u32), (5, 5)],
                },
                // no valid position at all
                NewEntry {
                    record: persisted(5),
                    positions: vec![(u32::MAX, 0)],
                },
            ],
        };

        let mut book = AddressBook::with_salt(cfg, [3u8; 32]);
        let summary = book.restore(snapshot);
        assert_eq!(summary.restored, 2);
        assert_eq!(summary.dropped, 4);
        assert_eq!(book.tried_count(), 1);
        assert_eq!(book.new_count(), 1);
        assert_eq!(book.record_state(&v4(60, 1, 1, 1), 8333), Some((true, 0)));
        assert_eq!(book.record_state(&v4(60, 1, 1, 4), 8333), Some((false, 1)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut book = book();
        book.add(&peer(v4(8, 8, 8, 8), 8333), &source(), 0, NOW);
        book.good(&v4(8, 8, 8, 8), 8333, NOW);
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.new_count(), 0);
        assert_eq!(book.tried_count(), 0);
        assert_eq!(book.select(false, NOW), None);
    }
}
