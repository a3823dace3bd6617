//! Per-address records and the quality judgments made about them.

use bitcoin::p2p::address::{AddrV2, AddrV2Message};
use bitcoin::p2p::ServiceFlags;

use crate::config::BookConfig;

/// Attempts made very recently are still in flight and say nothing yet.
const RECENT_ATTEMPT_GRACE: u64 = 60;

/// Timestamps this far ahead of our adjusted clock are fabricated.
const FUTURE_SLACK: u64 = 10 * 60;

/// Addresses dialed within the last few minutes are heavily deprioritized
/// by selection, leaving room for everything not yet in flight.
const RETRY_WINDOW: u64 = 10 * 60;

/// A peer address as learned from gossip, along with the metadata a caller
/// needs to dial it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    /// Canonical address of this peer.
    pub addr: AddrV2,
    /// The port believed to be listening for connections.
    pub port: u16,
    /// The services this peer claims to offer.
    pub services: ServiceFlags,
    /// When the gossiping peer last heard from this address, unix seconds.
    pub last_seen: u64,
}

impl PeerAddress {
    /// Build a peer address with known fields.
    pub fn new(addr: AddrV2, port: u16, services: ServiceFlags, last_seen: u64) -> Self {
        Self {
            addr,
            port,
            services,
            last_seen,
        }
    }
}

impl From<AddrV2Message> for PeerAddress {
    fn from(value: AddrV2Message) -> Self {
        Self {
            addr: value.addr,
            port: value.port,
            services: value.services,
            last_seen: value.time.into(),
        }
    }
}

impl From<PeerAddress> for (AddrV2, u16) {
    fn from(value: PeerAddress) -> Self {
        (value.addr, value.port)
    }
}

/// Everything the book remembers about one address.
///
/// A record lives in exactly one of the two tables: while untried it may be
/// referenced from several new-table slots (`ref_count`), once verified it
/// occupies a single tried-table slot.
#[derive(Debug, Clone)]
pub(crate) struct AddressRecord {
    pub(crate) addr: AddrV2,
    pub(crate) port: u16,
    pub(crate) services: ServiceFlags,
    /// Who told us about this address. Fixed at creation, drives new-table
    /// placement for the record's whole life.
    pub(crate) source: AddrV2,
    pub(crate) last_seen: u64,
    pub(crate) last_success: u64,
    pub(crate) last_attempt: u64,
    pub(crate) attempts: u32,
    pub(crate) ref_count: u32,
    pub(crate) in_tried: bool,
}

impl AddressRecord {
    pub(crate) fn new(
        addr: AddrV2,
        port: u16,
        services: ServiceFlags,
        source: AddrV2,
        last_seen: u64,
    ) -> Self {
        Self {
            addr,
            port,
            services,
            source,
            last_seen,
            last_success: 0,
            last_attempt: 0,
            attempts: 0,
            ref_count: 0,
            in_tried: false,
        }
    }

    /// Too stale or unreliable to offer anywhere, and fair game for eviction.
    pub(crate) fn is_terrible(&self, now: u64, cfg: &BookConfig) -> bool {
        if self.last_attempt != 0 && now.saturating_sub(self.last_attempt) < RECENT_ATTEMPT_GRACE {
            return false;
        }
        if self.last_seen > now + FUTURE_SLACK {
            return true;
        }
        if self.last_seen == 0 || now.saturating_sub(self.last_seen) > cfg.stale_horizon {
            return true;
        }
        if self.last_success == 0 && self.attempts >= cfg.max_untried_attempts {
            return true;
        }
        if now.saturating_sub(self.last_success) > cfg.failure_horizon
            && self.attempts >= cfg.max_failures
        {
            return true;
        }
        false
    }

    /// Relative odds of this record surviving the selection rejection step.
    pub(crate) fn chance(&self, now: u64) -> f64 {
        let mut chance = 1.0;
        if now.saturating_sub(self.last_attempt) < RETRY_WINDOW {
            chance *= 0.01;
        }
        chance * 0.66_f64.powi(self.attempts.min(8) as i32)
    }

    /// Whether this record should win a tried-table slot over `incumbent`.
    pub(crate) fn outranks(&self, incumbent: &AddressRecord, now: u64, cfg: &BookConfig) -> bool {
        if incumbent.is_terrible(now, cfg) {
            return true;
        }
        if self.attempts != incumbent.attempts {
            return self.attempts < incumbent.attempts;
        }
        self.last_success > incumbent.last_success
    }

    pub(crate) fn to_peer_address(&self) -> PeerAddress {
        PeerAddress {
            addr: self.addr.clone(),
            port: self.port,
            services: self.services,
            last_seen: self.last_seen,
        }
    }
}
