//! Address book configuration options.

/// How long we keep offering an address that we have never heard from, in seconds.
const STALE_HORIZON: u64 = 30 * 24 * 60 * 60; // 30 days

/// How far back a connection success still counts when judging repeated failures.
const FAILURE_HORIZON: u64 = 7 * 24 * 60 * 60; // 7 days

/// How recently an address must have been seen to be relayed to other peers.
const GETADDR_RECENCY: u64 = 24 * 60 * 60; // 24 hours

/// Tunable policy for an [`AddressBook`](crate::AddressBook).
///
/// The defaults match the production constants of widely deployed address
/// managers and are safe for mainnet use. Shrinking the bucket geometry is
/// mostly useful for tests that want to force slot collisions.
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Number of buckets holding addresses we have never connected to.
    pub new_bucket_count: usize,
    /// Number of buckets holding addresses that answered us at least once.
    pub tried_bucket_count: usize,
    /// Slots per bucket, for both tables.
    pub bucket_size: usize,
    /// Addresses not seen for this many seconds are considered stale.
    pub stale_horizon: u64,
    /// Failed attempts tolerated for an address that never connected.
    pub max_untried_attempts: u32,
    /// Window in which a past success excuses repeated failures, in seconds.
    pub failure_horizon: u64,
    /// Failed attempts tolerated within the failure window.
    pub max_failures: u32,
    /// Probability that selection draws from the tried table when both tables
    /// are populated.
    pub tried_bias: f64,
    /// Maximum number of new-table slots a single address may occupy when
    /// gossiped by several sources.
    pub max_new_references: u32,
    /// Addresses older than this many seconds are not handed out in response
    /// to address requests.
    pub getaddr_recency: u64,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            new_bucket_count: 1024,
            tried_bucket_count: 256,
            bucket_size: 64,
            stale_horizon: STALE_HORIZON,
            max_untried_attempts: 3,
            failure_horizon: FAILURE_HORIZON,
            max_failures: 10,
            tried_bias: 0.5,
            max_new_references: 8,
            getaddr_recency: GETADDR_RECENCY,
        }
    }
}
