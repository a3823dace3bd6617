//! Network-adjusted time from peer-reported clocks.

use std::collections::VecDeque;

use crate::prelude::{unix_now, Median};

/// Tracks the offset between our clock and the clocks our peers report,
/// producing a median-adjusted timestamp for address bookkeeping.
///
/// A handful of peers with skewed clocks cannot drag the adjusted time far,
/// since the median only moves when most sampled peers agree.
#[derive(Debug)]
pub struct TimeKeeper {
    offsets: VecDeque<i64>,
    max_samples: usize,
}

impl TimeKeeper {
    /// Build a keeper retaining at most `max_samples` peer offsets, evicting
    /// the oldest sample once full.
    pub fn new(max_samples: usize) -> Self {
        Self {
            offsets: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record the clock a peer reported during its handshake.
    pub fn add_peer_time(&mut self, peer_unix: u64) {
        let offset = (unix_now() as i64) - (peer_unix as i64);
        if self.offsets.len() == self.max_samples {
            self.offsets.pop_front();
        }
        self.offsets.push_back(offset);
    }

    /// The current unix time, shifted by the median peer offset. Falls back
    /// to the local clock while no peers have been sampled.
    pub fn now(&self) -> u64 {
        let mut samples: Vec<i64> = self.offsets.iter().copied().collect();
        match samples.median() {
            Some(offset) => (unix_now() as i64 - offset).max(0) as u64,
            None => unix_now(),
        }
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new(8)
    }
}
