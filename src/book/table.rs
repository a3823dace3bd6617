//! Fixed-geometry bucket tables over arena ids.

/// A fixed number of buckets, each a fixed number of slots, each slot either
/// empty or holding the arena id of one record. The table never stores
/// records itself; the arena owns them.
#[derive(Debug, Clone)]
pub(crate) struct BucketTable {
    buckets: usize,
    slots_per_bucket: usize,
    slots: Vec<Option<u32>>,
}

impl BucketTable {
    pub(crate) fn new(buckets: usize, slots_per_bucket: usize) -> Self {
        Self {
            buckets,
            slots_per_bucket,
            slots: vec![None; buckets * slots_per_bucket],
        }
    }

    pub(crate) fn buckets(&self) -> usize {
        self.buckets
    }

    pub(crate) fn slots_per_bucket(&self) -> usize {
        self.slots_per_bucket
    }

    fn index(&self, bucket: usize, slot: usize) -> usize {
        assert!(
            bucket < self.buckets && slot < self.slots_per_bucket,
            "bucket position out of range"
        );
        bucket * self.slots_per_bucket + slot
    }

    pub(crate) fn get(&self, bucket: usize, slot: usize) -> Option<u32> {
        self.slots[self.index(bucket, slot)]
    }

    pub(crate) fn set(&mut self, bucket: usize, slot: usize, id: u32) {
        let index = self.index(bucket, slot);
        self.slots[index] = Some(id);
    }

    pub(crate) fn clear(&mut self, bucket: usize, slot: usize) {
        let index = self.index(bucket, slot);
        self.slots[index] = None;
    }

    pub(crate) fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Every position currently referencing `id`. Full scan, only used on the
    /// rare promotion and demotion paths.
    pub(crate) fn positions_of(&self, id: u32) -> Vec<(usize, usize)> {
        self.occupied()
            .filter(|&(_, _, occupant)| occupant == id)
            .map(|(bucket, slot, _)| (bucket, slot))
            .collect()
    }

    /// Iterate all occupied positions as (bucket, slot, id).
    pub(crate) fn occupied(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.map(|id| (index / self.slots_per_bucket, index % self.slots_per_bucket, id))
        })
    }
}
