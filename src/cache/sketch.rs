//! Approximate access-frequency counting.
//!
//! A count-min sketch with 4-bit saturating counters. Every `reset_at`
//! increments all counters are halved so that old popularity fades out.
//! Counters are atomics: recording an access never takes a lock.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

const DEPTH: usize = 4;
const MIN_WIDTH: usize = 16;
const MAX_WIDTH: usize = 1 << 20;
const COUNTER_MAX: u8 = 15;

const SEEDS: [u64; DEPTH] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

/// Frequency sketch shared by all callers of one cache.
pub struct FrequencySketch {
    rows: Vec<Box<[AtomicU8]>>,
    mask: usize,
    increments: AtomicU64,
    reset_at: u64,
    hasher: RandomState,
}

impl FrequencySketch {
    /// Create a sketch sized for roughly `counters` distinct keys.
    pub fn new(counters: usize) -> Self {
        let width = counters.clamp(MIN_WIDTH, MAX_WIDTH).next_power_of_two();
        let rows = (0..DEPTH)
            .map(|_| (0..width).map(|_| AtomicU8::new(0)).collect::<Vec<_>>().into_boxed_slice())
            .collect();

        Self {
            rows,
            mask: width - 1,
            increments: AtomicU64::new(0),
            reset_at: width as u64 * 10,
            hasher: RandomState::new(),
        }
    }

    /// Hash a key with this sketch's hasher.
    pub fn hash<K: Hash + ?Sized>(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Record one access for a key hash.
    pub fn increment(&self, key_hash: u64) {
        for (row, seed) in self.rows.iter().zip(SEEDS) {
            let counter = &row[self.index(key_hash, seed)];
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c < COUNTER_MAX).then_some(c + 1)
            });
        }

        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.reset_at == 0 {
            self.halve();
        }
    }

    /// Estimated access count for a key hash (0..=15).
    pub fn estimate(&self, key_hash: u64) -> u8 {
        self.rows
            .iter()
            .zip(SEEDS)
            .map(|(row, seed)| row[self.index(key_hash, seed)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    fn index(&self, key_hash: u64, seed: u64) -> usize {
        let mixed = (key_hash ^ seed).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        (mixed >> 32) as usize & self.mask
    }

    fn halve(&self) {
        for row in &self.rows {
            for counter in row.iter() {
                let _ =
                    counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c >> 1));
            }
        }
    }
}

impl std::fmt::Debug for FrequencySketch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencySketch")
            .field("width", &(self.mask + 1))
            .field("increments", &self.increments.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accesses() {
        let sketch = FrequencySketch::new(64);
        let hot = sketch.hash("hot");
        let cold = sketch.hash("cold");

        for _ in 0..5 {
            sketch.increment(hot);
        }
        sketch.increment(cold);

        assert!(sketch.estimate(hot) >= 5);
        assert!(sketch.estimate(cold) >= 1);
        assert!(sketch.estimate(hot) > sketch.estimate(cold));
    }

    #[test]
    fn counters_saturate() {
        let sketch = FrequencySketch::new(1024);
        let key = sketch.hash(&42u64);
        for _ in 0..100 {
            sketch.increment(key);
        }
        assert_eq!(sketch.estimate(key), COUNTER_MAX);
    }

    #[test]
    fn aging_halves_counters() {
        let sketch = FrequencySketch::new(MIN_WIDTH);
        let key = sketch.hash("key");
        for _ in 0..8 {
            sketch.increment(key);
        }
        assert!(sketch.estimate(key) >= 8);

        // the last of these increments lands exactly on the reset threshold
        let noise = sketch.reset_at as usize - 8;
        for i in 0..noise {
            sketch.increment(sketch.hash(&(i as u64 + 1_000_000)));
        }

        assert!(sketch.estimate(key) <= COUNTER_MAX / 2);
    }
}
