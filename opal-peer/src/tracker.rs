//! Data-update bloom filter generations
//!
//! Background scanners use a bloom filter over recently written paths to
//! skip untouched namespace. The coordinator periodically cycles every
//! node's filter to a new generation and collects the previous one.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Filter width in bytes.
const BLOOM_BYTES: usize = 2048;

/// Hash functions per entry.
const BLOOM_HASHES: u64 = 3;

/// Cycled-out generations kept for late collectors.
const HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bloom {
    bits: Vec<u8>,
}

impl Default for Bloom {
    fn default() -> Self {
        Self {
            bits: vec![0u8; BLOOM_BYTES],
        }
    }
}

impl Bloom {
    pub fn add(&mut self, path: &str) {
        for seed in 0..BLOOM_HASHES {
            let idx = Self::position(path, seed);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        (0..BLOOM_HASHES).all(|seed| {
            let idx = Self::position(path, seed);
            self.bits[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    pub fn merge(&mut self, other: &Bloom) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bits
    }

    fn position(path: &str, seed: u64) -> usize {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        path.hash(&mut hasher);
        (hasher.finish() as usize) % (BLOOM_BYTES * 8)
    }
}

/// Coordinator request to advance the filter generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BloomCycleRequest {
    /// Oldest generation the caller still wants merged into the reply.
    pub oldest: u64,
    /// Generation the caller believes is current.
    pub current: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BloomFilterResponse {
    /// Whether the reply covers every generation back to `oldest`.
    pub complete: bool,
    pub oldest: u64,
    pub current: u64,
    pub filter: Vec<u8>,
}

/// The node-local tracker. Guard with a mutex; cycling and marking are both
/// short.
pub struct UpdateTracker {
    current: Bloom,
    /// (generation, filter) pairs, oldest first.
    history: VecDeque<(u64, Bloom)>,
    cycle: u64,
}

impl Default for UpdateTracker {
    fn default() -> Self {
        Self {
            current: Bloom::default(),
            history: VecDeque::new(),
            cycle: 1,
        }
    }
}

impl UpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }

    /// Records a written path in the current generation.
    pub fn mark(&mut self, path: &str) {
        self.current.add(path);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.current.contains(path)
    }

    /// Advances the generation when the caller is in sync and returns the
    /// merged prior filters back to `req.oldest`.
    pub fn cycle_filter(&mut self, req: &BloomCycleRequest) -> BloomFilterResponse {
        if req.current == self.cycle {
            let retiring = std::mem::take(&mut self.current);
            self.history.push_back((self.cycle, retiring));
            while self.history.len() > HISTORY_LIMIT {
                self.history.pop_front();
            }
            self.cycle += 1;
        }

        let mut merged = Bloom::default();
        let mut oldest_merged = self.cycle;
        for (generation, filter) in &self.history {
            if *generation >= req.oldest {
                merged.merge(filter);
                oldest_merged = oldest_merged.min(*generation);
            }
        }
        let complete = self
            .history
            .front()
            .map(|(generation, _)| *generation <= req.oldest)
            .unwrap_or(false);

        BloomFilterResponse {
            complete,
            oldest: oldest_merged,
            current: self.cycle,
            filter: merged.into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloom_membership() {
        let mut bloom = Bloom::default();
        bloom.add("bucket/object.txt");
        assert!(bloom.contains("bucket/object.txt"));
        assert!(!bloom.contains("bucket/other.txt"));
    }

    #[test]
    fn cycle_advances_and_returns_prior_filter() {
        let mut tracker = UpdateTracker::new();
        tracker.mark("b/key");
        assert_eq!(tracker.current_cycle(), 1);

        let resp = tracker.cycle_filter(&BloomCycleRequest {
            oldest: 1,
            current: 1,
        });
        assert_eq!(resp.current, 2);
        assert!(resp.complete);

        // The returned filter is the retired generation.
        let mut prior = Bloom::default();
        prior.add("b/key");
        assert_eq!(resp.filter, prior.into_bytes());

        // The fresh generation is empty again.
        assert!(!tracker.contains("b/key"));
    }

    #[test]
    fn out_of_sync_caller_does_not_advance() {
        let mut tracker = UpdateTracker::new();
        let resp = tracker.cycle_filter(&BloomCycleRequest {
            oldest: 1,
            current: 99,
        });
        assert_eq!(resp.current, 1);
        assert!(!resp.complete);
    }

    #[test]
    fn history_merges_generations() {
        let mut tracker = UpdateTracker::new();
        tracker.mark("gen1");
        tracker.cycle_filter(&BloomCycleRequest {
            oldest: 1,
            current: 1,
        });
        tracker.mark("gen2");
        let resp = tracker.cycle_filter(&BloomCycleRequest {
            oldest: 1,
            current: 2,
        });
        assert!(resp.complete);

        let merged = Bloom {
            bits: resp.filter.clone(),
        };
        assert!(merged.contains("gen1"));
        assert!(merged.contains("gen2"));
    }
}
