//! Seedable device shuffling.
//!
//! Read access is spread across devices by returning a fresh random
//! permutation of the device list on every call. The permutation is a
//! Fisher–Yates shuffle: walking from the last index down, each slot `i` is
//! swapped with a uniformly chosen slot in `0..=i`. Every permutation is
//! equally likely, and a fixed seed reproduces the same sequence.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shuffle `items` in place.
pub fn fisher_yates<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Thread-safe shuffler owning its RNG.
pub struct Shuffler {
    rng: Mutex<StdRng>,
}

impl Shuffler {
    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for a given seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Shuffle `items` in place.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        let mut rng = self.rng.lock();
        fisher_yates(items, &mut *rng);
    }

    /// Return a shuffled copy of `items`.
    pub fn shuffled<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        self.shuffle(&mut out);
        out
    }
}

impl Default for Shuffler {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for Shuffler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shuffler").finish_non_exhaustive()
    }
}
