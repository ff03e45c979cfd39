//! Reviewer selection primitives.
//!
//! Selection is expressed as a uniform random permutation of the eligible
//! pool followed by a prefix, kept separate from any I/O so it can be tested
//! with a seeded rng. The permutation order carries no meaning.

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `pool` uniformly and keep the first `min(max, pool.len())`
/// entries, preserving the permutation order.
pub fn random_prefix<T: Clone, R: Rng + ?Sized>(pool: &[T], max: usize, rng: &mut R) -> Vec<T> {
    let mut picked = pool.to_vec();
    picked.shuffle(rng);
    picked.truncate(max);
    picked
}

/// Choose one element of `pool` uniformly at random.
pub fn pick_one<T: Clone, R: Rng + ?Sized>(pool: &[T], rng: &mut R) -> Option<T> {
    pool.choose(rng).cloned()
}
