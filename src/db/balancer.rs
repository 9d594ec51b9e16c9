//! Weighted replica selection.
//!
//! A [`LoadBalancer`] picks one connection string out of a set of weighted
//! replicas. Implementations must be callable concurrently; the bundled ones
//! either keep no state at all ([`WeightedRandom`]) or a single atomic
//! counter ([`WeightedRoundRobin`]).

use rand::distributions::{Distribution, WeightedIndex};
use std::sync::atomic::{AtomicU64, Ordering};

/// Selects the endpoint that should answer a read.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `candidates` according to the parallel `weights`.
    /// Returns `primary` when there is nothing to choose from.
    fn select<'a>(&self, primary: &'a str, candidates: &'a [String], weights: &[u32]) -> &'a str;
}

/// Selection strategy names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BalancerKind {
    /// Weighted random choice per operation
    #[default]
    Random,
    /// Deterministic weighted rotation
    RoundRobin,
}

impl BalancerKind {
    pub fn build(self) -> std::sync::Arc<dyn LoadBalancer> {
        match self {
            Self::Random => std::sync::Arc::new(WeightedRandom),
            Self::RoundRobin => std::sync::Arc::new(WeightedRoundRobin::new()),
        }
    }
}

/// Usable (candidates, weights) pair, or `None` when selection must fall back.
fn usable_weights(candidates: &[String], weights: &[u32]) -> Option<usize> {
    if candidates.is_empty() || candidates.len() != weights.len() {
        return None;
    }
    if weights.iter().all(|w| *w == 0) {
        return None;
    }
    Some(candidates.len())
}

/// Weighted random selection. Stateless; each call uses the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandom;

impl LoadBalancer for WeightedRandom {
    fn select<'a>(&self, primary: &'a str, candidates: &'a [String], weights: &[u32]) -> &'a str {
        if usable_weights(candidates, weights).is_none() {
            return primary;
        }
        // Summed as u64: u32 weights may add up past u32::MAX.
        match WeightedIndex::new(weights.iter().map(|w| u64::from(*w))) {
            Ok(dist) => &candidates[dist.sample(&mut rand::thread_rng())],
            Err(_) => primary,
        }
    }
}

/// Weighted rotation: candidate `i` is returned `weights[i]` times per cycle.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select<'a>(&self, primary: &'a str, candidates: &'a [String], weights: &[u32]) -> &'a str {
        if usable_weights(candidates, weights).is_none() {
            return primary;
        }
        let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for (candidate, weight) in candidates.iter().zip(weights) {
            let weight = u64::from(*weight);
            if slot < weight {
                return candidate;
            }
            slot -= weight;
        }
        primary
    }
}
