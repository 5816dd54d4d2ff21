//! Randomness behind every game draw.
//!
//! Games only ever ask for a uniform integer below a bound, so a replayable
//! source is just a list of those integers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub trait RandomSource: Send {
    /// Uniform integer in `[0, bound)`; 0 when `bound` is 0
    fn next_below(&mut self, bound: u32) -> u32;

    /// [`next_below`](Self::next_below) held to the bound even when the
    /// source ignores it. Games draw through this.
    fn draw_below(&mut self, bound: u32) -> u32 {
        match bound {
            0 => 0,
            _ => self.next_below(bound) % bound,
        }
    }
}

/// Any `rand` generator
pub struct RngSource<R> {
    rng: R,
}

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSource<StdRng> {
    /// Reproducible sequence for a seed
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn next_below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.rng.gen_range(0..bound)
    }
}

/// Returns the same value whatever the bound
#[cfg(test)]
pub(crate) struct FixedSource(pub u32);

#[cfg(test)]
impl RandomSource for FixedSource {
    fn next_below(&mut self, _bound: u32) -> u32 {
        self.0
    }
}

/// Replays a fixed list of draws, then yields 0.
///
/// Each value is reduced modulo the requested bound.
#[derive(Debug, Default, Clone)]
pub struct ScriptedSource {
    draws: VecDeque<u32>,
}

impl ScriptedSource {
    pub fn new<I: IntoIterator<Item = u32>>(draws: I) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }

    pub fn push(&mut self, draw: u32) {
        self.draws.push_back(draw);
    }

    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

impl RandomSource for ScriptedSource {
    fn next_below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.draws.pop_front().map(|d| d % bound).unwrap_or(0)
    }
}
