// Draw engine: uniform random selection over the remaining pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniformly distributed indices.
///
/// Injected into the [`DrawEngine`] so tests can substitute a deterministic
/// source for the thread RNG.
pub trait RandomSource: Send + Sync {
    /// Return an index in `0..len`. Callers never pass `len == 0`.
    fn pick_index(&self, len: usize) -> usize;
}

/// Production source backed by rand's thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..len)
    }
}

/// Reproducible source seeded from a fixed value.
#[derive(Debug)]
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        SeededRandomSource {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..len)
    }
}

/// Always returns the same index (modulo the candidate count).
#[derive(Debug, Clone, Copy)]
pub struct FixedRandomSource {
    value: usize,
}

impl FixedRandomSource {
    pub fn new(value: usize) -> Self {
        FixedRandomSource { value }
    }

    /// A source that always picks the first candidate.
    pub fn first() -> Self {
        Self::new(0)
    }
}

impl RandomSource for FixedRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.value % len
        }
    }
}

/// Cycles through a fixed list of indices, one per call.
#[derive(Debug)]
pub struct SequenceRandomSource {
    values: Vec<usize>,
    cursor: AtomicUsize,
}

impl SequenceRandomSource {
    pub fn new(values: Vec<usize>) -> Self {
        SequenceRandomSource {
            values,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for SequenceRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        if len == 0 || self.values.is_empty() {
            return 0;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.values[n % self.values.len()] % len
    }
}

/// Selects one item uniformly from a non-empty candidate sequence.
#[derive(Clone)]
pub struct DrawEngine {
    source: Arc<dyn RandomSource>,
}

impl DrawEngine {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        DrawEngine { source }
    }

    /// Engine backed by the thread RNG.
    pub fn thread_rng() -> Self {
        Self::new(Arc::new(ThreadRandomSource))
    }

    /// Engine backed by a seeded, reproducible RNG.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Arc::new(SeededRandomSource::new(seed)))
    }

    /// Index of the chosen candidate, each with probability 1/N.
    ///
    /// Returns `None` for an empty candidate list.
    pub fn select(&self, candidates: &[String]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        // Clamp so a misbehaving source can never index out of bounds.
        Some(self.source.pick_index(candidates.len()).min(candidates.len() - 1))
    }
}

impl std::fmt::Debug for DrawEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawEngine").finish_non_exhaustive()
    }
}
