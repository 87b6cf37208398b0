// Pool & assignment store: the single shared state of a drawing session.
//
// Every read and write goes through one mutex, so a draw (check assigned,
// check empty, select, remove, assign) and a reset are each indivisible with
// respect to one another. Nothing logs while the lock is held.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::roster::{fold, Participant};

/// Why a draw was refused. Neither variant changes the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("{participant} already has: {item}")]
    AlreadyAssigned { participant: String, item: String },

    #[error("No items remaining!")]
    PoolEmpty,
}

/// A committed participant-to-item binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// The participant as they spelled it on their draw.
    pub participant: String,
    pub item: String,
}

/// Full observable state: who holds what, and what is left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub assignments: BTreeMap<String, String>,
    pub items: Vec<String>,
}

#[derive(Debug)]
struct PoolState {
    /// Remaining items, in seed order minus whatever has been drawn.
    pool: Vec<String>,
    /// Keyed by folded participant identity.
    assignments: HashMap<String, Assignment>,
}

impl PoolState {
    fn fresh(seed: &[String]) -> Self {
        PoolState {
            pool: seed.to_vec(),
            assignments: HashMap::new(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            assignments: self
                .assignments
                .values()
                .map(|a| (a.participant.clone(), a.item.clone()))
                .collect(),
            items: self.pool.clone(),
        }
    }
}

/// Process-wide pool and assignment store.
#[derive(Debug)]
pub struct Store {
    seed: Vec<String>,
    state: Mutex<PoolState>,
}

impl Store {
    /// Create a store whose pool starts as (and resets to) `seed`.
    pub fn new(seed: Vec<String>) -> Self {
        let state = PoolState::fresh(&seed);
        Store {
            seed,
            state: Mutex::new(state),
        }
    }

    /// The seed items the pool is restored to on reset.
    pub fn seed(&self) -> &[String] {
        &self.seed
    }

    // A panic while holding the lock cannot leave the state half-mutated:
    // every mutation below completes before the guard is dropped.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current remaining items and assignments.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Current remaining items, in pool order.
    pub fn remaining(&self) -> Vec<String> {
        self.lock().pool.clone()
    }

    /// The item held by `identity` (any casing), if any.
    pub fn assignment_of(&self, identity: &str) -> Option<Assignment> {
        self.lock().assignments.get(&fold(identity.trim())).cloned()
    }

    /// Atomically draw one item for `participant`.
    ///
    /// `select` receives the non-empty remaining pool and returns the index of
    /// the item to take. It runs while the store is locked, so it must not
    /// call back into the store.
    pub fn try_draw<F>(&self, participant: &Participant, select: F) -> Result<String, DrawError>
    where
        F: FnOnce(&[String]) -> usize,
    {
        let mut state = self.lock();

        if let Some(existing) = state.assignments.get(&participant.key) {
            return Err(DrawError::AlreadyAssigned {
                participant: existing.participant.clone(),
                item: existing.item.clone(),
            });
        }

        if state.pool.is_empty() {
            return Err(DrawError::PoolEmpty);
        }

        let last = state.pool.len() - 1;
        let idx = select(&state.pool).min(last);
        let item = state.pool.remove(idx);
        state.assignments.insert(
            participant.key.clone(),
            Assignment {
                participant: participant.display.clone(),
                item: item.clone(),
            },
        );

        let remaining = state.pool.len();
        drop(state);

        info!(participant = %participant.display, remaining, "Item drawn");
        Ok(item)
    }

    /// Restore the pool to the seed items and clear every assignment.
    pub fn reset(&self) {
        *self.lock() = PoolState::fresh(&self.seed);
        info!(items = self.seed.len(), "Pool reset");
    }
}
