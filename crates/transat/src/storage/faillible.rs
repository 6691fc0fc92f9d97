/// FaillibleStorage: in-memory backend whose writes may be dropped.
///
/// The held-set is a `HashSet`, so storing the same message twice never
/// creates a second copy. Whether a given `store` call is dropped is decided
/// by a [`FailurePlan`], counted per backend across all messages.
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StorageError;
use crate::metrics::Counter;
use crate::storage::Storage;
use crate::types::{Message, PublisherId};

/// When a [`FaillibleStorage`] drops writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailurePlan {
    /// Every write lands.
    Never,
    /// The first `k` store calls are dropped, every later one lands.
    DropFirst(u64),
    /// Each store call is dropped with probability `drop_rate` (clamped to
    /// `[0, 1]`). Deterministic for a given seed.
    Random { drop_rate: f64, seed: u64 },
    /// Every write is dropped.
    Always,
}

struct FaultState {
    plan: FailurePlan,
    rng: StdRng,
    /// Store calls decided under the current plan.
    seen: u64,
}

impl FaultState {
    fn new(plan: FailurePlan) -> Self {
        let seed = match plan {
            FailurePlan::Random { seed, .. } => seed,
            _ => 0,
        };
        Self {
            plan,
            rng: StdRng::seed_from_u64(seed),
            seen: 0,
        }
    }

    fn should_drop(&mut self) -> bool {
        let dropped = match self.plan {
            FailurePlan::Never => false,
            FailurePlan::Always => true,
            FailurePlan::DropFirst(k) => self.seen < k,
            FailurePlan::Random { drop_rate, .. } => {
                // NaN and non-positive rates never drop
                if !(drop_rate > 0.0) {
                    false
                } else if drop_rate >= 1.0 {
                    true
                } else {
                    self.rng.random_bool(drop_rate)
                }
            }
        };
        self.seen += 1;
        dropped
    }
}

/// In-memory storage backend with configurable write failures.
pub struct FaillibleStorage<M> {
    name: String,
    values: Mutex<HashSet<M>>,
    /// Landed writes per publisher (re-stores of a held message included).
    writes: Mutex<HashMap<PublisherId, u64>>,
    faults: Mutex<FaultState>,
    store_calls: Counter,
    dropped_calls: Counter,
    holds_calls: Counter,
}

impl<M: Message> FaillibleStorage<M> {
    pub fn new(name: impl Into<String>, plan: FailurePlan) -> Self {
        Self {
            name: name.into(),
            values: Mutex::new(HashSet::new()),
            writes: Mutex::new(HashMap::new()),
            faults: Mutex::new(FaultState::new(plan)),
            store_calls: Counter::new(),
            dropped_calls: Counter::new(),
            holds_calls: Counter::new(),
        }
    }

    /// Snapshot of the held-set.
    pub fn values(&self) -> HashSet<M> {
        lock(&self.values).clone()
    }

    /// Total `store` calls received, dropped or not.
    pub fn store_calls(&self) -> u64 {
        self.store_calls.get()
    }

    /// `store` calls that were dropped.
    pub fn dropped_calls(&self) -> u64 {
        self.dropped_calls.get()
    }

    /// Total `holds` calls received.
    pub fn holds_calls(&self) -> u64 {
        self.holds_calls.get()
    }

    /// Writes from `publisher` that landed.
    pub fn writes_from(&self, publisher: &PublisherId) -> u64 {
        lock(&self.writes).get(publisher).copied().unwrap_or(0)
    }

    /// Replace the failure plan. The drop counter and RNG restart from zero.
    pub fn set_plan(&self, plan: FailurePlan) {
        *lock(&self.faults) = FaultState::new(plan);
    }

    pub fn plan(&self) -> FailurePlan {
        lock(&self.faults).plan
    }
}

#[async_trait::async_trait]
impl<M: Message> Storage<M> for FaillibleStorage<M> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, publisher: &PublisherId, message: &M) {
        self.store_calls.inc();

        if lock(&self.faults).should_drop() {
            self.dropped_calls.inc();
            tracing::trace!(backend = %self.name, ?message, "write dropped");
            return;
        }

        lock(&self.values).insert(message.clone());
        *lock(&self.writes).entry(*publisher).or_default() += 1;
    }

    async fn holds(&self, message: &M) -> Result<bool, StorageError> {
        self.holds_calls.inc();
        Ok(lock(&self.values).contains(message))
    }
}

/// The guarded data stays consistent across a panic (single inserts only).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
