//! Concurrency guard: one in-flight lifecycle per symbol plus re-entry cooldowns.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Default)]
struct GuardState {
    active: HashSet<String>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

/// Shared registry of active symbols and cooldown deadlines.
///
/// Both maps sit behind one mutex so acquisition and cooldown checks are
/// atomic with respect to other lifecycle runs.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    state: Mutex<GuardState>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed cooldowns restored from the store.
    pub fn with_cooldowns(cooldowns: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            state: Mutex::new(GuardState {
                active: HashSet::new(),
                cooldowns,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        // A panic while holding the lock cannot leave the sets half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the symbol's lock. False if another run holds it.
    pub fn try_acquire(&self, symbol: &str) -> bool {
        let acquired = self.lock().active.insert(symbol.to_string());
        debug!(symbol = %symbol, acquired = acquired, "Lock acquisition");
        acquired
    }

    pub fn release(&self, symbol: &str) {
        self.lock().active.remove(symbol);
        debug!(symbol = %symbol, "Lock released");
    }

    #[cfg(test)]
    pub fn is_active(&self, symbol: &str) -> bool {
        self.lock().active.contains(symbol)
    }

    /// True while `now` is before the symbol's re-entry deadline.
    pub fn in_cooldown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.lock()
            .cooldowns
            .get(symbol)
            .is_some_and(|until| now < *until)
    }

    pub fn set_cooldown(&self, symbol: &str, until: DateTime<Utc>) {
        self.lock().cooldowns.insert(symbol.to_string(), until);
    }

    pub fn cooldown_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.lock().cooldowns.get(symbol).copied()
    }

    /// Acquire the lock as a lease that releases itself when dropped.
    pub fn lease(self: &Arc<Self>, symbol: &str) -> Option<SymbolLease> {
        self.try_acquire(symbol).then(|| SymbolLease {
            guard: Arc::clone(self),
            symbol: symbol.to_string(),
        })
    }
}

/// Held for one full lifecycle run. Dropping it releases the symbol on every
/// exit path, including errors and panics.
#[derive(Debug)]
pub struct SymbolLease {
    guard: Arc<ConcurrencyGuard>,
    symbol: String,
}

impl Drop for SymbolLease {
    fn drop(&mut self) {
        self.guard.release(&self.symbol);
    }
}
