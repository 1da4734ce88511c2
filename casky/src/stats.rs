//! Process-local operation counters, kept under their own lock so they can
//! be read while a mutation is in flight.

use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};

/// A point-in-time copy of the engine's counters, safe to hand to a caller
/// or serialize for the daemon's `STATS` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub num_puts: u64,
    pub num_gets: u64,
    pub num_deletes: u64,
    pub total_keys: u64,
    pub memory_bytes: u64,
}

#[derive(Default)]
struct Counters {
    num_puts: u64,
    num_gets: u64,
    num_deletes: u64,
}

/// The engine's live statistics, guarded independently of the engine's own
/// serialization lock.
pub struct Stats {
    counters: Mutex<Counters>,
}

impl Stats {
    pub fn new() -> Self {
        Self { counters: Mutex::new(Counters::default()) }
    }

    pub fn record_put(&self) {
        self.counters.lock().expect("stats mutex poisoned").num_puts += 1;
    }

    pub fn record_get(&self) {
        self.counters.lock().expect("stats mutex poisoned").num_gets += 1;
    }

    pub fn record_delete(&self) {
        self.counters.lock().expect("stats mutex poisoned").num_deletes += 1;
    }

    /// Combines the running counters with the directory's current size to
    /// produce a full snapshot.
    pub fn snapshot(&self, total_keys: u64, memory_bytes: u64) -> StatsSnapshot {
        let counters = self.counters.lock().expect("stats mutex poisoned");
        StatsSnapshot {
            num_puts: counters.num_puts,
            num_gets: counters.num_gets,
            num_deletes: counters.num_deletes,
            total_keys,
            memory_bytes,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
