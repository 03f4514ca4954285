pub mod symbol_state;

pub use symbol_state::{GreenRunState, SymbolState};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Thread-safe store of per-symbol state (C5).
///
/// Each symbol's state is behind its own `Mutex` so that the stream path and
/// the REST pull path — both of which may run concurrently — serialize their
/// writes to a given symbol without blocking unrelated symbols. The
/// directory of symbols itself is a `RwLock<HashMap>`, replaced by
/// individual insert/remove rather than wholesale swap (unlike the
/// watchlist, which is copy-on-write as a whole).
pub struct SymbolStateStore {
    symbols: RwLock<HashMap<String, Arc<Mutex<SymbolState>>>>,
}

impl SymbolStateStore {
    pub fn new() -> Self {
        Self { symbols: RwLock::new(HashMap::new()) }
    }

    /// Fetch the shared handle for `symbol`, if it is currently tracked.
    pub fn get(&self, symbol: &str) -> Option<Arc<Mutex<SymbolState>>> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Insert or replace the state for `symbol`.
    pub fn upsert(&self, symbol: &str, state: SymbolState) {
        self.symbols.write().insert(symbol.to_string(), Arc::new(Mutex::new(state)));
    }

    /// Remove and drop `symbol`'s state (called when it leaves the
    /// watchlist or the scanner stops).
    pub fn remove(&self, symbol: &str) {
        self.symbols.write().remove(symbol);
    }

    /// List the currently tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }

    /// Drop every tracked symbol (called on scanner stop).
    pub fn clear(&self) {
        self.symbols.write().clear();
    }
}

impl Default for SymbolStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_get_remove_round_trip() {
        let store = SymbolStateStore::new();
        store.upsert("AAA", SymbolState::new("AAA", 20.0, 1.0, 1.0));
        assert!(store.get("AAA").is_some());
        assert_eq!(store.len(), 1);

        store.remove("AAA");
        assert!(store.get("AAA").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn concurrent_handles_share_the_same_mutex() {
        let store = SymbolStateStore::new();
        store.upsert("AAA", SymbolState::new("AAA", 20.0, 1.0, 1.0));

        let a = store.get("AAA").unwrap();
        let b = store.get("AAA").unwrap();
        a.lock().cumulative_volume = 42;
        assert_eq!(b.lock().cumulative_volume, 42);
    }
}
