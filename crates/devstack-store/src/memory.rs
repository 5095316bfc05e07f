use crate::state::{PersistentServiceState, StateMap, StateStore};
use crate::StoreError;
use std::sync::Mutex;

/// In-memory [`StateStore`] for tests and embedders that pass their own store
/// to the engine. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<StateMap>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, as if a previous run had saved `states`.
    pub fn with_states(states: impl IntoIterator<Item = PersistentServiceState>) -> Self {
        let records = states
            .into_iter()
            .map(|s| (s.service.clone(), s))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, StateMap>, StoreError> {
        self.records
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("memory store: {e}")))
    }
}

impl StateStore for MemoryStateStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<StateMap, StoreError> {
        Ok(self.records()?.clone())
    }

    fn get(&self, service: &str) -> Result<Option<PersistentServiceState>, StoreError> {
        Ok(self.records()?.get(service).cloned())
    }

    fn save(&self, state: &PersistentServiceState) -> Result<(), StoreError> {
        self.records()?
            .insert(state.service.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<(), StoreError> {
        self.records()?.remove(service);
        Ok(())
    }
}
