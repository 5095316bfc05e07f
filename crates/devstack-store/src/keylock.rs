use crate::StoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lazily populated table of one mutex per key.
///
/// Writers to the same key serialize; writers to different keys never
/// contend beyond the brief table lookup.
#[derive(Debug, Default)]
pub struct KeyLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(
        &self,
        key: &str,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let slot = {
            let mut table = self
                .table
                .lock()
                .map_err(|e| StoreError::LockPoisoned(format!("key table: {e}")))?;
            Arc::clone(table.entry(key.to_owned()).or_default())
        };
        let _guard = slot
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("key '{key}': {e}")))?;
        f()
    }
}
