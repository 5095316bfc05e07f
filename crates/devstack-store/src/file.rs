use crate::keylock::KeyLocks;
use crate::layout::WorkspaceLayout;
use crate::state::{PersistentServiceState, StateMap, StateStore};
use crate::{write_atomic, StoreError};
use devstack_schema::validate_service_name;
use std::fs;
use std::path::PathBuf;

const RECORD_EXT: &str = "json";

/// File-backed [`StateStore`]: one checksummed JSON record per service under
/// `<workspace>/.devstack/state/`, replaced atomically on every save.
pub struct FileStateStore {
    layout: WorkspaceLayout,
    locks: KeyLocks,
}

impl FileStateStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self {
            layout,
            locks: KeyLocks::new(),
        }
    }

    fn record_path(&self, service: &str) -> Result<PathBuf, StoreError> {
        validate_service_name(service).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Ok(self
            .layout
            .state_dir()
            .join(format!("{service}.{RECORD_EXT}")))
    }

    fn read_record(&self, path: &std::path::Path) -> Result<PersistentServiceState, StoreError> {
        let content = fs::read_to_string(path)?;
        let state: PersistentServiceState = serde_json::from_str(&content)?;
        state.verify_checksum()?;
        Ok(state)
    }

    /// Like [`load`](StateStore::load), but returns per-record `Result`s so
    /// callers (e.g. `doctor`) can surface individual corruption errors.
    #[allow(clippy::type_complexity)]
    pub fn load_with_errors(
        &self,
    ) -> Result<Vec<Result<PersistentServiceState, (String, StoreError)>>, StoreError> {
        let dir = self.layout.state_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let label = entry.file_name().to_string_lossy().into_owned();
            if label.starts_with('.') {
                continue;
            }
            match self.read_record(&path) {
                Ok(state) => results.push(Ok(state)),
                Err(e) => results.push(Err((label, e))),
            }
        }
        Ok(results)
    }
}

impl StateStore for FileStateStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Result<StateMap, StoreError> {
        let mut map = StateMap::new();
        for result in self.load_with_errors()? {
            match result {
                Ok(state) => {
                    map.insert(state.service.clone(), state);
                }
                Err((label, e)) => {
                    tracing::warn!("skipping corrupted state record '{label}': {e}");
                }
            }
        }
        Ok(map)
    }

    fn get(&self, service: &str) -> Result<Option<PersistentServiceState>, StoreError> {
        let path = self.record_path(service)?;
        if !path.exists() {
            return Ok(None);
        }
        self.read_record(&path).map(Some)
    }

    fn save(&self, state: &PersistentServiceState) -> Result<(), StoreError> {
        let dest = self.record_path(&state.service)?;

        let mut with_checksum = state.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        self.locks.with_lock(&state.service, || {
            write_atomic(&dest, content.as_bytes())?;
            tracing::debug!(
                "saved state for {}: {}",
                state.service,
                state.last_verified_state
            );
            Ok(())
        })
    }

    fn remove(&self, service: &str) -> Result<(), StoreError> {
        let path = self.record_path(service)?;
        self.locks.with_lock(service, || {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            Ok(())
        })
    }
}
