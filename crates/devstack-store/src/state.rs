use crate::StoreError;
use devstack_schema::{ImageRef, Revision, ServiceName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of a service's source tree, computed fresh on every pass.
///
/// Only `Verified` is eligible for real rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RepoState {
    Missing,
    Cloned,
    OutOfDate,
    BuildFailed,
    Verified,
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoState::Missing => write!(f, "missing"),
            RepoState::Cloned => write!(f, "cloned"),
            RepoState::OutOfDate => write!(f, "out-of-date"),
            RepoState::BuildFailed => write!(f, "build-failed"),
            RepoState::Verified => write!(f, "verified"),
        }
    }
}

/// Durable verdict for one service, surviving process restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentServiceState {
    pub service: ServiceName,
    pub last_verified_state: RepoState,
    #[serde(default)]
    pub last_checked_revision: Option<Revision>,
    /// Image produced by the probe that verified `last_checked_revision`.
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Why the service is not verified, for status reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: String,
    /// blake3 checksum for integrity verification. `None` until written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PersistentServiceState {
    pub fn new(
        service: ServiceName,
        last_verified_state: RepoState,
        last_checked_revision: Option<Revision>,
        image: Option<ImageRef>,
    ) -> Self {
        Self {
            service,
            last_verified_state,
            last_checked_revision,
            image,
            detail: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Verified against a known revision with a built image on record.
    pub fn is_verified(&self) -> bool {
        self.last_verified_state == RepoState::Verified
            && self.last_checked_revision.is_some()
            && self.image.is_some()
    }

    /// Whether two records carry the same verdict, ignoring bookkeeping
    /// fields (timestamps, checksum, detail text).
    pub fn same_verdict(&self, other: &Self) -> bool {
        self.service == other.service
            && self.last_verified_state == other.last_verified_state
            && self.last_checked_revision == other.last_checked_revision
            && self.image == other.image
    }

    /// Compute the checksum over the record content (excluding the checksum field itself).
    pub(crate) fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub(crate) fn verify_checksum(&self) -> Result<(), StoreError> {
        if let Some(ref expected) = self.checksum {
            let actual = self.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    service: self.service.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Full set of persisted verdicts, keyed by service name.
pub type StateMap = BTreeMap<ServiceName, PersistentServiceState>;

/// Key-value durability for [`PersistentServiceState`], keyed by service name.
///
/// Implementations must make `save` atomic per key: a concurrent reader never
/// observes a partially written record. No cross-key transactionality is
/// required.
pub trait StateStore: Send + Sync {
    fn name(&self) -> &str;

    /// Return every recorded verdict. A store with no prior run returns an
    /// empty map, not an error.
    fn load(&self) -> Result<StateMap, StoreError>;

    fn get(&self, service: &str) -> Result<Option<PersistentServiceState>, StoreError>;

    fn save(&self, state: &PersistentServiceState) -> Result<(), StoreError>;

    fn remove(&self, service: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistentServiceState {
        PersistentServiceState::new(
            "ingestor".into(),
            RepoState::Verified,
            Some(Revision::new("a".repeat(40))),
            Some(ImageRef::new("devstack/ingestor:aaaaaaaaaaaa")),
        )
    }

    #[test]
    fn repo_state_display() {
        assert_eq!(RepoState::OutOfDate.to_string(), "out-of-date");
        assert_eq!(RepoState::BuildFailed.to_string(), "build-failed");
        assert_eq!(RepoState::Verified.to_string(), "verified");
    }

    #[test]
    fn verified_requires_revision_and_image() {
        assert!(sample().is_verified());
        let mut no_image = sample();
        no_image.image = None;
        assert!(!no_image.is_verified());
        let mut failed = sample();
        failed.last_verified_state = RepoState::BuildFailed;
        assert!(!failed.is_verified());
    }

    #[test]
    fn same_verdict_ignores_bookkeeping() {
        let a = sample();
        let mut b = sample().with_detail("note");
        b.updated_at = "2020-01-01T00:00:00Z".to_owned();
        assert!(a.same_verdict(&b));
        b.last_checked_revision = Some(Revision::new("b".repeat(40)));
        assert!(!a.same_verdict(&b));
    }

    #[test]
    fn checksum_detects_tampering() {
        let mut s = sample();
        s.checksum = Some(s.compute_checksum().unwrap());
        s.verify_checksum().unwrap();
        s.last_verified_state = RepoState::BuildFailed;
        assert!(matches!(
            s.verify_checksum(),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn legacy_record_without_optional_fields_parses() {
        let json = r#"{
            "service": "ui",
            "last_verified_state": "Missing",
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let s: PersistentServiceState = serde_json::from_str(json).unwrap();
        assert_eq!(s.last_verified_state, RepoState::Missing);
        assert!(s.last_checked_revision.is_none());
        assert!(s.checksum.is_none());
    }
}
