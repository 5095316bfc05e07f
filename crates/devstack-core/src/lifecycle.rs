use crate::CoreError;
use devstack_store::RepoState;

/// Check that a service may settle on `verdict` given how acquisition went.
///
/// Only the acquirer produces `Missing`, and only the prober turns an acquired
/// tree into `Verified` or `BuildFailed`. A pass that was interrupted between
/// the two steps may leave the acquisition state itself as the verdict.
pub fn validate_transition(
    service: &str,
    acquired: RepoState,
    verdict: RepoState,
) -> Result<(), CoreError> {
    let valid = matches!(
        (acquired, verdict),
        (RepoState::Missing, RepoState::Missing)
            | (
                RepoState::Cloned | RepoState::OutOfDate,
                RepoState::Verified | RepoState::BuildFailed
            )
            | (RepoState::Cloned, RepoState::Cloned)
            | (RepoState::OutOfDate, RepoState::OutOfDate)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            service: service.to_owned(),
            from: acquired.to_string(),
            to: verdict.to_string(),
        })
    }
}
