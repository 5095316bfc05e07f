use devstack_runtime::{is_failsafe_dockerfile, BuildRequest, ImageBuilder};
use devstack_schema::{ImageRef, Revision, ServiceSpec};
use devstack_store::{PersistentServiceState, RepoState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tag of the image built for `name` at `revision`.
pub fn image_tag(name: &str, revision: &Revision) -> ImageRef {
    ImageRef::new(format!("devstack/{name}:{}", revision.short()))
}

/// Whether `revision` must be probed given the last persisted verdict.
///
/// A settled verdict (`Verified` or `BuildFailed`) for the same revision is
/// reused; anything else needs a fresh build.
pub fn needs_probe(prior: Option<&PersistentServiceState>, revision: &Revision) -> bool {
    match prior {
        Some(p) if p.last_checked_revision.as_ref() == Some(revision) => match p.last_verified_state {
            RepoState::Verified => !p.is_verified(),
            RepoState::BuildFailed => false,
            _ => true,
        },
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ProbeOutcome {
    Built { image: ImageRef },
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn state(&self) -> RepoState {
        match self {
            ProbeOutcome::Built { .. } => RepoState::Verified,
            ProbeOutcome::Failed { .. } => RepoState::BuildFailed,
        }
    }
}

/// Decides whether an acquired source tree produces a working image.
pub struct Prober<'a> {
    builder: &'a dyn ImageBuilder,
    timeout: Duration,
}

impl<'a> Prober<'a> {
    pub fn new(builder: &'a dyn ImageBuilder, timeout: Duration) -> Self {
        Self { builder, timeout }
    }

    /// Build `spec` from the checkout at `checkout`, tagging the image for
    /// `revision`. Every failure mode becomes [`ProbeOutcome::Failed`].
    pub fn probe(&self, spec: &ServiceSpec, checkout: &Path, revision: &Revision) -> ProbeOutcome {
        let context = checkout.join(&spec.context);
        let dockerfile = context.join(&spec.dockerfile);

        if !dockerfile.is_file() {
            warn!("{}: no build file at {}", spec.name, dockerfile.display());
            return ProbeOutcome::Failed {
                reason: format!("build file not found: {}", spec.dockerfile.display()),
            };
        }
        if is_failsafe_dockerfile(&dockerfile) {
            warn!("{}: repository carries a failsafe placeholder build file", spec.name);
            return ProbeOutcome::Failed {
                reason: "build file is a failsafe placeholder".to_owned(),
            };
        }

        let tag = image_tag(&spec.name, revision);
        let request = BuildRequest {
            context,
            dockerfile,
            tag: tag.clone(),
            build_args: BTreeMap::new(),
            timeout: self.timeout,
        };
        debug!("{}: probing {} with {}", spec.name, revision.short(), self.builder.name());
        match self.builder.build(&request) {
            Ok(()) => {
                info!("{}: verified at {}", spec.name, revision.short());
                ProbeOutcome::Built { image: tag }
            }
            Err(e) => {
                warn!("{}: build failed at {}: {e}", spec.name, revision.short());
                let reason = if e.is_timeout() {
                    format!("build timed out: {e}")
                } else {
                    format!("build failed: {e}")
                };
                ProbeOutcome::Failed { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstack_runtime::mock::ScriptedBuilder;
    use devstack_runtime::FAILSAFE_DOCKERFILE;
    use devstack_schema::{ServiceName, FAILSAFE_IMAGE};
    use std::fs;

    const T: Duration = Duration::from_secs(5);
    const REV: &str = "0123456789abcdef0123456789abcdef01234567";

    fn spec(context: &str) -> ServiceSpec {
        ServiceSpec {
            name: ServiceName::new("ai-core"),
            url: "https://example.com/ai-core.git".to_owned(),
            branch: "main".to_owned(),
            context: context.into(),
            dockerfile: "Dockerfile".into(),
            port: 8000,
            depends_on: Vec::new(),
            mock_image: ImageRef::new(FAILSAFE_IMAGE),
        }
    }

    fn state(kind: RepoState, rev: &str, image: Option<&str>) -> PersistentServiceState {
        PersistentServiceState::new(
            "ai-core".into(),
            kind,
            Some(Revision::new(rev)),
            image.map(ImageRef::new),
        )
    }

    #[test]
    fn tag_uses_short_revision() {
        assert_eq!(
            image_tag("ai-core", &Revision::new(REV)).as_str(),
            "devstack/ai-core:0123456789ab"
        );
    }

    #[test]
    fn needs_probe_rules() {
        let rev = Revision::new(REV);
        assert!(needs_probe(None, &rev));
        assert!(!needs_probe(
            Some(&state(RepoState::Verified, REV, Some("devstack/ai-core:0123456789ab"))),
            &rev
        ));
        assert!(!needs_probe(Some(&state(RepoState::BuildFailed, REV, None)), &rev));
        assert!(needs_probe(Some(&state(RepoState::Verified, "other", Some("x"))), &rev));
        assert!(needs_probe(Some(&state(RepoState::Missing, REV, None)), &rev));
        // A verified record without an image cannot be rendered, so rebuild.
        assert!(needs_probe(Some(&state(RepoState::Verified, REV, None)), &rev));
    }

    #[test]
    fn successful_build_is_verified() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let builder = ScriptedBuilder::new();
        let out = Prober::new(&builder, T).probe(&spec("."), dir.path(), &Revision::new(REV));
        assert_eq!(
            out,
            ProbeOutcome::Built {
                image: ImageRef::new("devstack/ai-core:0123456789ab")
            }
        );
        assert_eq!(out.state(), RepoState::Verified);
        let req = &builder.requests()[0];
        assert_eq!(req.dockerfile, dir.path().join(".").join("Dockerfile"));
    }

    #[test]
    fn nested_context_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("server")).unwrap();
        fs::write(dir.path().join("server/Dockerfile"), "FROM scratch\n").unwrap();
        let builder = ScriptedBuilder::new();
        let out = Prober::new(&builder, T).probe(&spec("server"), dir.path(), &Revision::new(REV));
        assert_eq!(out.state(), RepoState::Verified);
        assert_eq!(builder.requests()[0].context, dir.path().join("server"));
    }

    #[test]
    fn missing_build_file_fails_without_building() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ScriptedBuilder::new();
        let out = Prober::new(&builder, T).probe(&spec("."), dir.path(), &Revision::new(REV));
        assert_eq!(out.state(), RepoState::BuildFailed);
        assert_eq!(builder.build_count(), 0);
    }

    #[test]
    fn placeholder_build_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), FAILSAFE_DOCKERFILE).unwrap();
        let builder = ScriptedBuilder::new();
        let out = Prober::new(&builder, T).probe(&spec("."), dir.path(), &Revision::new(REV));
        match out {
            ProbeOutcome::Failed { reason } => assert!(reason.contains("placeholder")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(builder.build_count(), 0);
    }

    #[test]
    fn build_timeout_is_build_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let builder = ScriptedBuilder::new();
        builder.stall_tag_prefix("devstack/ai-core:");
        let out = Prober::new(&builder, T).probe(&spec("."), dir.path(), &Revision::new(REV));
        match out {
            ProbeOutcome::Failed { reason } => assert!(reason.starts_with("build timed out"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn builder_error_is_build_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let builder = ScriptedBuilder::new();
        builder.fail_tag_prefix("devstack/ai-core:");
        let out = Prober::new(&builder, T).probe(&spec("."), dir.path(), &Revision::new(REV));
        assert_eq!(out.state(), RepoState::BuildFailed);
    }
}
