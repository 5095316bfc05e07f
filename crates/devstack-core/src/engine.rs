use crate::acquirer::Acquirer;
use crate::concurrency::{shutdown_requested, WorkspaceLock};
use crate::lifecycle::validate_transition;
use crate::manifest::{generate, ComposeManifest, Rendering};
use crate::prober::{needs_probe, ProbeOutcome, Prober};
use crate::CoreError;
use devstack_runtime::{
    Backends, ComposeDriver, ContainerState, ImageBuilder, VcsBackend, FAILSAFE_DOCKERFILE,
};
use devstack_schema::{validate_graph, ImageRef, Registry, Revision, ServiceName, ServiceSpec};
use devstack_store::{
    write_atomic, FileStateStore, PersistentServiceState, RepoState, StateMap, StateStore,
    WorkspaceLayout,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reconciliation engine for one workspace and one registry.
///
/// Each pass acquires every service, probes the ones whose revision changed,
/// persists the verdicts, and only then regenerates the compose manifest from
/// the complete state set.
pub struct Engine {
    registry: Registry,
    layout: WorkspaceLayout,
    vcs: Box<dyn VcsBackend>,
    builder: Box<dyn ImageBuilder>,
    compose: Box<dyn ComposeDriver>,
    store: Box<dyn StateStore>,
    stop_requested: fn() -> bool,
}

/// What happened to one service during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutcome {
    pub service: ServiceName,
    /// Classification produced by the acquirer.
    pub acquired: RepoState,
    /// Verdict after probing, as persisted.
    pub state: RepoState,
    pub revision: Option<Revision>,
    pub rendering: Option<Rendering>,
    pub probed: bool,
    /// Whether the verdict was written to the state store this pass.
    pub persisted: bool,
    /// `false` when shutdown was requested before the service was picked up.
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of a reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub project: String,
    pub started_at: String,
    pub duration_ms: u128,
    pub services: Vec<ServiceOutcome>,
    pub real: usize,
    pub mock: usize,
    pub manifest_path: PathBuf,
    /// The state store failed at least once; verdicts of this pass may not
    /// survive a restart.
    pub durability_lost: bool,
    pub interrupted: bool,
    /// Whether the manifest was handed to the compose driver.
    pub applied: bool,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub manifest: ComposeManifest,
}

impl ReconcileReport {
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.services.iter().find(|o| o.service == service)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: ServiceName,
    pub state: Option<RepoState>,
    pub revision: Option<Revision>,
    pub rendering: Rendering,
    pub container: ContainerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub engine: String,
    pub engine_available: bool,
    pub manifest_present: bool,
    pub datastore: ContainerState,
    pub services: Vec<ServiceStatus>,
    pub warnings: Vec<String>,
}

/// Per-service result of a worker, before rendering is known.
struct ServiceWork {
    outcome: ServiceOutcome,
    record: PersistentServiceState,
    save_error: Option<String>,
}

impl Engine {
    /// Engine with a file-backed state store under `workspace`.
    pub fn new(registry: Registry, workspace: impl Into<PathBuf>, backends: Backends) -> Self {
        let layout = WorkspaceLayout::new(workspace);
        let store = Box::new(FileStateStore::new(layout.clone()));
        Self::with_store(registry, layout, backends, store)
    }

    pub fn with_store(
        registry: Registry,
        layout: WorkspaceLayout,
        backends: Backends,
        store: Box<dyn StateStore>,
    ) -> Self {
        Self {
            registry,
            layout,
            vcs: backends.vcs,
            builder: backends.builder,
            compose: backends.compose,
            store,
            stop_requested: shutdown_requested,
        }
    }

    /// Replace the check workers consult before picking up the next service.
    /// Defaults to the process-wide Ctrl-C flag.
    #[must_use]
    pub fn with_stop_check(mut self, stop_requested: fn() -> bool) -> Self {
        self.stop_requested = stop_requested;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn lock_workspace(&self) -> Result<WorkspaceLock, CoreError> {
        WorkspaceLock::try_acquire(&self.layout.lock_file())?
            .ok_or_else(|| CoreError::WorkspaceLocked(self.layout.root().display().to_string()))
    }

    fn compose_timeout(&self) -> Duration {
        Duration::from_secs(self.registry.settings().build_timeout_secs)
    }

    /// Run one full pass: acquire, probe, persist, generate, write.
    ///
    /// Individual service failures never abort the pass; they degrade that
    /// service to a mock and show up in the report.
    pub fn reconcile(&self) -> Result<ReconcileReport, CoreError> {
        let started = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();
        validate_graph(self.registry.services(), self.registry.datastore())?;
        self.layout.initialize()?;
        let _lock = self.lock_workspace()?;

        info!(
            "reconciling {} service(s) for project '{}'",
            self.registry.services().len(),
            self.registry.project()
        );

        let mut warnings = Vec::new();
        let mut durability_lost = false;

        let prior = match self.store.load() {
            Ok(map) => map,
            Err(e) => {
                warn!("state store unavailable, continuing with empty state: {e}");
                warnings.push(format!("state store load failed: {e}"));
                durability_lost = true;
                StateMap::new()
            }
        };

        let specs: Vec<&ServiceSpec> = self
            .registry
            .startup_order()
            .iter()
            .filter_map(|name| self.registry.service(name))
            .collect();
        let slots = self.run_workers(&specs, &prior);

        let mut states = prior.clone();
        let mut outcomes = Vec::with_capacity(specs.len());
        let mut interrupted = false;
        for (spec, slot) in specs.iter().zip(slots) {
            match slot {
                Some(work) => {
                    if let Some(e) = &work.save_error {
                        warnings.push(format!("{}: state not persisted: {e}", spec.name));
                        durability_lost = true;
                    }
                    if let Some(detail) = &work.outcome.detail {
                        warnings.push(format!("{}: {detail}", spec.name));
                    }
                    states.insert(spec.name.clone(), work.record);
                    outcomes.push(work.outcome);
                }
                None => {
                    interrupted = true;
                    outcomes.push(Self::unprocessed(spec, prior.get(spec.name.as_str())));
                }
            }
        }
        if interrupted {
            warnings.push("shutdown requested; remaining services kept their previous state".to_owned());
        }

        let manifest = generate(&self.registry, &states)?;
        for outcome in &mut outcomes {
            outcome.rendering = manifest.rendering(&outcome.service).cloned();
        }
        let manifest_path = self.write_manifest(&manifest)?;

        let report = ReconcileReport {
            project: self.registry.project().to_owned(),
            started_at,
            duration_ms: started.elapsed().as_millis(),
            real: manifest.real_count(),
            mock: manifest.mock_count(),
            services: outcomes,
            manifest_path,
            durability_lost,
            interrupted,
            applied: false,
            warnings,
            manifest,
        };
        info!(
            "pass complete: {} real, {} mock",
            report.real, report.mock
        );
        Ok(report)
    }

    /// Reconcile, then hand the manifest to the compose driver.
    pub fn up(&self) -> Result<ReconcileReport, CoreError> {
        let mut report = self.reconcile()?;
        if report.interrupted {
            warn!("pass was interrupted; not starting the stack");
            return Ok(report);
        }
        info!("starting stack with {}", self.compose.name());
        self.compose
            .up(self.layout.root(), self.compose_timeout())?;
        report.applied = true;
        Ok(report)
    }

    pub fn down(&self) -> Result<(), CoreError> {
        info!("stopping stack with {}", self.compose.name());
        self.compose
            .down(self.layout.root(), self.compose_timeout())?;
        Ok(())
    }

    /// Regenerate and write the manifest from persisted state alone, without
    /// touching any checkout or running any build.
    pub fn generate_from_state(&self) -> Result<ComposeManifest, CoreError> {
        self.layout.initialize()?;
        let _lock = self.lock_workspace()?;
        let states = self.store.load()?;
        let manifest = generate(&self.registry, &states)?;
        self.write_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Remove persisted state for services no longer in the registry.
    /// Checkouts under `services/` are left alone.
    pub fn prune(&self) -> Result<Vec<ServiceName>, CoreError> {
        let _lock = self.lock_workspace()?;
        let states = self.store.load()?;
        let mut removed = Vec::new();
        for name in states.keys() {
            if self.registry.service(name).is_none() {
                self.store.remove(name)?;
                info!("pruned state for '{name}'");
                removed.push(name.clone());
            }
        }
        Ok(removed)
    }

    pub fn status(&self) -> Result<StatusReport, CoreError> {
        let mut warnings = Vec::new();
        let states = self.store.load().unwrap_or_else(|e| {
            warnings.push(format!("state store load failed: {e}"));
            StateMap::new()
        });

        let engine_available = self.compose.available();
        let containers = if engine_available && self.layout.compose_file().exists() {
            self.compose.ps(self.layout.root()).unwrap_or_else(|e| {
                warnings.push(format!("container status unavailable: {e}"));
                Vec::new()
            })
        } else {
            Vec::new()
        };
        let container_state = |name: &str| {
            containers
                .iter()
                .find(|c| c.service == name)
                .map_or(ContainerState::NotCreated, |c| c.state)
        };

        let services = self
            .registry
            .startup_order()
            .iter()
            .filter_map(|name| self.registry.service(name))
            .map(|spec| {
                let record = states.get(spec.name.as_str());
                ServiceStatus {
                    service: spec.name.clone(),
                    state: record.map(|r| r.last_verified_state),
                    revision: record.and_then(|r| r.last_checked_revision.clone()),
                    rendering: Rendering::for_service(spec, record),
                    container: container_state(&spec.name),
                    detail: record.and_then(|r| r.detail.clone()),
                    updated_at: record.map(|r| r.updated_at.clone()),
                }
            })
            .collect();

        Ok(StatusReport {
            project: self.registry.project().to_owned(),
            engine: self.compose.name().to_owned(),
            engine_available,
            manifest_present: self.layout.compose_file().exists(),
            datastore: container_state(&self.registry.datastore().name),
            services,
            warnings,
        })
    }

    fn write_manifest(&self, manifest: &ComposeManifest) -> Result<PathBuf, CoreError> {
        let yaml = manifest.to_yaml()?;
        let path = self.layout.compose_file();
        write_atomic(&path, yaml.as_bytes())?;
        write_atomic(
            &self.layout.failsafe_dockerfile(),
            FAILSAFE_DOCKERFILE.as_bytes(),
        )?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Process services on a bounded pool of scoped threads. Slot `i` holds
    /// the result for `specs[i]`, or `None` if it was never picked up.
    fn run_workers(
        &self,
        specs: &[&ServiceSpec],
        prior: &StateMap,
    ) -> Vec<Option<ServiceWork>> {
        let mut slots: Vec<Option<ServiceWork>> = specs.iter().map(|_| None).collect();
        if specs.is_empty() {
            return slots;
        }
        let workers = self.registry.settings().workers.clamp(1, specs.len());
        let next = AtomicUsize::new(0);
        let next = &next;
        debug!("processing {} service(s) on {workers} worker(s)", specs.len());

        let batches: Vec<Vec<(usize, ServiceWork)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            if (self.stop_requested)() {
                                break;
                            }
                            let i = next.fetch_add(1, Ordering::SeqCst);
                            let Some(spec) = specs.get(i) else {
                                break;
                            };
                            let mut work = self.process_service(spec, prior.get(spec.name.as_str()));
                            self.persist(&mut work);
                            done.push((i, work));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        warn!("a reconciliation worker panicked");
                        Vec::new()
                    })
                })
                .collect()
        });

        for (i, work) in batches.into_iter().flatten() {
            slots[i] = Some(work);
        }
        slots
    }

    /// Acquire and, when the revision changed, probe one service.
    fn process_service(
        &self,
        spec: &ServiceSpec,
        prior: Option<&PersistentServiceState>,
    ) -> ServiceWork {
        let settings = self.registry.settings();
        let acquired = Acquirer::new(
            self.vcs.as_ref(),
            &self.layout,
            Duration::from_secs(settings.clone_timeout_secs),
        )
        .acquire(spec);

        let mut probed = false;
        let mut detail = acquired.detail.clone();
        let (state, revision, image): (RepoState, Option<Revision>, Option<ImageRef>) =
            match (&acquired.state, &acquired.revision) {
                (RepoState::Cloned | RepoState::OutOfDate, Some(rev)) => {
                    match prior.filter(|p| !needs_probe(Some(*p), rev)) {
                        Some(p) => {
                            debug!(
                                "{}: revision {} unchanged, reusing {} verdict",
                                spec.name,
                                rev.short(),
                                p.last_verified_state
                            );
                            if detail.is_none() {
                                detail.clone_from(&p.detail);
                            }
                            (p.last_verified_state, Some(rev.clone()), p.image.clone())
                        }
                        None => {
                            probed = true;
                            let outcome = Prober::new(
                                self.builder.as_ref(),
                                Duration::from_secs(settings.build_timeout_secs),
                            )
                            .probe(spec, &acquired.checkout, rev);
                            match outcome {
                                ProbeOutcome::Built { image } => {
                                    (RepoState::Verified, Some(rev.clone()), Some(image))
                                }
                                ProbeOutcome::Failed { reason } => {
                                    detail = Some(match detail {
                                        Some(d) => format!("{d}; {reason}"),
                                        None => reason,
                                    });
                                    (RepoState::BuildFailed, Some(rev.clone()), None)
                                }
                            }
                        }
                    }
                }
                _ => (RepoState::Missing, None, None),
            };

        let (state, revision, image) = match validate_transition(&spec.name, acquired.state, state)
        {
            Ok(()) => (state, revision, image),
            Err(e) => {
                warn!("{e}");
                detail = Some(e.to_string());
                (RepoState::Missing, None, None)
            }
        };

        let mut record = PersistentServiceState::new(spec.name.clone(), state, revision, image);
        if let Some(d) = &detail {
            record = record.with_detail(d.clone());
        }
        let changed = prior.map_or(true, |p| !p.same_verdict(&record));
        if !changed {
            if let Some(p) = prior {
                record = p.clone();
            }
        }

        ServiceWork {
            outcome: ServiceOutcome {
                service: spec.name.clone(),
                acquired: acquired.state,
                state,
                revision: record.last_checked_revision.clone(),
                rendering: None,
                probed,
                persisted: changed,
                processed: true,
                detail,
            },
            record,
            save_error: None,
        }
    }

    /// Write a changed verdict. A failed write keeps the in-memory verdict
    /// for this pass and is reported instead of aborting.
    fn persist(&self, work: &mut ServiceWork) {
        if !work.outcome.persisted {
            return;
        }
        if let Err(e) = self.store.save(&work.record) {
            warn!("{}: failed to persist verdict: {e}", work.outcome.service);
            work.outcome.persisted = false;
            work.save_error = Some(e.to_string());
        }
    }

    fn unprocessed(spec: &ServiceSpec, prior: Option<&PersistentServiceState>) -> ServiceOutcome {
        ServiceOutcome {
            service: spec.name.clone(),
            acquired: prior.map_or(RepoState::Missing, |p| p.last_verified_state),
            state: prior.map_or(RepoState::Missing, |p| p.last_verified_state),
            revision: prior.and_then(|p| p.last_checked_revision.clone()),
            rendering: None,
            probed: false,
            persisted: false,
            processed: false,
            detail: Some("not processed: shutdown requested".to_owned()),
        }
    }
}
