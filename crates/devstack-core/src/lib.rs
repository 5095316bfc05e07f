//! Reconciliation engine for devstack.
//!
//! This crate ties the registry, the state store, and the runtime backends
//! together into the [`Engine`]: one reconciliation pass acquires every
//! service's source tree, probes whether it builds, persists the verdict, and
//! regenerates the compose manifest so that verified services run for real and
//! everything else runs as a failsafe mock. It also provides the repo-state
//! transition rules and the workspace lock and shutdown flag.

pub mod acquirer;
pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod manifest;
pub mod prober;

pub use acquirer::{AcquireOutcome, Acquirer};
pub use concurrency::{install_signal_handler, shutdown_requested, WorkspaceLock};
pub use engine::{Engine, ReconcileReport, ServiceOutcome, ServiceStatus, StatusReport};
pub use lifecycle::validate_transition;
pub use manifest::{generate, ComposeManifest, Rendering};
pub use prober::{image_tag, needs_probe, ProbeOutcome, Prober};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("registry error: {0}")]
    Registry(#[from] devstack_schema::RegistryError),
    #[error("invalid service graph: {0}")]
    SpecInvalid(#[from] devstack_schema::SpecError),
    #[error("store error: {0}")]
    Store(#[from] devstack_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] devstack_runtime::RuntimeError),
    #[error("invalid state transition for '{service}': {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: String,
        to: String,
    },
    #[error("workspace {0} is locked by another devstack process")]
    WorkspaceLocked(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
