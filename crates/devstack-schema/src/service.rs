use crate::types::{ImageRef, ServiceName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Image used as the stand-in for any service that declares no `mock_image`.
pub const FAILSAFE_IMAGE: &str = "devstack/failsafe:latest";

/// One provisionable service, as declared in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub url: String,
    pub branch: String,
    /// Build context, relative to the service checkout.
    pub context: PathBuf,
    /// Build file, relative to the build context.
    pub dockerfile: PathBuf,
    pub port: u16,
    pub depends_on: Vec<ServiceName>,
    pub mock_image: ImageRef,
}

impl ServiceSpec {
    /// Whether the stand-in is the built-in failsafe image, which devstack
    /// builds itself from the generated failsafe Dockerfile.
    pub fn uses_failsafe_image(&self) -> bool {
        self.mock_image == FAILSAFE_IMAGE
    }
}

/// The global stateful datastore. Always rendered, never mocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Datastore {
    pub name: ServiceName,
    pub image: ImageRef,
    pub port: u16,
    pub volume: String,
    pub mount: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub workers: usize,
    pub clone_timeout_secs: u64,
    pub build_timeout_secs: u64,
}

/// Validated service registry.
///
/// Construction goes through [`RegistryV1::into_registry`](crate::RegistryV1::into_registry),
/// so holding a `Registry` means names are unique, every dependency resolves,
/// and the dependency graph is acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registry {
    project: String,
    network: String,
    env_file: Option<String>,
    settings: Settings,
    datastore: Datastore,
    services: Vec<ServiceSpec>,
    startup_order: Vec<ServiceName>,
}

impl Registry {
    pub(crate) fn from_parts(
        project: String,
        network: String,
        env_file: Option<String>,
        settings: Settings,
        datastore: Datastore,
        services: Vec<ServiceSpec>,
        startup_order: Vec<ServiceName>,
    ) -> Self {
        Self {
            project,
            network,
            env_file,
            settings,
            datastore,
            services,
            startup_order,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn env_file(&self) -> Option<&str> {
        self.env_file.as_deref()
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    /// Services in declaration order.
    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Service names in dependency order: every service appears after all of
    /// its dependencies; ties are broken by name.
    pub fn startup_order(&self) -> &[ServiceName] {
        &self.startup_order
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}
