//! Service registry parsing, identifiers, and graph validation for devstack.
//!
//! This crate defines the schema layer: TOML registry parsing (`RegistryV1`),
//! the validated, immutable [`Registry`] of [`ServiceSpec`]s, string newtypes
//! for service names, revisions and image references, and the structural
//! checks (`validate_graph`) that reject cyclic or dangling dependency graphs
//! with [`SpecError`] before any work is done.

pub mod graph;
pub mod registry;
pub mod service;
pub mod types;

pub use graph::{validate_graph, SpecError};
pub use registry::{
    load_registry, parse_registry_file, parse_registry_str, validate_service_name,
    DatastoreSection, ProjectSection, RegistryError, RegistryV1, ServiceSection, SettingsSection,
};
pub use service::{Datastore, Registry, ServiceSpec, Settings, FAILSAFE_IMAGE};
pub use types::{ImageRef, Revision, ServiceName};
