use crate::graph::{validate_graph, SpecError};
use crate::service::{Datastore, Registry, ServiceSpec, Settings, FAILSAFE_IMAGE};
use crate::types::{ImageRef, ServiceName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse registry: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported registry_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("project.name must not be empty")]
    EmptyProjectName,
    #[error("invalid service name '{0}': must match [a-z0-9][a-z0-9_-]{{0,62}}")]
    InvalidName(String),
    #[error("service '{0}' has an empty url")]
    EmptyUrl(String),
    #[error("service '{name}' has an invalid path '{path}': must be relative and stay inside the checkout")]
    InvalidPath { name: String, path: String },
    #[error("service '{name}' has an invalid branch '{branch}': must be non-empty, without whitespace, and not start with '-'")]
    InvalidBranch { name: String, branch: String },
    #[error("settings.{0} must be greater than zero")]
    ZeroSetting(&'static str),
    #[error("spec invalid: {0}")]
    Invalid(#[from] SpecError),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegistryV1 {
    pub registry_version: u32,
    pub project: ProjectSection,
    #[serde(default)]
    pub settings: SettingsSection,
    #[serde(default)]
    pub datastore: DatastoreSection,
    #[serde(default)]
    pub services: Vec<ServiceSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    pub name: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SettingsSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            clone_timeout_secs: default_clone_timeout(),
            build_timeout_secs: default_build_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatastoreSection {
    #[serde(default = "default_datastore_name")]
    pub name: String,
    #[serde(default = "default_datastore_image")]
    pub image: String,
    #[serde(default = "default_datastore_port")]
    pub port: u16,
    #[serde(default = "default_datastore_volume")]
    pub volume: String,
    #[serde(default = "default_datastore_mount")]
    pub mount: String,
    #[serde(default = "default_datastore_environment")]
    pub environment: BTreeMap<String, String>,
}

impl Default for DatastoreSection {
    fn default() -> Self {
        Self {
            name: default_datastore_name(),
            image: default_datastore_image(),
            port: default_datastore_port(),
            volume: default_datastore_volume(),
            mount: default_datastore_mount(),
            environment: default_datastore_environment(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    pub port: u16,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub mock_image: Option<String>,
}

fn default_network() -> String {
    "org-network".to_owned()
}

fn default_workers() -> usize {
    4
}

fn default_clone_timeout() -> u64 {
    300
}

fn default_build_timeout() -> u64 {
    900
}

fn default_datastore_name() -> String {
    "postgres".to_owned()
}

fn default_datastore_image() -> String {
    "postgres:15-alpine".to_owned()
}

fn default_datastore_port() -> u16 {
    5432
}

fn default_datastore_volume() -> String {
    "postgres_data".to_owned()
}

fn default_datastore_mount() -> String {
    "/var/lib/postgresql/data".to_owned()
}

/// Credentials the datastore image refuses to start without. Compose fills
/// the `${..}` references from `.env`.
fn default_datastore_environment() -> BTreeMap<String, String> {
    [
        ("POSTGRES_USER", "${POSTGRES_USER}"),
        ("POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}"),
        ("POSTGRES_DB", "my_org_db"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_context() -> String {
    ".".to_owned()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_owned()
}

pub fn validate_service_name(name: &str) -> Result<(), RegistryError> {
    let bytes = name.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 63
        && (bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_' || *b == b'-');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_owned()))
    }
}

fn validate_relative(name: &str, path: &str) -> Result<PathBuf, RegistryError> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || p.components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if path.is_empty() || escapes {
        return Err(RegistryError::InvalidPath {
            name: name.to_owned(),
            path: path.to_owned(),
        });
    }
    Ok(p.to_path_buf())
}

/// Branch names reach `git` as positional arguments, so anything that could
/// parse as an option is rejected.
fn validate_branch(name: &str, branch: &str) -> Result<(), RegistryError> {
    if branch.is_empty() || branch.starts_with('-') || branch.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidBranch {
            name: name.to_owned(),
            branch: branch.to_owned(),
        });
    }
    Ok(())
}

impl RegistryV1 {
    /// Check field-level constraints and the dependency graph, producing the
    /// immutable [`Registry`] the engine works from.
    pub fn into_registry(self) -> Result<Registry, RegistryError> {
        if self.registry_version != 1 {
            return Err(RegistryError::UnsupportedVersion(self.registry_version));
        }
        if self.project.name.trim().is_empty() {
            return Err(RegistryError::EmptyProjectName);
        }
        if self.settings.workers == 0 {
            return Err(RegistryError::ZeroSetting("workers"));
        }
        if self.settings.clone_timeout_secs == 0 {
            return Err(RegistryError::ZeroSetting("clone_timeout_secs"));
        }
        if self.settings.build_timeout_secs == 0 {
            return Err(RegistryError::ZeroSetting("build_timeout_secs"));
        }
        validate_service_name(&self.datastore.name)?;

        let mut services = Vec::with_capacity(self.services.len());
        for s in self.services {
            validate_service_name(&s.name)?;
            if s.url.trim().is_empty() {
                return Err(RegistryError::EmptyUrl(s.name));
            }
            validate_branch(&s.name, &s.branch)?;
            let context = validate_relative(&s.name, &s.context)?;
            let dockerfile = validate_relative(&s.name, &s.dockerfile)?;
            services.push(ServiceSpec {
                name: ServiceName::new(s.name),
                url: s.url.trim().to_owned(),
                branch: s.branch,
                context,
                dockerfile,
                port: s.port,
                depends_on: s.depends_on.into_iter().map(ServiceName::new).collect(),
                mock_image: ImageRef::new(s.mock_image.unwrap_or_else(|| FAILSAFE_IMAGE.to_owned())),
            });
        }

        // Declared keys override the defaults; omitted ones are filled in.
        let mut environment = default_datastore_environment();
        environment.extend(self.datastore.environment);

        let datastore = Datastore {
            name: ServiceName::new(self.datastore.name),
            image: ImageRef::new(self.datastore.image),
            port: self.datastore.port,
            volume: self.datastore.volume,
            mount: self.datastore.mount,
            environment,
        };

        let order = validate_graph(&services, &datastore)?;

        Ok(Registry::from_parts(
            self.project.name,
            self.project.network,
            self.project.env_file,
            Settings {
                workers: self.settings.workers,
                clone_timeout_secs: self.settings.clone_timeout_secs,
                build_timeout_secs: self.settings.build_timeout_secs,
            },
            datastore,
            services,
            order,
        ))
    }
}

pub fn parse_registry_str(input: &str) -> Result<RegistryV1, RegistryError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_registry_file(path: impl AsRef<Path>) -> Result<RegistryV1, RegistryError> {
    let content = fs::read_to_string(path)?;
    parse_registry_str(&content)
}

/// Parse and validate a registry file in one step.
pub fn load_registry(path: impl AsRef<Path>) -> Result<Registry, RegistryError> {
    parse_registry_file(path)?.into_registry()
}
