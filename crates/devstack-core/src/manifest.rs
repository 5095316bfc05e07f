//! Compose manifest generation.
//!
//! [`generate`] is a pure function of the registry and the persisted state
//! map: it never touches the filesystem, and identical inputs always serialize
//! to byte-identical YAML.

use devstack_schema::{validate_graph, ImageRef, Registry, ServiceName, ServiceSpec, SpecError};
use devstack_store::{PersistentServiceState, StateMap};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Directory, relative to the workspace, holding the failsafe build file.
pub const FAILSAFE_CONTEXT: &str = "./_failsafe";

const HEADER: &str = "# Generated by devstack. Manual edits are overwritten on the next pass.\n";

pub const LABEL_RENDERING: &str = "devstack.rendering";
pub const LABEL_REVISION: &str = "devstack.revision";

/// How a service is rendered into the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "image", rename_all = "kebab-case")]
pub enum Rendering {
    /// The image built from the service's own source.
    Real(ImageRef),
    /// A stand-in that keeps the service's slot in the stack.
    Mock(ImageRef),
}

impl Rendering {
    /// Pick the rendering for `spec`: real only when the persisted verdict is
    /// `Verified` with both a revision and a built image on record.
    pub fn for_service(spec: &ServiceSpec, state: Option<&PersistentServiceState>) -> Self {
        match state {
            Some(s) if s.is_verified() => match &s.image {
                Some(image) => Rendering::Real(image.clone()),
                None => Rendering::Mock(spec.mock_image.clone()),
            },
            _ => Rendering::Mock(spec.mock_image.clone()),
        }
    }

    pub fn image(&self) -> &ImageRef {
        match self {
            Rendering::Real(image) | Rendering::Mock(image) => image,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Rendering::Real(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rendering::Real(_) => "real",
            Rendering::Mock(_) => "mock",
        }
    }
}

impl std::fmt::Display for Rendering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.image())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSection {
    pub context: String,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkDef {
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeDef {}

/// One entry under `services:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeService {
    #[serde(skip)]
    pub name: ServiceName,
    /// `None` for the datastore, which is never rendered as a mock.
    #[serde(skip)]
    pub rendering: Option<Rendering>,
    pub image: ImageRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ServiceName>,
    pub networks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub restart: String,
}

/// Complete compose document, services in startup order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeManifest {
    pub name: String,
    #[serde(serialize_with = "serialize_services")]
    pub services: Vec<ComposeService>,
    pub networks: BTreeMap<String, NetworkDef>,
    pub volumes: BTreeMap<String, VolumeDef>,
}

fn serialize_services<S: Serializer>(
    services: &[ComposeService],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(services.len()))?;
    for service in services {
        map.serialize_entry(service.name.as_str(), service)?;
    }
    map.end()
}

impl ComposeManifest {
    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn rendering(&self, name: &str) -> Option<&Rendering> {
        self.service(name).and_then(|s| s.rendering.as_ref())
    }

    /// Application entries, excluding the datastore.
    pub fn app_services(&self) -> impl Iterator<Item = &ComposeService> {
        self.services.iter().filter(|s| s.rendering.is_some())
    }

    pub fn real_count(&self) -> usize {
        self.app_services()
            .filter(|s| s.rendering.as_ref().is_some_and(Rendering::is_real))
            .count()
    }

    pub fn mock_count(&self) -> usize {
        self.app_services().count() - self.real_count()
    }

    /// Whether any entry builds the failsafe image from [`FAILSAFE_CONTEXT`].
    pub fn needs_failsafe_build(&self) -> bool {
        self.services.iter().any(|s| s.build.is_some())
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{HEADER}{body}"))
    }
}

fn app_entry(
    registry: &Registry,
    spec: &ServiceSpec,
    state: Option<&PersistentServiceState>,
) -> ComposeService {
    let rendering = Rendering::for_service(spec, state);
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_RENDERING.to_owned(), rendering.label().to_owned());

    let mut environment = BTreeMap::new();
    let mut build = None;
    let mut ports = Vec::new();
    match &rendering {
        Rendering::Real(_) => {
            if let Some(rev) = state.and_then(|s| s.last_checked_revision.as_ref()) {
                labels.insert(LABEL_REVISION.to_owned(), rev.to_string());
            }
            ports.push(format!("{0}:{0}", spec.port));
        }
        Rendering::Mock(_) => {
            environment.insert("SERVICE_NAME".to_owned(), spec.name.to_string());
            if spec.uses_failsafe_image() {
                let mut args = BTreeMap::new();
                args.insert("SERVICE_NAME".to_owned(), spec.name.to_string());
                build = Some(BuildSection {
                    context: FAILSAFE_CONTEXT.to_owned(),
                    args,
                });
            }
        }
    }

    ComposeService {
        name: spec.name.clone(),
        image: rendering.image().clone(),
        rendering: Some(rendering),
        build,
        ports,
        env_file: registry.env_file().map(str::to_owned),
        environment,
        depends_on: spec.depends_on.clone(),
        networks: vec![registry.network().to_owned()],
        volumes: Vec::new(),
        labels,
        restart: "unless-stopped".to_owned(),
    }
}

fn datastore_entry(registry: &Registry) -> ComposeService {
    let ds = registry.datastore();
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_RENDERING.to_owned(), "datastore".to_owned());
    ComposeService {
        name: ds.name.clone(),
        rendering: None,
        image: ds.image.clone(),
        build: None,
        ports: vec![format!("{0}:{0}", ds.port)],
        env_file: None,
        environment: ds.environment.clone(),
        depends_on: Vec::new(),
        networks: vec![registry.network().to_owned()],
        volumes: vec![format!("{}:{}", ds.volume, ds.mount)],
        labels,
        restart: "unless-stopped".to_owned(),
    }
}

/// Build the manifest for `registry` given the persisted verdicts in `states`.
///
/// The dependency graph is re-checked first, so no manifest is ever produced
/// for a cyclic or dangling graph. Services without a record render as mocks.
pub fn generate(registry: &Registry, states: &StateMap) -> Result<ComposeManifest, SpecError> {
    let order = validate_graph(registry.services(), registry.datastore())?;

    let mut services = Vec::with_capacity(order.len() + 1);
    services.push(datastore_entry(registry));
    for name in &order {
        if let Some(spec) = registry.service(name) {
            services.push(app_entry(registry, spec, states.get(name.as_str())));
        }
    }

    let ds = registry.datastore();
    let mut networks = BTreeMap::new();
    networks.insert(
        registry.network().to_owned(),
        NetworkDef {
            driver: "bridge".to_owned(),
        },
    );
    let mut volumes = BTreeMap::new();
    volumes.insert(ds.volume.clone(), VolumeDef::default());

    Ok(ComposeManifest {
        name: registry.project().to_owned(),
        services,
        networks,
        volumes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstack_schema::{parse_registry_str, Revision};
    use devstack_store::RepoState;

    const REGISTRY: &str = r#"
registry_version = 1

[project]
name = "prod"
env_file = ".env"

[datastore.environment]
POSTGRES_DB = "my_org_db"
POSTGRES_USER = "${POSTGRES_USER}"

[[services]]
name = "ui"
url = "https://example.com/ui.git"
port = 3000
depends_on = ["api"]

[[services]]
name = "api"
url = "https://example.com/api.git"
port = 8080
depends_on = ["postgres", "ingestor"]

[[services]]
name = "ingestor"
url = "https://example.com/ingestor.git"
port = 8081
depends_on = ["postgres"]
mock_image = "wiremock/wiremock:3.3.1"
"#;

    fn registry() -> Registry {
        parse_registry_str(REGISTRY)
            .unwrap()
            .into_registry()
            .unwrap()
    }

    fn verified(name: &str, rev: &str) -> PersistentServiceState {
        let revision = Revision::new(rev);
        PersistentServiceState::new(
            name.into(),
            RepoState::Verified,
            Some(revision.clone()),
            Some(crate::prober::image_tag(name, &revision)),
        )
    }

    fn states(records: Vec<PersistentServiceState>) -> StateMap {
        records
            .into_iter()
            .map(|s| (s.service.clone(), s))
            .collect()
    }

    #[test]
    fn one_entry_per_service_plus_datastore() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        assert_eq!(m.services.len(), 4);
        assert_eq!(m.app_services().count(), 3);
        assert_eq!(m.mock_count(), 3);
        assert!(m.service("postgres").unwrap().rendering.is_none());
    }

    #[test]
    fn entries_follow_startup_order() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        let names: Vec<&str> = m.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["postgres", "ingestor", "api", "ui"]);
    }

    #[test]
    fn verified_service_renders_real() {
        let m = generate(&registry(), &states(vec![verified("api", "abcdef0123456789")])).unwrap();
        assert_eq!(
            m.rendering("api"),
            Some(&Rendering::Real(ImageRef::new("devstack/api:abcdef012345")))
        );
        let api = m.service("api").unwrap();
        assert_eq!(api.labels[LABEL_REVISION], "abcdef0123456789");
        assert_eq!(api.ports, vec!["8080:8080"]);
        assert!(api.build.is_none());
        assert_eq!(m.real_count(), 1);
    }

    #[test]
    fn non_verified_states_render_mock() {
        for kind in [
            RepoState::Missing,
            RepoState::Cloned,
            RepoState::OutOfDate,
            RepoState::BuildFailed,
        ] {
            let record = PersistentServiceState::new(
                "api".into(),
                kind,
                Some(Revision::new("abc")),
                Some(ImageRef::new("devstack/api:abc")),
            );
            let m = generate(&registry(), &states(vec![record])).unwrap();
            assert!(!m.rendering("api").unwrap().is_real(), "{kind} must mock");
        }
    }

    #[test]
    fn failsafe_mock_carries_build_section() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        let ui = m.service("ui").unwrap();
        assert_eq!(ui.image.as_str(), devstack_schema::FAILSAFE_IMAGE);
        let build = ui.build.as_ref().unwrap();
        assert_eq!(build.context, FAILSAFE_CONTEXT);
        assert_eq!(build.args["SERVICE_NAME"], "ui");
        assert_eq!(ui.environment["SERVICE_NAME"], "ui");
        assert!(m.needs_failsafe_build());
    }

    #[test]
    fn mocks_publish_no_host_ports_but_keep_wiring() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        for svc in m.app_services() {
            assert!(svc.ports.is_empty(), "{} publishes {:?}", svc.name, svc.ports);
            assert_eq!(svc.networks, vec!["org-network"]);
        }
        assert_eq!(m.service("api").unwrap().depends_on.len(), 2);
    }

    #[test]
    fn custom_mock_image_is_used_as_is() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        let ingestor = m.service("ingestor").unwrap();
        assert_eq!(ingestor.image.as_str(), "wiremock/wiremock:3.3.1");
        assert!(ingestor.build.is_none());
    }

    #[test]
    fn dependents_of_mocks_keep_their_edges() {
        let m = generate(&registry(), &states(vec![verified("ui", "111111111111")])).unwrap();
        let ui = m.service("ui").unwrap();
        assert!(ui.rendering.as_ref().unwrap().is_real());
        assert_eq!(ui.depends_on, vec![ServiceName::new("api")]);
        assert!(!m.rendering("api").unwrap().is_real());
        assert!(m.service("api").is_some());
    }

    #[test]
    fn datastore_is_never_mocked() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        let pg = m.service("postgres").unwrap();
        assert_eq!(pg.image.as_str(), "postgres:15-alpine");
        assert_eq!(pg.ports, vec!["5432:5432"]);
        assert_eq!(pg.volumes, vec!["postgres_data:/var/lib/postgresql/data"]);
        assert_eq!(pg.environment["POSTGRES_USER"], "${POSTGRES_USER}");
        assert!(pg.env_file.is_none());
        assert!(m.volumes.contains_key("postgres_data"));
    }

    #[test]
    fn default_datastore_has_credentials() {
        let registry = parse_registry_str(
            "registry_version = 1\n[project]\nname = \"dev\"\n",
        )
        .unwrap()
        .into_registry()
        .unwrap();
        let m = generate(&registry, &StateMap::new()).unwrap();
        let pg = m.service("postgres").unwrap();
        assert_eq!(pg.environment["POSTGRES_USER"], "${POSTGRES_USER}");
        assert_eq!(pg.environment["POSTGRES_PASSWORD"], "${POSTGRES_PASSWORD}");
        assert_eq!(pg.environment["POSTGRES_DB"], "my_org_db");

        let yaml = m.to_yaml().unwrap();
        assert!(yaml.contains("POSTGRES_PASSWORD:"), "{yaml}");
    }

    #[test]
    fn network_and_env_file_attached() {
        let m = generate(&registry(), &StateMap::new()).unwrap();
        for s in &m.services {
            assert_eq!(s.networks, vec!["org-network"]);
        }
        for s in m.app_services() {
            assert_eq!(s.env_file.as_deref(), Some(".env"));
        }
        assert_eq!(m.networks["org-network"].driver, "bridge");
    }

    #[test]
    fn yaml_is_byte_identical_for_identical_inputs() {
        let reg = registry();
        let st = states(vec![verified("api", "abc"), verified("ui", "def")]);
        let a = generate(&reg, &st).unwrap().to_yaml().unwrap();
        let b = generate(&reg, &st).unwrap().to_yaml().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn yaml_parses_as_compose_document() {
        let yaml = generate(&registry(), &states(vec![verified("api", "abc")]))
            .unwrap()
            .to_yaml()
            .unwrap();
        assert!(yaml.starts_with("# Generated by devstack"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["name"].as_str(), Some("prod"));
        let services = doc["services"].as_mapping().unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(
            doc["services"]["api"]["image"].as_str(),
            Some("devstack/api:abc")
        );
        assert_eq!(
            doc["services"]["api"]["labels"][LABEL_RENDERING].as_str(),
            Some("real")
        );
        assert_eq!(
            doc["services"]["ui"]["depends_on"][0].as_str(),
            Some("api")
        );
        let keys: Vec<&str> = services.keys().filter_map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["postgres", "ingestor", "api", "ui"]);
    }

    #[test]
    fn records_for_unknown_services_are_ignored() {
        let m = generate(&registry(), &states(vec![verified("retired", "abc")])).unwrap();
        assert!(m.service("retired").is_none());
        assert_eq!(m.services.len(), 4);
    }
}
