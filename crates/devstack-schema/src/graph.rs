//! Structural validation of the service dependency graph.
//!
//! Every check here is fatal: a registry that fails any of them must never
//! reach acquisition or manifest emission.

use crate::service::{Datastore, ServiceSpec};
use crate::types::ServiceName;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("duplicate service name '{0}'")]
    DuplicateService(ServiceName),
    #[error("service '{0}' clashes with the datastore name")]
    DatastoreClash(ServiceName),
    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        service: ServiceName,
        dependency: ServiceName,
    },
    #[error("service '{0}' depends on itself")]
    SelfDependency(ServiceName),
    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<ServiceName>),
    #[error("host port {port} is claimed by both '{first}' and '{second}'")]
    PortConflict {
        port: u16,
        first: ServiceName,
        second: ServiceName,
    },
}

fn format_cycle(path: &[ServiceName]) -> String {
    path.iter()
        .map(ServiceName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Validate names, edges, ports, and acyclicity. On success returns the
/// service names in startup order (dependencies first, ties broken by name).
pub fn validate_graph(
    services: &[ServiceSpec],
    datastore: &Datastore,
) -> Result<Vec<ServiceName>, SpecError> {
    let mut by_name: BTreeMap<&ServiceName, &ServiceSpec> = BTreeMap::new();
    for s in services {
        if s.name == datastore.name {
            return Err(SpecError::DatastoreClash(s.name.clone()));
        }
        if by_name.insert(&s.name, s).is_some() {
            return Err(SpecError::DuplicateService(s.name.clone()));
        }
    }

    let mut ports: BTreeMap<u16, &ServiceName> = BTreeMap::new();
    ports.insert(datastore.port, &datastore.name);
    for s in services {
        if let Some(first) = ports.insert(s.port, &s.name) {
            return Err(SpecError::PortConflict {
                port: s.port,
                first: first.clone(),
                second: s.name.clone(),
            });
        }
    }

    for s in services {
        for dep in &s.depends_on {
            if *dep == s.name {
                return Err(SpecError::SelfDependency(s.name.clone()));
            }
            if *dep != datastore.name && !by_name.contains_key(dep) {
                return Err(SpecError::UnknownDependency {
                    service: s.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(&by_name, &datastore.name) {
        return Err(SpecError::Cycle(cycle));
    }

    Ok(startup_order(&by_name, &datastore.name))
}

fn app_deps<'a>(
    spec: &'a ServiceSpec,
    datastore: &'a ServiceName,
) -> impl Iterator<Item = &'a ServiceName> + 'a {
    spec.depends_on.iter().filter(move |d| *d != datastore)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(
    by_name: &BTreeMap<&ServiceName, &ServiceSpec>,
    datastore: &ServiceName,
) -> Option<Vec<ServiceName>> {
    fn visit<'a>(
        name: &'a ServiceName,
        by_name: &BTreeMap<&'a ServiceName, &'a ServiceSpec>,
        datastore: &'a ServiceName,
        marks: &mut BTreeMap<&'a ServiceName, Mark>,
        stack: &mut Vec<&'a ServiceName>,
    ) -> Option<Vec<ServiceName>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<ServiceName> =
                    stack[start..].iter().map(|n| (*n).clone()).collect();
                cycle.push(name.clone());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        stack.push(name);
        if let Some(spec) = by_name.get(name).copied() {
            for dep in app_deps(spec, datastore) {
                if let Some(cycle) = visit(dep, by_name, datastore, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    for name in by_name.keys().copied() {
        if let Some(cycle) = visit(name, by_name, datastore, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn startup_order(
    by_name: &BTreeMap<&ServiceName, &ServiceSpec>,
    datastore: &ServiceName,
) -> Vec<ServiceName> {
    let mut remaining: BTreeMap<&ServiceName, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&ServiceName, Vec<&ServiceName>> = BTreeMap::new();
    for (name, spec) in by_name.iter().map(|(k, v)| (*k, *v)) {
        let deps: BTreeSet<&ServiceName> = app_deps(spec, datastore).collect();
        remaining.insert(name, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(name);
        }
    }

    let mut ready: BTreeSet<&ServiceName> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(by_name.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.clone());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }
    order
}
