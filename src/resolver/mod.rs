//! Dependency & binding resolver
//!
//! Turns the declared descriptors, grants and outputs of a stack into an
//! [`EmissionPlan`]: every reference checked, every coupling covered by an
//! access grant, and every descriptor placed after the descriptors it
//! depends on.
//!
//! Resolution is all-or-nothing. The first violation aborts it and no plan
//! is returned.

mod graph;

pub use graph::{CycleError, DependencyGraph};

use crate::emit::logical_id;
use crate::error::{Result, StackError};
use crate::resource::{get_kind, AccessGrant, Protocol, Reference, ResourceDescriptor};
use crate::stack::StackOutput;
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// Access grant with its port settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub source: String,
    pub target: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Added by the resolver rather than declared
    pub synthesized: bool,
}

impl ResolvedGrant {
    /// Engine identifier of the ingress rule implementing this grant,
    /// e.g. `DatabaseFromServiceTcp5432`
    pub fn logical_id(&self) -> String {
        let protocol = match self.protocol {
            Protocol::Tcp => "Tcp",
            Protocol::Udp => "Udp",
        };
        format!(
            "{}From{}{}{}",
            logical_id(&self.target),
            logical_id(&self.source),
            protocol,
            self.port
        )
    }

    /// Couplings are always satisfied over TCP
    fn covers(&self, source: &str, target: &str, port: u16) -> bool {
        self.source == source
            && self.target == target
            && self.port == port
            && self.protocol == Protocol::Tcp
    }
}

/// Non-fatal findings reported alongside a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// A coupling had no declared grant, so one was added
    ImplicitGrant {
        source: String,
        target: String,
        port: u16,
        property: String,
    },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImplicitGrant {
                source,
                target,
                port,
                property,
            } => write!(
                f,
                "added implicit grant {} -> {} on port {} (required by '{}')",
                source, target, port, property
            ),
        }
    }
}

/// Dependency-ordered descriptors ready for emission
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionPlan {
    pub stack_name: String,
    pub description: Option<String>,
    pub order: Vec<ResourceDescriptor>,
    /// Direct dependencies of each descriptor, in emission order
    pub dependencies: IndexMap<String, Vec<String>>,
    pub grants: Vec<ResolvedGrant>,
    pub outputs: IndexMap<String, StackOutput>,
    pub warnings: Vec<ResolveWarning>,
}

impl EmissionPlan {
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|d| d.name == name)
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Everything the resolver reads from a stack
pub struct ResolveInput<'a> {
    pub stack_name: &'a str,
    pub description: Option<&'a str>,
    pub descriptors: &'a IndexMap<String, ResourceDescriptor>,
    pub grants: &'a [AccessGrant],
    pub outputs: &'a IndexMap<String, StackOutput>,
}

/// Resolve a stack into an emission plan
pub fn resolve(input: ResolveInput<'_>) -> Result<EmissionPlan> {
    let descriptors = input.descriptors;
    tracing::info!(
        "Resolving stack '{}' ({} descriptors, {} declared grants)",
        input.stack_name,
        descriptors.len(),
        input.grants.len()
    );

    check_logical_ids(descriptors)?;

    for descriptor in descriptors.values() {
        for (path, reference) in descriptor.properties.references() {
            check_reference(&descriptor.name, &path, reference, descriptors)?;
        }
    }
    for (name, output) in input.outputs {
        for (path, reference) in output.value.references("value") {
            check_reference(name, &path, reference, descriptors)?;
        }
    }

    let mut grants = resolve_declared_grants(input.grants, descriptors)?;
    let warnings = cover_couplings(descriptors, &mut grants)?;
    check_ingress_ids(descriptors, &grants)?;

    let graph = build_graph(descriptors, &grants);
    let order = graph
        .topological_order()
        .map_err(|err| StackError::CyclicDependency { names: err.cycle })?;

    let position: IndexMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    let mut dependencies = IndexMap::new();
    for name in &order {
        let mut deps: Vec<String> = graph
            .dependencies(name)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort_by_key(|dep| position.get(dep.as_str()).copied().unwrap_or(usize::MAX));
        dependencies.insert(name.clone(), deps);
    }

    let order: Vec<ResourceDescriptor> = order
        .iter()
        .filter_map(|name| descriptors.get(name).cloned())
        .collect();

    tracing::info!(
        "Resolved stack '{}': {} descriptors, {} grants, {} warnings",
        input.stack_name,
        order.len(),
        grants.len(),
        warnings.len()
    );

    Ok(EmissionPlan {
        stack_name: input.stack_name.to_string(),
        description: input.description.map(String::from),
        order,
        dependencies,
        grants,
        outputs: input.outputs.clone(),
        warnings,
    })
}

/// Names that differ only by separators would collide in the manifest
fn check_logical_ids(descriptors: &IndexMap<String, ResourceDescriptor>) -> Result<()> {
    let mut seen: IndexMap<String, &str> = IndexMap::new();
    for name in descriptors.keys() {
        let id = logical_id(name);
        if let Some(existing) = seen.get(&id) {
            return Err(StackError::validation(
                &[*existing, name.as_str()],
                format!("both names map to engine identifier '{}'", id),
            ));
        }
        seen.insert(id, name);
    }
    Ok(())
}

fn check_reference(
    owner: &str,
    path: &str,
    reference: &Reference,
    descriptors: &IndexMap<String, ResourceDescriptor>,
) -> Result<()> {
    let Some(target) = descriptors.get(reference.target()) else {
        return Err(StackError::validation(
            &[owner],
            format!(
                "'{}' references undeclared resource '{}'",
                path,
                reference.target()
            ),
        ));
    };

    if target.kind != reference.kind() {
        return Err(StackError::validation(
            &[owner, target.name.as_str()],
            format!(
                "'{}' references '{}' as a {}, but it is a {}",
                path,
                target.name,
                reference.kind(),
                target.kind
            ),
        ));
    }

    if !target.exposes(reference.attribute()) {
        return Err(StackError::validation(
            &[owner, target.name.as_str()],
            format!(
                "'{}' references attribute '{}' which {} '{}' does not expose (available: {})",
                path,
                reference.attribute(),
                target.kind,
                target.name,
                target.outputs().join(", ")
            ),
        ));
    }

    tracing::debug!("{}: {} -> {}", owner, path, reference);
    Ok(())
}

fn service_port(target: &ResourceDescriptor) -> Option<u16> {
    get_kind(target.kind).and_then(|def| def.service_port(&target.properties))
}

fn resolve_declared_grants(
    declared: &[AccessGrant],
    descriptors: &IndexMap<String, ResourceDescriptor>,
) -> Result<Vec<ResolvedGrant>> {
    let mut grants: Vec<ResolvedGrant> = Vec::new();

    for grant in declared {
        let endpoints = [&grant.source, &grant.target];
        for endpoint in endpoints {
            let Some(descriptor) = descriptors.get(endpoint.as_str()) else {
                return Err(StackError::validation(
                    &[grant.source.as_str(), grant.target.as_str()],
                    format!("access grant names undeclared resource '{}'", endpoint),
                ));
            };
            let connectable = get_kind(descriptor.kind)
                .map(|def| def.connectable)
                .unwrap_or(false);
            if !connectable {
                return Err(StackError::validation(
                    &[grant.source.as_str(), grant.target.as_str()],
                    format!(
                        "{} '{}' cannot take part in access grants",
                        descriptor.kind, descriptor.name
                    ),
                ));
            }
        }

        if grant.source == grant.target {
            return Err(StackError::validation(
                &[grant.source.as_str()],
                "access grant from a resource to itself",
            ));
        }

        if grant.port == Some(0) {
            return Err(StackError::validation(
                &[grant.source.as_str(), grant.target.as_str()],
                "access grant on port 0",
            ));
        }

        let target = &descriptors[grant.target.as_str()];
        let Some(port) = grant.port.or_else(|| service_port(target)) else {
            return Err(StackError::validation(
                &[grant.source.as_str(), grant.target.as_str()],
                format!(
                    "{} '{}' has no service port; declare the grant with an explicit port",
                    target.kind, target.name
                ),
            ));
        };

        if grants.iter().any(|g| {
            g.source == grant.source
                && g.target == grant.target
                && g.port == port
                && g.protocol == grant.protocol
        }) {
            continue;
        }

        tracing::debug!(
            "Grant {} -> {} on {}/{}",
            grant.source,
            grant.target,
            grant.protocol,
            port
        );
        grants.push(ResolvedGrant {
            source: grant.source.clone(),
            target: grant.target.clone(),
            port,
            protocol: grant.protocol,
            synthesized: false,
        });
    }

    Ok(grants)
}

/// A grant some coupling property requires
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequiredGrant {
    source: String,
    target: String,
    port: u16,
    property: String,
}

/// Make sure every coupling (secrets from a cluster, volumes on a file
/// system) is covered by a TCP grant on the target's service port.
///
/// A declared grant on another port or protocol does not count. Uncovered
/// couplings get a synthesized grant and a warning; a coupling to a target
/// without a service port cannot be covered and fails the build.
fn cover_couplings(
    descriptors: &IndexMap<String, ResourceDescriptor>,
    grants: &mut Vec<ResolvedGrant>,
) -> Result<Vec<ResolveWarning>> {
    let mut required: IndexSet<RequiredGrant> = IndexSet::new();

    for descriptor in descriptors.values() {
        let Some(def) = get_kind(descriptor.kind) else {
            continue;
        };
        for coupling in &def.couplings {
            let Some(value) = descriptor.properties.get(&coupling.property) else {
                continue;
            };
            for (path, reference) in value.references(&coupling.property) {
                if reference.kind() != coupling.target_kind {
                    continue;
                }
                let target = &descriptors[reference.target()];
                let Some(port) = service_port(target) else {
                    return Err(StackError::validation(
                        &[descriptor.name.as_str(), target.name.as_str()],
                        format!(
                            "'{}' needs access to a resource without a service port, so no grant can cover it",
                            path
                        ),
                    ));
                };
                let already = required
                    .iter()
                    .any(|r| r.source == descriptor.name && r.target == target.name && r.port == port);
                if !already {
                    required.insert(RequiredGrant {
                        source: descriptor.name.clone(),
                        target: target.name.clone(),
                        port,
                        property: path,
                    });
                }
            }
        }
    }

    let mut warnings = Vec::new();
    for need in &required {
        if grants.iter().any(|g| g.covers(&need.source, &need.target, need.port)) {
            continue;
        }
        let warning = ResolveWarning::ImplicitGrant {
            source: need.source.clone(),
            target: need.target.clone(),
            port: need.port,
            property: need.property.clone(),
        };
        tracing::warn!("{}", warning);
        warnings.push(warning);
        grants.push(ResolvedGrant {
            source: need.source.clone(),
            target: need.target.clone(),
            port: need.port,
            protocol: Protocol::Tcp,
            synthesized: true,
        });
    }

    Ok(warnings)
}

/// Ingress rule identifiers must not collide with descriptors or with each
/// other, or one block would replace another in the manifest
fn check_ingress_ids(
    descriptors: &IndexMap<String, ResourceDescriptor>,
    grants: &[ResolvedGrant],
) -> Result<()> {
    let taken: IndexSet<String> = descriptors.keys().map(|n| logical_id(n)).collect();
    let mut seen: IndexMap<String, &ResolvedGrant> = IndexMap::new();
    for grant in grants {
        let id = grant.logical_id();
        if taken.contains(&id) {
            return Err(StackError::validation(
                &[grant.source.as_str(), grant.target.as_str()],
                format!(
                    "ingress rule identifier '{}' collides with a declared resource",
                    id
                ),
            ));
        }
        if let Some(other) = seen.get(&id) {
            return Err(StackError::validation(
                &[
                    other.source.as_str(),
                    other.target.as_str(),
                    grant.source.as_str(),
                    grant.target.as_str(),
                ],
                format!("two access grants map to ingress rule identifier '{}'", id),
            ));
        }
        seen.insert(id, grant);
    }
    Ok(())
}

fn build_graph(
    descriptors: &IndexMap<String, ResourceDescriptor>,
    grants: &[ResolvedGrant],
) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for descriptor in descriptors.values() {
        graph.add_node(&descriptor.name);
    }
    for descriptor in descriptors.values() {
        for (_, reference) in descriptor.properties.references() {
            graph.add_edge(&descriptor.name, reference.target());
        }
    }
    for grant in grants {
        graph.add_edge(&grant.source, &grant.target);
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Properties, ResourceKind};

    fn descriptor(name: &str, kind: ResourceKind, properties: Properties) -> ResourceDescriptor {
        ResourceDescriptor {
            name: name.to_string(),
            kind,
            properties,
        }
    }

    fn index(list: Vec<ResourceDescriptor>) -> IndexMap<String, ResourceDescriptor> {
        list.into_iter().map(|d| (d.name.clone(), d)).collect()
    }

    fn run(
        descriptors: &IndexMap<String, ResourceDescriptor>,
        grants: &[AccessGrant],
    ) -> Result<EmissionPlan> {
        let outputs = IndexMap::new();
        resolve(ResolveInput {
            stack_name: "test",
            description: None,
            descriptors,
            grants,
            outputs: &outputs,
        })
    }

    fn vpc_ref() -> Reference {
        Reference::new(ResourceKind::Network, "Vpc", "vpcId")
    }

    #[test]
    fn test_reference_to_missing_descriptor() {
        let descriptors = index(vec![descriptor(
            "Files",
            ResourceKind::FileSystem,
            Properties::new().with("network", vpc_ref()),
        )]);
        let err = run(&descriptors, &[]).unwrap_err();
        match err {
            StackError::Validation { names, cause } => {
                assert_eq!(names, vec!["Files"]);
                assert!(cause.contains("undeclared resource 'Vpc'"), "{}", cause);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reference_to_missing_attribute() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            descriptor(
                "Files",
                ResourceKind::FileSystem,
                Properties::new().with(
                    "network",
                    Reference::new(ResourceKind::Network, "Vpc", "subnetIds"),
                ),
            ),
        ]);
        let err = run(&descriptors, &[]).unwrap_err();
        assert!(matches!(err, StackError::Validation { .. }));
        assert!(err.to_string().contains("subnetIds"));
    }

    #[test]
    fn test_grant_to_unconnectable_kind() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            descriptor(
                "Files",
                ResourceKind::FileSystem,
                Properties::new().with("network", vpc_ref()),
            ),
        ]);
        let err = run(&descriptors, &[AccessGrant::new("Files", "Vpc")]).unwrap_err();
        assert!(err.to_string().contains("cannot take part"), "{}", err);
    }

    #[test]
    fn test_grant_edge_orders_target_first() {
        let fs_props = || Properties::new().with("network", vpc_ref());
        let descriptors = index(vec![
            descriptor("A", ResourceKind::FileSystem, fs_props()),
            descriptor("B", ResourceKind::FileSystem, fs_props()),
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
        ]);
        let plan = run(&descriptors, &[AccessGrant::new("A", "B")]).unwrap();
        assert_eq!(plan.names(), vec!["Vpc", "B", "A"]);
        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.grants[0].port, 2049);
        assert!(!plan.grants[0].synthesized);
        assert_eq!(plan.grants[0].logical_id(), "BFromATcp2049");
    }

    #[test]
    fn test_duplicate_declared_grants_collapse() {
        let fs_props = || Properties::new().with("network", vpc_ref());
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            descriptor("A", ResourceKind::FileSystem, fs_props()),
            descriptor("B", ResourceKind::FileSystem, fs_props()),
        ]);
        let grants = [AccessGrant::new("A", "B"), AccessGrant::new("A", "B").on_port(2049)];
        let plan = run(&descriptors, &grants).unwrap();
        assert_eq!(plan.grants.len(), 1);
    }

    #[test]
    fn test_logical_id_collision() {
        let descriptors = index(vec![
            descriptor("my-vpc", ResourceKind::Network, Properties::new()),
            descriptor("my_vpc", ResourceKind::Network, Properties::new()),
        ]);
        let err = run(&descriptors, &[]).unwrap_err();
        assert_eq!(err.offenders(), vec!["my-vpc", "my_vpc"]);
    }

    #[test]
    fn test_cycle_through_grants() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            descriptor(
                "A",
                ResourceKind::FileSystem,
                Properties::new().with("network", vpc_ref()),
            ),
            descriptor(
                "B",
                ResourceKind::FileSystem,
                Properties::new().with("network", vpc_ref()),
            ),
        ]);
        let grants = [AccessGrant::new("A", "B"), AccessGrant::new("B", "A")];
        let err = run(&descriptors, &grants).unwrap_err();
        assert_eq!(
            err,
            StackError::CyclicDependency {
                names: vec!["A".into(), "B".into()]
            }
        );
    }

    fn file_system(name: &str) -> ResourceDescriptor {
        descriptor(
            name,
            ResourceKind::FileSystem,
            Properties::new().with("network", vpc_ref()),
        )
    }

    fn mounting_service(name: &str, files: &str) -> ResourceDescriptor {
        let volume = Properties::new().with("name", "data").with(
            "fileSystemId",
            Reference::new(ResourceKind::FileSystem, files, "fileSystemId"),
        );
        descriptor(
            name,
            ResourceKind::ComputeService,
            Properties::new()
                .with("network", vpc_ref())
                .with("volumes", vec![volume]),
        )
    }

    #[test]
    fn test_tcp_and_udp_grants_get_distinct_ids() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("A"),
            file_system("B"),
        ]);
        let udp = AccessGrant::new("A", "B")
            .on_port(2049)
            .with_protocol(Protocol::Udp);
        let plan = run(&descriptors, &[AccessGrant::new("A", "B"), udp]).unwrap();
        let ids: Vec<String> = plan.grants.iter().map(ResolvedGrant::logical_id).collect();
        assert_eq!(ids, vec!["BFromATcp2049", "BFromAUdp2049"]);
    }

    #[test]
    fn test_ambiguous_ingress_ids_rejected() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("X"),
            file_system("YFromZ"),
            file_system("Z"),
            file_system("XFromY"),
        ]);
        let grants = [
            AccessGrant::new("YFromZ", "X").on_port(1),
            AccessGrant::new("Z", "XFromY").on_port(1),
        ];
        let err = run(&descriptors, &grants).unwrap_err();
        assert!(matches!(err, StackError::Validation { .. }));
        assert!(err.to_string().contains("XFromYFromZTcp1"), "{}", err);
        assert_eq!(err.offenders(), vec!["YFromZ", "X", "Z", "XFromY"]);
    }

    #[test]
    fn test_grant_on_other_port_does_not_cover_coupling() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("Files"),
            mounting_service("Web", "Files"),
        ]);
        let plan = run(&descriptors, &[AccessGrant::new("Web", "Files").on_port(3000)]).unwrap();

        let ports: Vec<(u16, bool)> = plan.grants.iter().map(|g| (g.port, g.synthesized)).collect();
        assert_eq!(ports, vec![(3000, false), (2049, true)]);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_udp_grant_does_not_cover_coupling() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("Files"),
            mounting_service("Web", "Files"),
        ]);
        let udp = AccessGrant::new("Web", "Files").with_protocol(Protocol::Udp);
        let plan = run(&descriptors, &[udp]).unwrap();
        assert_eq!(plan.grants.len(), 2);
        assert_eq!(plan.grants[1].protocol, Protocol::Tcp);
        assert!(plan.grants[1].synthesized);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_declared_tcp_grant_covers_coupling() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("Files"),
            mounting_service("Web", "Files"),
        ]);
        let plan = run(&descriptors, &[AccessGrant::new("Web", "Files")]).unwrap();
        assert_eq!(plan.grants.len(), 1);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_grant_on_port_zero_rejected() {
        let descriptors = index(vec![
            descriptor("Vpc", ResourceKind::Network, Properties::new()),
            file_system("A"),
            file_system("B"),
        ]);
        let err = run(&descriptors, &[AccessGrant::new("A", "B").on_port(0)]).unwrap_err();
        assert!(err.to_string().contains("port 0"), "{}", err);
    }

    #[test]
    fn test_output_reference_checked() {
        let descriptors = index(vec![descriptor("Vpc", ResourceKind::Network, Properties::new())]);
        let mut outputs = IndexMap::new();
        outputs.insert(
            "VpcId".to_string(),
            StackOutput {
                value: Reference::new(ResourceKind::Network, "Gone", "vpcId").into(),
                description: None,
            },
        );
        let err = resolve(ResolveInput {
            stack_name: "test",
            description: None,
            descriptors: &descriptors,
            grants: &[],
            outputs: &outputs,
        })
        .unwrap_err();
        assert_eq!(err.offenders(), vec!["VpcId"]);
    }
}
