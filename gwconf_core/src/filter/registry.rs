//! Ordering of entity filters.
//!
//! Filters read what earlier filters kept, so running them out of order
//! doesn't fail, it just keeps too little. The registry turns the declared
//! filter dependencies into a graph and fixes the run order once, up front.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap, Direction};

use super::{
    DependencyFilter, EntityFilter, FolderFilter, ListenPortFilter, PolicyBackedFilter,
    PolicyFilter, ScheduledTaskFilter, ServiceFilter,
};
use crate::{
    bundle::{
        CassandraConnection, ClusterProperty, Encass, EntityType, GenericEntity,
        IdentityProvider, JdbcConnection, PolicyBackedService, PrivateKey, StoredPassword,
        TrustedCert,
    },
    error::RegistryError,
};

/// Filters sorted so that each one runs after everything it depends on.
pub struct EntityFilterRegistry {
    filters: Vec<Box<dyn EntityFilter>>,
}

impl EntityFilterRegistry {
    /// Validate and sort a set of filters.
    ///
    /// The order only depends on the declared dependencies. Between filters
    /// that don't constrain each other, `EntityType` order decides.
    pub fn new(filters: Vec<Box<dyn EntityFilter>>) -> Result<Self> {
        let mut by_type: BTreeMap<EntityType, Box<dyn EntityFilter>> = BTreeMap::new();
        for f in filters {
            let entity_type = f.entity_type();
            if by_type.insert(entity_type, f).is_some() {
                return Err(RegistryError::DuplicateFilter(entity_type).into());
            }
        }

        let mut graph = DiGraphMap::<EntityType, ()>::new();
        for entity_type in by_type.keys() {
            graph.add_node(*entity_type);
        }
        for (entity_type, f) in &by_type {
            for dependency in f.dependencies() {
                if !by_type.contains_key(&dependency) {
                    return Err(RegistryError::MissingDependency {
                        filter: *entity_type,
                        dependency,
                    }
                    .into());
                }
                graph.add_edge(dependency, *entity_type, ());
            }
        }

        let order = sort(&graph)?;
        let filters = order
            .into_iter()
            .filter_map(|t| by_type.remove(&t))
            .collect();
        Ok(Self { filters })
    }

    /// A registry of [`default_filters`].
    pub fn with_default_filters() -> Result<Self> {
        Self::new(default_filters())
    }

    /// Filters in run order
    pub fn filters(&self) -> impl Iterator<Item = &dyn EntityFilter> {
        self.filters.iter().map(|f| f.as_ref())
    }

    /// Entity types in run order
    pub fn order(&self) -> Vec<EntityType> {
        self.filters.iter().map(|f| f.entity_type()).collect()
    }
}

/// Every filter this tool ships with, one per entity type.
pub fn default_filters() -> Vec<Box<dyn EntityFilter>> {
    let from_policies = [EntityType::Policy, EntityType::Service];
    vec![
        Box::new(FolderFilter),
        Box::new(PolicyFilter),
        Box::new(ServiceFilter),
        Box::new(PolicyBackedFilter::<Encass>::new(|b| &b.encasses)),
        Box::new(PolicyBackedFilter::<PolicyBackedService>::new(|b| {
            &b.policy_backed_services
        })),
        Box::new(DependencyFilter::<ClusterProperty>::new(
            &from_policies,
            |b| &b.cluster_properties,
        )),
        Box::new(DependencyFilter::<JdbcConnection>::new(
            &from_policies,
            |b| &b.jdbc_connections,
        )),
        Box::new(DependencyFilter::<CassandraConnection>::new(
            &from_policies,
            |b| &b.cassandra_connections,
        )),
        Box::new(DependencyFilter::<IdentityProvider>::new(
            &from_policies,
            |b| &b.identity_providers,
        )),
        Box::new(DependencyFilter::<GenericEntity>::new(
            &from_policies,
            |b| &b.generic_entities,
        )),
        Box::new(DependencyFilter::<TrustedCert>::new(
            &[
                EntityType::Policy,
                EntityType::Service,
                EntityType::IdentityProvider,
            ],
            |b| &b.trusted_certs,
        )),
        Box::new(DependencyFilter::<StoredPassword>::new(
            &[
                EntityType::Policy,
                EntityType::Service,
                EntityType::JdbcConnection,
                EntityType::CassandraConnection,
                EntityType::IdentityProvider,
            ],
            |b| &b.stored_passwords,
        )),
        Box::new(ListenPortFilter),
        Box::new(DependencyFilter::<PrivateKey>::new(
            &[
                EntityType::Policy,
                EntityType::Service,
                EntityType::ListenPort,
            ],
            |b| &b.private_keys,
        )),
        Box::new(ScheduledTaskFilter),
    ]
}

/// Kahn's algorithm, always taking the smallest ready type next.
fn sort(graph: &DiGraphMap<EntityType, ()>) -> Result<Vec<EntityType>> {
    let mut in_degree: BTreeMap<EntityType, usize> = graph
        .nodes()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();
    let mut ready: BTreeSet<EntityType> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut res = Vec::with_capacity(in_degree.len());
    while let Some(next) = ready.pop_first() {
        res.push(next);
        for dependent in graph.neighbors_directed(next, Direction::Outgoing) {
            if let Some(d) = in_degree.get_mut(&dependent) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if res.len() < in_degree.len() {
        let mut members: Vec<EntityType> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .collect();
        members.sort();
        return Err(RegistryError::Cycle { members }.into());
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bundle::{Bundle, BundleEntity};
    use crate::filter::FilterConfiguration;

    /// A filter that only declares an ordering.
    struct Stub(EntityType, Vec<EntityType>);

    impl EntityFilter for Stub {
        fn entity_type(&self) -> EntityType {
            self.0
        }

        fn dependencies(&self) -> Vec<EntityType> {
            self.1.clone()
        }

        fn filter(
            &self,
            _folder_path: &str,
            _config: &FilterConfiguration,
            _source: &Bundle,
            _filtered: &Bundle,
        ) -> Result<Vec<BundleEntity>> {
            Ok(vec![])
        }
    }

    fn position(order: &[EntityType], t: EntityType) -> usize {
        order.iter().position(|o| *o == t).unwrap()
    }

    #[test]
    fn default_filters_respect_dependencies() -> Result<()> {
        let registry = EntityFilterRegistry::with_default_filters()?;
        let order = registry.order();
        assert_eq!(order.len(), EntityType::ALL.len());
        assert_eq!(order[0], EntityType::Folder);
        for f in registry.filters() {
            for dependency in f.dependencies() {
                assert!(
                    position(&order, dependency) < position(&order, f.entity_type()),
                    "{dependency} should run before {}",
                    f.entity_type()
                );
            }
        }
        Ok(())
    }

    #[test]
    fn duplicate_filters_are_rejected() {
        let err = EntityFilterRegistry::new(vec![
            Box::new(Stub(EntityType::Folder, vec![])),
            Box::new(Stub(EntityType::Folder, vec![])),
        ])
        .err()
        .unwrap();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::DuplicateFilter(EntityType::Folder))
        );
    }

    #[test]
    fn missing_dependencies_are_rejected() {
        let err = EntityFilterRegistry::new(vec![Box::new(Stub(
            EntityType::Policy,
            vec![EntityType::Folder],
        ))])
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::MissingDependency { .. })
        ));
    }

    #[test]
    fn cycles_are_rejected_with_their_members() {
        let err = EntityFilterRegistry::new(vec![
            Box::new(Stub(EntityType::Folder, vec![])),
            Box::new(Stub(EntityType::Policy, vec![EntityType::Encass])),
            Box::new(Stub(EntityType::Encass, vec![EntityType::Policy])),
            Box::new(Stub(EntityType::Service, vec![EntityType::Folder])),
        ])
        .err()
        .unwrap();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::Cycle {
                members: vec![EntityType::Policy, EntityType::Encass]
            })
        );
    }

    fn stubs() -> Vec<(EntityType, Vec<EntityType>)> {
        use EntityType::*;
        vec![
            (Folder, vec![]),
            (Policy, vec![Folder]),
            (Service, vec![Folder]),
            (Encass, vec![Policy, Service]),
            (ClusterProperty, vec![Policy, Service]),
            (IdentityProvider, vec![Policy, Service]),
            (JdbcConnection, vec![Policy, Service]),
            (TrustedCert, vec![Policy, Service, IdentityProvider]),
            (StoredPassword, vec![Policy, JdbcConnection, IdentityProvider]),
            (ListenPort, vec![Policy, Service]),
            (PrivateKey, vec![ListenPort]),
        ]
    }

    proptest! {
        #[test]
        fn order_does_not_depend_on_registration_order(
            shuffled in Just(stubs()).prop_shuffle()
        ) {
            let reference = EntityFilterRegistry::new(
                stubs()
                    .into_iter()
                    .map(|(t, d)| Box::new(Stub(t, d)) as Box<dyn EntityFilter>)
                    .collect(),
            )
            .unwrap()
            .order();
            let order = EntityFilterRegistry::new(
                shuffled
                    .into_iter()
                    .map(|(t, d)| Box::new(Stub(t, d)) as Box<dyn EntityFilter>)
                    .collect(),
            )
            .unwrap()
            .order();
            prop_assert_eq!(order, reference);
        }
    }
}
