//! Filters that keep what kept entities reference.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use super::{check_forced, EntityFilter, FilterConfiguration};
use crate::{
    bundle::{
        Bundle, BundleEntity, Dependency, Encass, EntityType, GatewayEntity, ListenPort,
        PolicyBackedService, ScheduledTask, DEFAULT_LISTEN_PORTS,
    },
    logging::warn,
};

/// Everything the kept entities of `source_types` point at directly.
fn referenced_by(
    source: &Bundle,
    filtered: &Bundle,
    source_types: &[EntityType],
) -> HashSet<Dependency> {
    source_types
        .iter()
        .flat_map(|t| filtered.dependencies_of_type(*t))
        .flat_map(|d| source.dependency_graph.dependencies_of(&d).iter().cloned())
        .collect()
}

/// Keeps an entity when a kept entity of one of the source types references
/// it, or when it's force-included.
pub struct DependencyFilter<E> {
    source_types: Vec<EntityType>,
    select: fn(&Bundle) -> &BTreeMap<String, E>,
}

impl<E: GatewayEntity> DependencyFilter<E> {
    /// `select` picks the entity collection out of a bundle.
    pub fn new(
        source_types: &[EntityType],
        select: fn(&Bundle) -> &BTreeMap<String, E>,
    ) -> Self {
        Self {
            source_types: source_types.to_vec(),
            select,
        }
    }
}

impl<E: GatewayEntity> EntityFilter for DependencyFilter<E> {
    fn entity_type(&self) -> EntityType {
        E::ENTITY_TYPE
    }

    fn dependencies(&self) -> Vec<EntityType> {
        self.source_types.clone()
    }

    fn filter(
        &self,
        _folder_path: &str,
        config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        let entities = (self.select)(source);
        check_forced(config, E::ENTITY_TYPE, |name| {
            entities.values().any(|e| e.name() == name)
        })?;

        let referenced = referenced_by(source, filtered, &self.source_types);
        Ok(entities
            .values()
            .filter(|e| {
                referenced.contains(&e.dependency()) || config.is_forced(E::ENTITY_TYPE, e.name())
            })
            .cloned()
            .map(GatewayEntity::into_bundle_entity)
            .collect())
    }
}

/// Entities whose behavior is implemented by policies.
pub trait PolicyBacked: GatewayEntity {
    /// Paths of the implementing policies
    fn backing_policies(&self) -> Vec<&str>;
}

impl PolicyBacked for Encass {
    fn backing_policies(&self) -> Vec<&str> {
        vec![self.policy.as_str()]
    }
}

impl PolicyBacked for PolicyBackedService {
    fn backing_policies(&self) -> Vec<&str> {
        self.operations.iter().map(|o| o.policy.as_str()).collect()
    }
}

/// Encasses and policy-backed services. Kept when a kept policy or service
/// uses one, when one of its backing policies is kept, or when it's
/// force-included.
pub struct PolicyBackedFilter<E> {
    select: fn(&Bundle) -> &BTreeMap<String, E>,
}

impl<E: PolicyBacked> PolicyBackedFilter<E> {
    const SOURCE_TYPES: [EntityType; 2] = [EntityType::Policy, EntityType::Service];

    /// `select` picks the entity collection out of a bundle.
    pub fn new(select: fn(&Bundle) -> &BTreeMap<String, E>) -> Self {
        Self { select }
    }

    fn keep(
        entity: &E,
        referenced: &HashSet<Dependency>,
        config: &FilterConfiguration,
        filtered: &Bundle,
    ) -> bool {
        referenced.contains(&entity.dependency())
            || entity
                .backing_policies()
                .iter()
                .any(|p| filtered.policies.contains_key(*p))
            || config.is_forced(E::ENTITY_TYPE, entity.name())
    }
}

impl<E: PolicyBacked> EntityFilter for PolicyBackedFilter<E> {
    fn entity_type(&self) -> EntityType {
        E::ENTITY_TYPE
    }

    fn dependencies(&self) -> Vec<EntityType> {
        Self::SOURCE_TYPES.to_vec()
    }

    fn filter(
        &self,
        _folder_path: &str,
        config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        let entities = (self.select)(source);
        check_forced(config, E::ENTITY_TYPE, |name| {
            entities.values().any(|e| e.name() == name)
        })?;
        let referenced = referenced_by(source, filtered, &Self::SOURCE_TYPES);
        Ok(entities
            .values()
            .filter(|e| Self::keep(e, &referenced, config, filtered))
            .cloned()
            .map(GatewayEntity::into_bundle_entity)
            .collect())
    }
}

/// Listen ports referenced by kept policies or routing to a kept service.
/// Ports the gateway ships with are never kept.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListenPortFilter;

impl ListenPortFilter {
    const SOURCE_TYPES: [EntityType; 2] = [EntityType::Policy, EntityType::Service];

    fn keep(
        port: &ListenPort,
        referenced: &HashSet<Dependency>,
        config: &FilterConfiguration,
        filtered: &Bundle,
    ) -> bool {
        let forced = config.is_forced(EntityType::ListenPort, &port.name);
        if DEFAULT_LISTEN_PORTS.contains(&port.port) {
            if forced {
                warn!(
                    "listen port {} uses default port {} and won't be exported",
                    port.name, port.port
                );
            }
            return false;
        }
        forced
            || referenced.contains(&port.dependency())
            || port
                .target_service
                .as_ref()
                .map(|s| filtered.services.contains_key(s))
                .unwrap_or(false)
    }
}

impl EntityFilter for ListenPortFilter {
    fn entity_type(&self) -> EntityType {
        EntityType::ListenPort
    }

    fn dependencies(&self) -> Vec<EntityType> {
        Self::SOURCE_TYPES.to_vec()
    }

    fn filter(
        &self,
        _folder_path: &str,
        config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        check_forced(config, EntityType::ListenPort, |name| {
            source.listen_ports.contains_key(name)
        })?;
        let referenced = referenced_by(source, filtered, &Self::SOURCE_TYPES);
        Ok(source
            .listen_ports
            .values()
            .filter(|p| Self::keep(p, &referenced, config, filtered))
            .cloned()
            .map(BundleEntity::ListenPort)
            .collect())
    }
}

/// Scheduled tasks whose policy is kept.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduledTaskFilter;

impl ScheduledTaskFilter {
    fn keep(task: &ScheduledTask, config: &FilterConfiguration, filtered: &Bundle) -> bool {
        config.is_forced(EntityType::ScheduledTask, &task.name)
            || filtered.policies.contains_key(&task.policy)
    }
}

impl EntityFilter for ScheduledTaskFilter {
    fn entity_type(&self) -> EntityType {
        EntityType::ScheduledTask
    }

    fn dependencies(&self) -> Vec<EntityType> {
        vec![EntityType::Policy]
    }

    fn filter(
        &self,
        _folder_path: &str,
        config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        check_forced(config, EntityType::ScheduledTask, |name| {
            source.scheduled_tasks.contains_key(name)
        })?;
        Ok(source
            .scheduled_tasks
            .values()
            .filter(|t| Self::keep(t, config, filtered))
            .cloned()
            .map(BundleEntity::ScheduledTask)
            .collect())
    }
}
