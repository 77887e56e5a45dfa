//! # Filtering
//!
//! Narrow a full gateway bundle down to what's needed by one folder subtree.
//!
//! Folders are kept by path, policies and services by folder. Every other
//! entity type is kept when something already kept references it in the
//! bundle's dependency graph, or when the user explicitly asks for it. Each
//! entity type has one [`EntityFilter`], and the [`EntityFilterRegistry`]
//! runs them so that every filter sees the finished output of the filters it
//! depends on.

mod dependency;
mod folder;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    bundle::{Bundle, BundleEntity, EntityType},
    error::EntityFilterError,
    log_runtime,
    logging::debug,
};

pub use dependency::{
    DependencyFilter, ListenPortFilter, PolicyBacked, PolicyBackedFilter, ScheduledTaskFilter,
};
pub use folder::{FolderFilter, PolicyFilter, ServiceFilter};
pub use registry::EntityFilterRegistry;

/// Entities to export no matter what the dependency graph says, by type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfiguration {
    /// Names to force-include, keyed by entity type
    #[serde(default)]
    pub entity_filters: BTreeMap<EntityType, BTreeSet<String>>,
}

impl FilterConfiguration {
    /// Force-include an entity by name.
    pub fn include<S: Into<String>>(&mut self, entity_type: EntityType, name: S) {
        self.entity_filters
            .entry(entity_type)
            .or_default()
            .insert(name.into());
    }

    /// The force-included names for a type
    pub fn forced(&self, entity_type: EntityType) -> impl Iterator<Item = &str> {
        self.entity_filters
            .get(&entity_type)
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
    }

    /// Whether a name is force-included for a type
    pub fn is_forced(&self, entity_type: EntityType, name: &str) -> bool {
        self.entity_filters
            .get(&entity_type)
            .map(|names| names.contains(name))
            .unwrap_or(false)
    }
}

/// Decides which entities of one type belong in a filtered bundle.
pub trait EntityFilter {
    /// The type this filter produces
    fn entity_type(&self) -> EntityType;

    /// Types whose filters must run before this one
    fn dependencies(&self) -> Vec<EntityType>;

    /// Pick the entities of this filter's type to keep.
    ///
    /// `source` is the complete bundle and is never modified. `filtered`
    /// holds everything the filters that ran earlier decided to keep.
    fn filter(
        &self,
        folder_path: &str,
        config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>>;
}

/// Error out on force-included names missing from the source bundle.
pub(crate) fn check_forced<F>(
    config: &FilterConfiguration,
    entity_type: EntityType,
    exists: F,
) -> Result<()>
where
    F: Fn(&str) -> bool,
{
    match config.forced(entity_type).find(|name| !exists(name)) {
        Some(missing) => Err(EntityFilterError::MissingEntity {
            entity_type,
            name: missing.to_owned(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Produces a filtered copy of a bundle.
pub struct BundleFilter<'a> {
    source: &'a Bundle,
    registry: EntityFilterRegistry,
    config: FilterConfiguration,
}

impl<'a> BundleFilter<'a> {
    /// Filter with the standard set of filters.
    pub fn new(source: &'a Bundle, config: FilterConfiguration) -> Result<Self> {
        Ok(Self::with_registry(
            source,
            EntityFilterRegistry::with_default_filters()?,
            config,
        ))
    }

    /// Filter with a custom set of filters.
    pub fn with_registry(
        source: &'a Bundle,
        registry: EntityFilterRegistry,
        config: FilterConfiguration,
    ) -> Self {
        Self {
            source,
            registry,
            config,
        }
    }

    /// Everything needed to recreate the folder at `folder_path` and its
    /// subtree, plus the chain of folders leading to it.
    pub fn filter(&self, folder_path: &str) -> Result<Bundle> {
        if self.source.folder_tree.folder_by_path(folder_path).is_none() {
            return Err(EntityFilterError::FolderNotFound(folder_path.to_owned()).into());
        }

        let mut filtered = Bundle::default();
        log_runtime!("filtering bundle", {
            for entity_filter in self.registry.filters() {
                let entity_type = entity_filter.entity_type();
                let kept = entity_filter
                    .filter(folder_path, &self.config, self.source, &filtered)
                    .with_context(|| format!("filtering {entity_type} entities"))?;
                debug!("kept {} {} entities", kept.len(), entity_type);
                for entity in kept {
                    filtered.add(entity);
                }
            }
        });

        for folder in FolderFilter::parent_folders(folder_path, self.source)? {
            filtered.add(BundleEntity::Folder(folder));
        }

        let kept = filtered.all_dependencies();
        filtered.dependency_graph = self.source.dependency_graph.restricted_to(&kept);
        filtered
            .rebuild_folder_tree()
            .context("rebuilding the filtered folder tree")?;
        Ok(filtered)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bundle::{
        folder, ClusterProperty, Dependency, Encass, GatewayEntity, GenericEntity,
        IdentityProvider, ListenPort, Policy, PolicyBackedService, PolicyBackedServiceOperation,
        PrivateKey, Service, StoredPassword, TrustedCert, ROOT_FOLDER_ID, ROOT_FOLDER_NAME,
    };

    pub(crate) fn policy(id: &str, path: &str, folder_id: &str) -> Policy {
        Policy {
            id: id.to_owned(),
            guid: format!("guid-{id}"),
            name: path
                .rsplit('/')
                .next()
                .unwrap_or(path)
                .trim_end_matches(".xml")
                .to_owned(),
            path: path.to_owned(),
            folder_id: folder_id.to_owned(),
            ..Default::default()
        }
    }

    pub(crate) fn property(id: &str, name: &str) -> ClusterProperty {
        ClusterProperty {
            id: id.to_owned(),
            name: name.to_owned(),
            value: "value".to_owned(),
        }
    }

    /// Root -> a -> a/b, plus root -> c.
    /// policy1 in a references prop2 and prop3, policy2 in c references prop4.
    pub(crate) fn sample_bundle() -> Bundle {
        let mut bundle = Bundle::default();
        for f in [
            folder(ROOT_FOLDER_ID, ROOT_FOLDER_NAME, None),
            folder("a", "a", Some(ROOT_FOLDER_ID)),
            folder("b", "b", Some("a")),
            folder("c", "c", Some(ROOT_FOLDER_ID)),
        ] {
            bundle.add(BundleEntity::Folder(f));
        }
        let p1 = policy("policy1", "a/policy1.xml", "a");
        let p2 = policy("policy2", "c/policy2.xml", "c");
        let props = [
            property("prop2", "prop2"),
            property("prop3", "prop3"),
            property("prop4", "prop4"),
        ];
        bundle
            .dependency_graph
            .add_edge(p1.dependency(), props[0].dependency());
        bundle
            .dependency_graph
            .add_edge(p1.dependency(), props[1].dependency());
        bundle
            .dependency_graph
            .add_edge(p2.dependency(), props[2].dependency());
        bundle.add(BundleEntity::Policy(p1));
        bundle.add(BundleEntity::Policy(p2));
        for p in props {
            bundle.add(BundleEntity::ClusterProperty(p));
        }
        bundle.add(BundleEntity::Service(Service {
            id: "service1".to_owned(),
            name: "service1".to_owned(),
            path: "a/b/service1.xml".to_owned(),
            folder_id: "b".to_owned(),
            url: "/service1".to_owned(),
            enabled: true,
            ..Default::default()
        }));
        bundle.rebuild_folder_tree().unwrap();
        bundle
    }

    #[test]
    fn exports_a_subtree_with_its_ancestors() -> Result<()> {
        let source = sample_bundle();
        let filtered = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/a")?;

        assert_eq!(
            filtered.folders.keys().cloned().collect::<BTreeSet<_>>(),
            BTreeSet::from([ROOT_FOLDER_ID.to_owned(), "a".to_owned(), "b".to_owned()])
        );
        assert_eq!(
            filtered.policies.keys().collect::<Vec<_>>(),
            vec!["a/policy1.xml"]
        );
        assert_eq!(
            filtered.services.keys().collect::<Vec<_>>(),
            vec!["a/b/service1.xml"]
        );
        assert_eq!(
            filtered.cluster_properties.keys().collect::<Vec<_>>(),
            vec!["prop2", "prop3"]
        );
        assert_eq!(filtered.folder_tree.path_by_id("b").unwrap(), "a/b");
        Ok(())
    }

    #[test]
    fn dependency_graph_is_restricted_to_kept_entities() -> Result<()> {
        let source = sample_bundle();
        let filtered = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/a")?;

        assert_eq!(filtered.dependency_graph.len(), 1);
        let p2 = Dependency::new("policy2", EntityType::Policy);
        assert!(filtered.dependency_graph.dependencies_of(&p2).is_empty());
        Ok(())
    }

    #[test]
    fn filtering_is_idempotent() -> Result<()> {
        let source = sample_bundle();
        let once = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/a/b")?;
        let twice = BundleFilter::new(&once, FilterConfiguration::default())?.filter("/a/b")?;
        assert_eq!(once, twice);
        assert!(once.folders.contains_key(ROOT_FOLDER_ID));
        assert!(once.folders.contains_key("a"));
        Ok(())
    }

    #[test]
    fn forced_entities_are_exported() -> Result<()> {
        let source = sample_bundle();
        let mut config = FilterConfiguration::default();
        config.include(EntityType::ClusterProperty, "prop4");
        let filtered = BundleFilter::new(&source, config)?.filter("/a")?;
        assert_eq!(filtered.cluster_properties.len(), 3);
        Ok(())
    }

    /// `sample_bundle` plus one entity of every dependency-driven type
    /// reachable from `/a`, and one of most types that isn't. Edges point the
    /// way gateway exports do: encasses and policy-backed services at their
    /// backing policy, everything else from the user to the used.
    fn connected_bundle() -> Bundle {
        let mut bundle = sample_bundle();
        let p1 = bundle.policies["a/policy1.xml"].dependency();
        let p2 = bundle.policies["c/policy2.xml"].dependency();

        for (name, path, backing) in [
            ("local", "a/policy1.xml", &p1),
            ("outside", "c/policy2.xml", &p2),
        ] {
            let encass = Encass {
                id: name.to_owned(),
                name: name.to_owned(),
                policy: path.to_owned(),
                ..Default::default()
            };
            bundle.dependency_graph.add_edge(encass.dependency(), backing.clone());
            bundle.add(BundleEntity::Encass(encass));
        }

        let pbs = PolicyBackedService {
            id: "audit".to_owned(),
            name: "audit".to_owned(),
            interface_name: "com.example.Audit".to_owned(),
            operations: vec![PolicyBackedServiceOperation {
                operation_name: "record".to_owned(),
                policy: "a/policy1.xml".to_owned(),
            }],
        };
        bundle.dependency_graph.add_edge(pbs.dependency(), p1.clone());
        bundle.add(BundleEntity::PolicyBackedService(pbs));

        let ldap = IdentityProvider {
            id: "ldap".to_owned(),
            name: "ldap".to_owned(),
            ..Default::default()
        };
        let certs = ["ldap-ca", "other-ca"].map(|name| TrustedCert {
            id: name.to_owned(),
            name: name.to_owned(),
            encoded: "AAECAw==".to_owned(),
            ..Default::default()
        });
        let bind = StoredPassword {
            id: "bind".to_owned(),
            name: "bind".to_owned(),
            ..Default::default()
        };
        let limits = GenericEntity {
            id: "limits".to_owned(),
            name: "limits".to_owned(),
            entity_class_name: "com.example.RateLimit".to_owned(),
            ..Default::default()
        };
        let graph = &mut bundle.dependency_graph;
        graph.add_edge(p1.clone(), ldap.dependency());
        graph.add_edge(ldap.dependency(), certs[0].dependency());
        graph.add_edge(ldap.dependency(), bind.dependency());
        graph.add_edge(p1, limits.dependency());

        let port = ListenPort {
            id: "custom".to_owned(),
            name: "custom".to_owned(),
            port: 9000,
            target_service: Some("a/b/service1.xml".to_owned()),
            ..Default::default()
        };
        let keys = [PrivateKey::new("ssl"), PrivateKey::new("unused")];
        graph.add_edge(port.dependency(), keys[0].dependency());

        bundle.add(BundleEntity::IdentityProvider(ldap));
        for cert in certs {
            bundle.add(BundleEntity::TrustedCert(cert));
        }
        bundle.add(BundleEntity::StoredPassword(bind));
        bundle.add(BundleEntity::GenericEntity(limits));
        bundle.add(BundleEntity::ListenPort(port));
        for key in keys {
            bundle.add(BundleEntity::PrivateKey(key));
        }
        bundle
    }

    fn names<E>(entities: &BTreeMap<String, E>) -> Vec<&str> {
        entities.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn policy_backed_entities_follow_their_backing_policy() -> Result<()> {
        let source = connected_bundle();
        let filtered = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/a")?;
        assert_eq!(names(&filtered.encasses), vec!["local"]);
        assert_eq!(names(&filtered.policy_backed_services), vec!["audit"]);

        let whole = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/")?;
        assert_eq!(names(&whole.encasses), vec!["local", "outside"]);
        Ok(())
    }

    #[test]
    fn dependencies_are_followed_through_every_type() -> Result<()> {
        let source = connected_bundle();
        let filtered = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/a")?;
        assert_eq!(names(&filtered.identity_providers), vec!["ldap"]);
        assert_eq!(names(&filtered.trusted_certs), vec!["ldap-ca"]);
        assert_eq!(names(&filtered.stored_passwords), vec!["bind"]);
        assert_eq!(names(&filtered.generic_entities), vec!["limits"]);
        assert_eq!(names(&filtered.listen_ports), vec!["custom"]);
        assert_eq!(names(&filtered.private_keys), vec!["ssl"]);

        let elsewhere = BundleFilter::new(&source, FilterConfiguration::default())?.filter("/c")?;
        assert!(elsewhere.identity_providers.is_empty());
        assert!(elsewhere.trusted_certs.is_empty());
        assert!(elsewhere.private_keys.is_empty());
        assert_eq!(names(&elsewhere.encasses), vec!["outside"]);
        Ok(())
    }

    #[test]
    fn forced_entities_of_chained_types_are_exported() -> Result<()> {
        let source = connected_bundle();
        let mut config = FilterConfiguration::default();
        config.include(EntityType::TrustedCert, "other-ca");
        config.include(EntityType::PrivateKey, "unused");
        let filtered = BundleFilter::new(&source, config)?.filter("/c")?;
        assert_eq!(names(&filtered.trusted_certs), vec!["other-ca"]);
        assert_eq!(names(&filtered.private_keys), vec!["unused"]);
        Ok(())
    }

    proptest! {
        #[test]
        fn result_does_not_depend_on_registration_order(
            shuffled in Just((0..registry::default_filters().len()).collect::<Vec<_>>())
                .prop_shuffle(),
            folder_path in prop::sample::select(vec!["/", "/a", "/a/b", "/c"]),
        ) {
            let source = connected_bundle();
            let expected = BundleFilter::new(&source, FilterConfiguration::default())
                .unwrap()
                .filter(folder_path)
                .unwrap();

            let mut filters: Vec<Option<Box<dyn EntityFilter>>> =
                registry::default_filters().into_iter().map(Some).collect();
            let shuffled_filters = shuffled.iter().filter_map(|i| filters[*i].take()).collect();
            let registry = EntityFilterRegistry::new(shuffled_filters).unwrap();
            let actual = BundleFilter::with_registry(&source, registry, FilterConfiguration::default())
                .filter(folder_path)
                .unwrap();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn missing_export_root_is_an_error() -> Result<()> {
        let source = sample_bundle();
        let err = BundleFilter::new(&source, FilterConfiguration::default())?
            .filter("/nope")
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntityFilterError>(),
            Some(&EntityFilterError::FolderNotFound("/nope".to_owned()))
        );
        Ok(())
    }
}
