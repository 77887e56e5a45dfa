//! # Bundle
//!
//! The in-memory representation of a set of gateway entities, shared by both
//! directions of the tool. A [`Bundle`] owns every entity; entities only point
//! at each other by id or path, and the folder hierarchy is resolved through
//! the bundle's [`FolderTree`].

pub mod entities;
mod folder_tree;

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EntityBuilderError, ReadError};

pub use entities::*;
pub use folder_tree::{is_within, normalize_path, FolderTree, ROOT_FOLDER_ID, ROOT_FOLDER_NAME};
#[cfg(test)]
pub(crate) use folder_tree::tests::folder;

/// Every entity type this tool knows how to move between the two formats.
///
/// The declaration order is also the tie-breaking order used when sorting
/// filters, so it stays stable.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityType {
    /// A folder
    #[serde(rename = "FOLDER")]
    Folder,
    /// A standalone policy
    #[serde(rename = "POLICY")]
    Policy,
    /// A published service
    #[serde(rename = "SERVICE")]
    Service,
    /// An encapsulated assertion
    #[serde(rename = "ENCAPSULATED_ASSERTION")]
    Encass,
    /// A policy-backed service
    #[serde(rename = "POLICY_BACKED_SERVICE")]
    PolicyBackedService,
    /// A cluster-wide property
    #[serde(rename = "CLUSTER_PROPERTY")]
    ClusterProperty,
    /// A listen port
    #[serde(rename = "SSG_CONNECTOR")]
    ListenPort,
    /// A JDBC connection
    #[serde(rename = "JDBC_CONNECTION")]
    JdbcConnection,
    /// A Cassandra connection
    #[serde(rename = "CASSANDRA_CONFIGURATION")]
    CassandraConnection,
    /// An identity provider
    #[serde(rename = "ID_PROVIDER_CONFIG")]
    IdentityProvider,
    /// A trusted certificate
    #[serde(rename = "TRUSTED_CERT")]
    TrustedCert,
    /// A private key entry
    #[serde(rename = "SSG_KEY_ENTRY")]
    PrivateKey,
    /// A stored (secure) password
    #[serde(rename = "SECURE_PASSWORD")]
    StoredPassword,
    /// A scheduled task
    #[serde(rename = "SCHEDULED_TASK")]
    ScheduledTask,
    /// A generic entity
    #[serde(rename = "GENERIC")]
    GenericEntity,
}

impl EntityType {
    /// All the entity types, in declaration order.
    pub const ALL: [EntityType; 15] = [
        EntityType::Folder,
        EntityType::Policy,
        EntityType::Service,
        EntityType::Encass,
        EntityType::PolicyBackedService,
        EntityType::ClusterProperty,
        EntityType::ListenPort,
        EntityType::JdbcConnection,
        EntityType::CassandraConnection,
        EntityType::IdentityProvider,
        EntityType::TrustedCert,
        EntityType::PrivateKey,
        EntityType::StoredPassword,
        EntityType::ScheduledTask,
        EntityType::GenericEntity,
    ];

    /// The type string used by the gateway management schema
    pub fn gateway_type(&self) -> &'static str {
        match self {
            EntityType::Folder => "FOLDER",
            EntityType::Policy => "POLICY",
            EntityType::Service => "SERVICE",
            EntityType::Encass => "ENCAPSULATED_ASSERTION",
            EntityType::PolicyBackedService => "POLICY_BACKED_SERVICE",
            EntityType::ClusterProperty => "CLUSTER_PROPERTY",
            EntityType::ListenPort => "SSG_CONNECTOR",
            EntityType::JdbcConnection => "JDBC_CONNECTION",
            EntityType::CassandraConnection => "CASSANDRA_CONFIGURATION",
            EntityType::IdentityProvider => "ID_PROVIDER_CONFIG",
            EntityType::TrustedCert => "TRUSTED_CERT",
            EntityType::PrivateKey => "SSG_KEY_ENTRY",
            EntityType::StoredPassword => "SECURE_PASSWORD",
            EntityType::ScheduledTask => "SCHEDULED_TASK",
            EntityType::GenericEntity => "GENERIC",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.gateway_type())
    }
}

impl FromStr for EntityType {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.gateway_type() == s)
            .ok_or_else(|| ReadError::UnsupportedType(s.to_owned()))
    }
}

/// A typed reference to any entity in a bundle.
#[derive(Clone, Debug, Eq)]
pub struct Dependency {
    /// The entity id
    pub id: String,
    /// The entity type
    pub entity_type: EntityType,
    /// The entity name, when known
    pub name: Option<String>,
    /// The raw type string this dependency was read with, when it differs
    /// from the canonical one
    pub type_tag: Option<String>,
}

impl Dependency {
    /// Basic constructor
    pub fn new<S: Into<String>>(id: S, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            name: None,
            type_tag: None,
        }
    }

    /// Attach a name, for diagnostics
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// `Dependency`s are identified solely by `(id, entity_type)`.
///
/// The name and type tag are carried for diagnostics only, so two
/// dependencies read from different places in a bundle hash to the same
/// key as long as they point at the same entity.
impl std::hash::Hash for Dependency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.entity_type.hash(state);
    }
}

/// See the `Hash` implementation: equality ignores name and type tag.
impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.entity_type == other.entity_type
    }
}

/// "Entity X directly references entities Y1..Yn", keyed by X.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: IndexMap<Dependency, Vec<Dependency>>,
}

impl DependencyGraph {
    /// Record that `from` references `to`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: Dependency, to: Dependency) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    /// The direct dependencies of an entity. Empty if it references nothing.
    pub fn dependencies_of(&self, from: &Dependency) -> &[Dependency] {
        self.edges.get(from).map(|v| v.as_slice()).unwrap_or_default()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&Dependency, &Vec<Dependency>)> {
        self.edges.iter()
    }

    /// Number of keys in the graph
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has any entries
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The part of the graph whose keys are in `keep`.
    pub fn restricted_to(&self, keep: &HashSet<Dependency>) -> DependencyGraph {
        DependencyGraph {
            edges: self
                .edges
                .iter()
                .filter(|(k, _)| keep.contains(*k))
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

/// Common behavior of every entity bean.
pub trait GatewayEntity: Clone {
    /// The type of the entity
    const ENTITY_TYPE: EntityType;

    /// The entity id. Empty until one is assigned.
    fn id(&self) -> &str;
    /// Set the entity id
    fn set_id(&mut self, id: String);
    /// The entity name
    fn name(&self) -> &str;
    /// The key the entity is stored under in its bundle map
    fn key(&self) -> &str;
    /// Wrap the entity into the bundle-wide tagged union
    fn into_bundle_entity(self) -> BundleEntity;

    /// The dependency-graph identity of this entity
    fn dependency(&self) -> Dependency {
        Dependency::new(self.id(), Self::ENTITY_TYPE).with_name(self.name())
    }
}

macro_rules! bundle_entities {
    ($(($variant:ident, $t:ty, $field:ident)),+ $(,)?) => {
        /// Tagged union of every entity bean.
        #[derive(Clone, Debug, PartialEq)]
        pub enum BundleEntity {
            $(
                #[doc = concat!("A wrapped [`", stringify!($variant), "`]")]
                $variant($t),
            )+
        }

        impl BundleEntity {
            /// The type of the wrapped entity
            pub fn entity_type(&self) -> EntityType {
                match self {
                    $(BundleEntity::$variant(_) => <$t as GatewayEntity>::ENTITY_TYPE,)+
                }
            }

            /// The name of the wrapped entity
            pub fn name(&self) -> &str {
                match self {
                    $(BundleEntity::$variant(e) => e.name(),)+
                }
            }
        }

        impl Bundle {
            /// Insert an entity into the matching collection, replacing any
            /// entity with the same key.
            pub fn add(&mut self, entity: BundleEntity) {
                match entity {
                    $(BundleEntity::$variant(e) => {
                        self.$field.insert(e.key().to_owned(), e);
                    })+
                }
            }

            /// The dependency keys of every entity of the given type.
            pub fn dependencies_of_type(&self, entity_type: EntityType) -> Vec<Dependency> {
                $(
                    if entity_type == <$t as GatewayEntity>::ENTITY_TYPE {
                        return self.$field.values().map(|e| e.dependency()).collect();
                    }
                )+
                vec![]
            }

            /// Give every entity without an id a fresh one.
            pub fn assign_ids(&mut self, ids: &dyn crate::build::IdGenerator) {
                $(
                    for e in self.$field.values_mut() {
                        if e.id().is_empty() {
                            e.set_id(ids.generate_id());
                        }
                    }
                )+
            }

            /// Count of entities, per type
            pub fn counts(&self) -> BTreeMap<EntityType, usize> {
                let mut res = BTreeMap::new();
                $(
                    res.insert(<$t as GatewayEntity>::ENTITY_TYPE, self.$field.len());
                )+
                res
            }
        }
    };
}

bundle_entities!(
    (Folder, Folder, folders),
    (Policy, Policy, policies),
    (Service, Service, services),
    (Encass, Encass, encasses),
    (PolicyBackedService, PolicyBackedService, policy_backed_services),
    (ClusterProperty, ClusterProperty, cluster_properties),
    (ListenPort, ListenPort, listen_ports),
    (JdbcConnection, JdbcConnection, jdbc_connections),
    (CassandraConnection, CassandraConnection, cassandra_connections),
    (IdentityProvider, IdentityProvider, identity_providers),
    (TrustedCert, TrustedCert, trusted_certs),
    (PrivateKey, PrivateKey, private_keys),
    (StoredPassword, StoredPassword, stored_passwords),
    (ScheduledTask, ScheduledTask, scheduled_tasks),
    (GenericEntity, GenericEntity, generic_entities),
);

/// A complete or filtered collection of gateway entities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bundle {
    /// Folders, keyed by id
    pub folders: BTreeMap<String, Folder>,
    /// Standalone policies, keyed by path
    pub policies: BTreeMap<String, Policy>,
    /// Services, keyed by path
    pub services: BTreeMap<String, Service>,
    /// Encapsulated assertions, keyed by name
    pub encasses: BTreeMap<String, Encass>,
    /// Policy-backed services, keyed by name
    pub policy_backed_services: BTreeMap<String, PolicyBackedService>,
    /// Cluster properties, keyed by name
    pub cluster_properties: BTreeMap<String, ClusterProperty>,
    /// Environment properties, keyed by name. These only exist on the build
    /// side and are mapped onto pre-existing cluster properties.
    pub environment_properties: BTreeMap<String, String>,
    /// Listen ports, keyed by name
    pub listen_ports: BTreeMap<String, ListenPort>,
    /// JDBC connections, keyed by name
    pub jdbc_connections: BTreeMap<String, JdbcConnection>,
    /// Cassandra connections, keyed by name
    pub cassandra_connections: BTreeMap<String, CassandraConnection>,
    /// Identity providers, keyed by name
    pub identity_providers: BTreeMap<String, IdentityProvider>,
    /// Trusted certificates, keyed by name
    pub trusted_certs: BTreeMap<String, TrustedCert>,
    /// Private keys, keyed by alias
    pub private_keys: BTreeMap<String, PrivateKey>,
    /// Stored passwords, keyed by name
    pub stored_passwords: BTreeMap<String, StoredPassword>,
    /// Scheduled tasks, keyed by name
    pub scheduled_tasks: BTreeMap<String, ScheduledTask>,
    /// Generic entities, keyed by name
    pub generic_entities: BTreeMap<String, GenericEntity>,
    /// The folder hierarchy over `folders`
    pub folder_tree: FolderTree,
    /// Which entities reference which
    pub dependency_graph: DependencyGraph,
}

impl Bundle {
    /// Rebuild the folder tree from the current set of folders.
    pub fn rebuild_folder_tree(&mut self) -> Result<()> {
        self.folder_tree = FolderTree::new(self.folders.values().cloned())?;
        Ok(())
    }

    /// Resolve a policy reference made by `referrer`.
    ///
    /// An exact path match wins. Otherwise the reference is matched against
    /// policy file names (with or without the `.xml` extension) and must
    /// match exactly one policy.
    pub fn resolve_policy(&self, reference: &str, referrer: &str) -> Result<&Policy> {
        if let Some(p) = self.policies.get(reference) {
            return Ok(p);
        }
        let wanted = reference.trim_end_matches(".xml");
        let candidates = self
            .policies
            .values()
            .filter(|p| {
                p.path.trim_end_matches(".xml") == wanted
                    || p.path
                        .rsplit('/')
                        .next()
                        .map(|f| f.trim_end_matches(".xml") == wanted)
                        .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        match candidates.as_slice() {
            [p] => Ok(p),
            [] => Err(EntityBuilderError::MissingReference {
                entity_type: EntityType::Policy,
                reference: reference.to_owned(),
                referrer: referrer.to_owned(),
            }
            .into()),
            many => Err(EntityBuilderError::AmbiguousReference {
                entity_type: EntityType::Policy,
                reference: reference.to_owned(),
                referrer: referrer.to_owned(),
                candidates: many.iter().map(|p| p.path.to_owned()).collect(),
            }
            .into()),
        }
    }

    /// Find the policy with the given id
    pub fn policy_by_id(&self, id: &str) -> Option<&Policy> {
        self.policies.values().find(|p| p.id == id)
    }

    /// Find the service with the given id
    pub fn service_by_id(&self, id: &str) -> Option<&Service> {
        self.services.values().find(|s| s.id == id)
    }

    /// The dependency keys of every entity held by this bundle.
    pub fn all_dependencies(&self) -> HashSet<Dependency> {
        EntityType::ALL
            .iter()
            .flat_map(|t| self.dependencies_of_type(*t))
            .collect()
    }
}
