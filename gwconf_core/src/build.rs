//! # Building
//!
//! Turn a bundle loaded from a project into a deployable gateway bundle.
//!
//! Each [`EntityBuilder`] converts the entities of one type into [`Entity`]
//! values, which carry the XML for an `<l7:Item>` and the metadata for the
//! matching `<l7:Mapping>`. [`BundleEntityBuilder`] runs them in deployment
//! order and [`BundleDocumentBuilder`] writes the result.

mod document;
mod infrastructure;
mod policy;
mod service;

use std::cell::Cell;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::{
    bundle::{Bundle, EntityType, PropertyValue},
    log_runtime,
    logging::debug,
    xml::Element,
};

pub use document::BundleDocumentBuilder;
pub use infrastructure::{
    CassandraConnectionEntityBuilder, ClusterPropertyEntityBuilder,
    EnvironmentPropertyEntityBuilder, FolderEntityBuilder, GenericEntityBuilder,
    IdentityProviderEntityBuilder, JdbcConnectionEntityBuilder, ListenPortEntityBuilder,
    PrivateKeyEntityBuilder, StoredPasswordEntityBuilder, TrustedCertEntityBuilder,
};
pub use policy::PolicyEntityBuilder;
pub use service::{
    EncassEntityBuilder, PolicyBackedServiceEntityBuilder, ScheduledTaskEntityBuilder,
    ServiceEntityBuilder,
};
pub(crate) use service::{service_default_properties, DEFAULT_HTTP_METHODS};

/// Source of fresh entity ids and GUIDs.
pub trait IdGenerator {
    /// A new 32 character hex id
    fn generate_id(&self) -> String;
    /// A new GUID, for policies and encasses
    fn generate_guid(&self) -> String;
}

/// Random ids
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn generate_guid(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Counts up from 1. Gives reproducible output.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: Cell<u64>,
}

impl SequentialIdGenerator {
    fn bump(&self) -> u64 {
        let n = self.next.get() + 1;
        self.next.set(n);
        n
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self) -> String {
        format!("{:032x}", self.bump())
    }

    fn generate_guid(&self) -> String {
        format!("00000000-0000-0000-0000-{:012x}", self.bump())
    }
}

/// How the deploying gateway reconciles an entity with what it already has
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MappingAction {
    /// Create it unless it exists
    #[default]
    NewOrExisting,
    /// Create it or overwrite the existing one
    NewOrUpdate,
    /// Always create a copy
    AlwaysCreateNew,
    /// Skip it
    Ignore,
}

impl MappingAction {
    /// The `action` attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingAction::NewOrExisting => "NewOrExisting",
            MappingAction::NewOrUpdate => "NewOrUpdate",
            MappingAction::AlwaysCreateNew => "AlwaysCreateNew",
            MappingAction::Ignore => "Ignore",
        }
    }
}

/// Mapping property: fail the deployment if the entity doesn't exist yet.
pub const FAIL_ON_NEW: &str = "FailOnNew";
/// Mapping property: match existing entities by this attribute.
pub const MAP_BY: &str = "MapBy";
/// Mapping property: the value to match with.
pub const MAP_TO: &str = "MapTo";

/// One entity of the output bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    /// Entity type
    pub entity_type: EntityType,
    /// Entity name
    pub name: String,
    /// Entity id, also used as the mapping's `srcId`
    pub id: String,
    /// The resource for the `<l7:Item>`. Mapping-only entities have none.
    pub xml: Option<Element>,
    /// Mapping action
    pub mapping_action: MappingAction,
    /// Extra mapping properties, in write order
    pub mapping_properties: Vec<(String, PropertyValue)>,
}

impl Entity {
    /// An entity that becomes an item and a mapping
    pub fn new<N: Into<String>, I: Into<String>>(
        entity_type: EntityType,
        name: N,
        id: I,
        xml: Element,
    ) -> Self {
        Self {
            entity_type,
            name: name.into(),
            id: id.into(),
            xml: Some(xml),
            mapping_action: MappingAction::default(),
            mapping_properties: vec![],
        }
    }

    /// An entity that only refers to something already on the gateway
    pub fn mapping_only<N: Into<String>, I: Into<String>>(
        entity_type: EntityType,
        name: N,
        id: I,
    ) -> Self {
        Self {
            entity_type,
            name: name.into(),
            id: id.into(),
            xml: None,
            mapping_action: MappingAction::default(),
            mapping_properties: vec![],
        }
    }

    /// Builder-style mapping property
    pub fn with_mapping_property<K: Into<String>, V: Into<PropertyValue>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.mapping_properties.push((key.into(), value.into()));
        self
    }

    /// Whether the entity has an item in the bundle
    pub fn is_mapping_only(&self) -> bool {
        self.xml.is_none()
    }
}

/// Converts every entity of one type in a bundle.
pub trait EntityBuilder {
    /// The type this builder converts
    fn entity_type(&self) -> EntityType;

    /// Build the entities. Every id must already be assigned.
    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>>;
}

/// Builds every entity of a bundle in deployment order.
pub struct BundleEntityBuilder<'a> {
    ids: &'a dyn IdGenerator,
    builders: Vec<Box<dyn EntityBuilder + 'a>>,
}

impl<'a> BundleEntityBuilder<'a> {
    /// Use `ids` for every id and GUID the bundle is missing.
    pub fn new(ids: &'a dyn IdGenerator) -> Self {
        Self {
            ids,
            builders: vec![
                Box::new(FolderEntityBuilder),
                Box::new(StoredPasswordEntityBuilder),
                Box::new(TrustedCertEntityBuilder),
                Box::new(PrivateKeyEntityBuilder),
                Box::new(IdentityProviderEntityBuilder),
                Box::new(JdbcConnectionEntityBuilder),
                Box::new(CassandraConnectionEntityBuilder),
                Box::new(ClusterPropertyEntityBuilder),
                Box::new(EnvironmentPropertyEntityBuilder::new(ids)),
                Box::new(PolicyEntityBuilder),
                Box::new(EncassEntityBuilder),
                Box::new(PolicyBackedServiceEntityBuilder),
                Box::new(ServiceEntityBuilder),
                Box::new(ListenPortEntityBuilder),
                Box::new(ScheduledTaskEntityBuilder),
                Box::new(GenericEntityBuilder),
            ],
        }
    }

    /// Assign ids, resolve references between entities, and build every
    /// entity. The input bundle is left as it was.
    pub fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        let mut bundle = bundle.clone();
        bundle.assign_ids(self.ids);
        bundle
            .rebuild_folder_tree()
            .context("building the folder tree")?;
        PolicyEntityBuilder::prepare(&mut bundle, self.ids)
            .context("resolving policy references")?;

        let mut res = vec![];
        log_runtime!("building entities", {
            for builder in &self.builders {
                let entities = builder
                    .build(&bundle)
                    .with_context(|| format!("building {} entities", builder.entity_type()))?;
                debug!("built {} {} entities", entities.len(), builder.entity_type());
                res.extend(entities);
            }
        });
        Ok(res)
    }
}

/// The `<l7:Item>` body shared by most builders: `<l7:Name>` first.
pub(crate) fn named(element: &str, id: &str, name: &str) -> Element {
    Element::l7(element)
        .with_attr("id", id)
        .with_child(Element::l7_text("Name", name))
}
