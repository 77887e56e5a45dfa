//! # Reading
//!
//! Parse an exported gateway bundle into a [`Bundle`].
//!
//! Items are read in passes so that references can be turned into paths and
//! names as they're read: folders first, then policies, services and stored
//! passwords, then everything else. Item types this tool doesn't model are
//! logged and skipped.

mod dependencies;
mod items;

use std::str::FromStr;

use anyhow::{Context, Result};
use roxmltree::{Document, Node};

use crate::{
    bundle::{Bundle, BundleEntity, EntityType, Folder, ROOT_FOLDER_ID, ROOT_FOLDER_NAME},
    error::ReadError,
    log_runtime,
    logging::{debug, warn},
    xml::{l7_child, l7_child_text, L7_NAMESPACE},
};

pub use dependencies::derive_dependency_graph;

/// One `<l7:Item>`
#[derive(Debug)]
pub(crate) struct Item<'a, 'input> {
    pub(crate) name: String,
    pub(crate) id: String,
    pub(crate) entity_type: EntityType,
    /// The element inside `<l7:Resource>`
    pub(crate) resource: Node<'a, 'input>,
}

impl<'a, 'input> Item<'a, 'input> {
    /// Read the item envelope. `Ok(None)` for types this tool skips.
    fn parse(node: Node<'a, 'input>) -> Result<Option<Self>> {
        let name = required_text(node, "Name", "Item")?;
        let type_name = required_text(node, "Type", &format!("item `{name}`"))?;
        let entity_type = match EntityType::from_str(&type_name) {
            Ok(t) => t,
            Err(e) => {
                warn!("skipping item `{name}`: {e}");
                return Ok(None);
            }
        };
        let id = required_text(node, "Id", &format!("item `{name}`"))?;
        let resource = l7_child(node, "Resource")
            .and_then(|r| r.children().find(|c| c.is_element()))
            .ok_or_else(|| ReadError::MissingElement {
                element: "Resource".to_owned(),
                context: format!("item `{name}`"),
            })?;
        Ok(Some(Self {
            name,
            id,
            entity_type,
            resource,
        }))
    }

    fn context(&self) -> String {
        format!("{} `{}`", self.entity_type, self.name)
    }

    /// The pass this item is read in
    fn pass(&self) -> u8 {
        match self.entity_type {
            EntityType::Folder => 0,
            EntityType::Policy | EntityType::Service | EntityType::StoredPassword => 1,
            _ => 2,
        }
    }
}

/// Parse a gateway bundle document.
pub fn read_bundle(xml: &str) -> Result<Bundle> {
    let doc = Document::parse(xml).context("parsing bundle XML")?;
    let root = doc.root_element();
    if !root.has_tag_name((L7_NAMESPACE, "Bundle")) {
        return Err(ReadError::MissingElement {
            element: "Bundle".to_owned(),
            context: "document root".to_owned(),
        }
        .into());
    }
    let references = l7_child(root, "References").ok_or_else(|| ReadError::MissingElement {
        element: "References".to_owned(),
        context: "Bundle".to_owned(),
    })?;

    let mut parsed = vec![];
    for node in references
        .children()
        .filter(|c| c.has_tag_name((L7_NAMESPACE, "Item")))
    {
        if let Some(item) = Item::parse(node)? {
            parsed.push(item);
        }
    }

    let mut bundle = Bundle::default();
    log_runtime!("reading bundle items", {
        for pass in 0..=2 {
            for item in parsed.iter().filter(|i| i.pass() == pass) {
                let entity = items::read_item(item, &bundle)
                    .with_context(|| format!("reading {}", item.context()))?;
                bundle.add(entity);
            }
            if pass == 0 {
                // bundles built for deployment only map the root folder
                if !bundle.folders.contains_key(ROOT_FOLDER_ID) {
                    bundle.add(BundleEntity::Folder(Folder {
                        id: ROOT_FOLDER_ID.to_owned(),
                        name: ROOT_FOLDER_NAME.to_owned(),
                        parent_folder_id: None,
                    }));
                }
                bundle.rebuild_folder_tree().context("reading folders")?;
            }
        }
    });
    debug!("read entities: {:?}", bundle.counts());

    bundle.dependency_graph = match l7_child(root, "DependencyGraph") {
        Some(graph) => dependencies::read_dependency_graph(graph),
        None => derive_dependency_graph(&bundle).context("deriving dependencies")?,
    };
    Ok(bundle)
}

/// Text of a required `l7` child
pub(crate) fn required_text(node: Node, local_name: &str, context: &str) -> Result<String> {
    l7_child_text(node, local_name)
        .map(str::to_owned)
        .ok_or_else(|| {
            ReadError::MissingElement {
                element: local_name.to_owned(),
                context: context.to_owned(),
            }
            .into()
        })
}

/// Text of an optional `l7` child
pub(crate) fn optional_text(node: Node, local_name: &str) -> Option<String> {
    l7_child_text(node, local_name).map(str::to_owned)
}

/// Parse the text of an optional `l7` child.
pub(crate) fn parsed_text<T: FromStr>(node: Node, local_name: &str) -> Result<Option<T>> {
    match l7_child_text(node, local_name) {
        None => Ok(None),
        Some(val) => val.trim().parse().map(Some).map_err(|_| {
            ReadError::InvalidValue {
                element: local_name.to_owned(),
                value: val.to_owned(),
            }
            .into()
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Wrap items in a bundle document
    pub(crate) fn bundle_xml(items: &str, extra: &str) -> String {
        format!(
            "<l7:Bundle xmlns:l7=\"{L7_NAMESPACE}\"><l7:References>{items}</l7:References>{extra}</l7:Bundle>"
        )
    }

    /// An item envelope
    pub(crate) fn item(name: &str, id: &str, entity_type: &str, resource: &str) -> String {
        format!(
            "<l7:Item><l7:Name>{name}</l7:Name><l7:Id>{id}</l7:Id>\
             <l7:Type>{entity_type}</l7:Type><l7:Resource>{resource}</l7:Resource></l7:Item>"
        )
    }

    pub(crate) fn folder_item(name: &str, id: &str, parent: Option<&str>) -> String {
        let parent = parent
            .map(|p| format!(" folderId=\"{p}\""))
            .unwrap_or_default();
        item(
            name,
            id,
            "FOLDER",
            &format!("<l7:Folder{parent} id=\"{id}\"><l7:Name>{name}</l7:Name></l7:Folder>"),
        )
    }

    pub(crate) fn root_item() -> String {
        folder_item("Root Node", ROOT_FOLDER_ID, None)
    }

    #[test]
    fn unknown_types_are_skipped() -> Result<()> {
        let xml = bundle_xml(
            &format!(
                "{}{}",
                root_item(),
                item("jms", "j1", "JMS_ENDPOINT", "<l7:JMSDestination id=\"j1\"/>")
            ),
            "",
        );
        let bundle = read_bundle(&xml)?;
        assert_eq!(bundle.folders.len(), 1);
        assert_eq!(bundle.counts().values().sum::<usize>(), 1);
        Ok(())
    }

    #[test]
    fn items_without_a_resource_are_schema_errors() {
        let xml = bundle_xml(
            "<l7:Item><l7:Name>p</l7:Name><l7:Id>1</l7:Id><l7:Type>CLUSTER_PROPERTY</l7:Type></l7:Item>",
            "",
        );
        let err = read_bundle(&xml).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ReadError>(),
            Some(&ReadError::MissingElement {
                element: "Resource".to_owned(),
                context: "item `p`".to_owned(),
            })
        );
    }

    #[test]
    fn the_root_folder_is_implied() -> Result<()> {
        let xml = bundle_xml(&folder_item("apis", "f1", Some(ROOT_FOLDER_ID)), "");
        let bundle = read_bundle(&xml)?;
        assert_eq!(bundle.folders.len(), 2);
        assert_eq!(bundle.folder_tree.path_by_id("f1").as_deref(), Some("apis"));
        Ok(())
    }

    #[test]
    fn documents_must_be_bundles() {
        let err = read_bundle(&format!("<l7:Item xmlns:l7=\"{L7_NAMESPACE}\"/>")).unwrap_err();
        assert!(err.downcast_ref::<ReadError>().is_some());
        assert!(read_bundle("<not xml").is_err());
    }
}
