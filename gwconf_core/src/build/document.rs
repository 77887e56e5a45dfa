use anyhow::Result;

use super::Entity;
use crate::xml::{property_element, Element, L7_NAMESPACE};

/// Assembles built entities into an `<l7:Bundle>` document.
///
/// Every entity gets a mapping, in input order. Only entities with XML get
/// an item.
#[derive(Clone, Copy, Debug, Default)]
pub struct BundleDocumentBuilder;

impl BundleDocumentBuilder {
    /// The bundle as an element tree
    pub fn build(&self, entities: &[Entity]) -> Element {
        let mut references = Element::l7("References");
        let mut mappings = Element::l7("Mappings");
        for entity in entities {
            if let Some(xml) = &entity.xml {
                references.push(item(entity, xml.clone()));
            }
            mappings.push(mapping(entity));
        }
        Element::l7("Bundle")
            .with_attr("xmlns:l7", L7_NAMESPACE)
            .with_child(references)
            .with_child(mappings)
    }

    /// The bundle as an indented XML document
    pub fn build_string(&self, entities: &[Entity]) -> Result<String> {
        self.build(entities).to_document_string()
    }
}

fn item(entity: &Entity, resource: Element) -> Element {
    Element::l7("Item")
        .with_child(Element::l7_text("Name", &entity.name))
        .with_child(Element::l7_text("Id", &entity.id))
        .with_child(Element::l7_text("Type", entity.entity_type.gateway_type()))
        .with_child(Element::l7("Resource").with_child(resource))
}

fn mapping(entity: &Entity) -> Element {
    let mut res = Element::l7("Mapping")
        .with_attr("action", entity.mapping_action.as_str())
        .with_attr("srcId", &entity.id)
        .with_attr("type", entity.entity_type.gateway_type());
    if !entity.mapping_properties.is_empty() {
        let mut properties = Element::l7("Properties");
        for (key, value) in &entity.mapping_properties {
            properties.push(property_element(key, value));
        }
        res.push(properties);
    }
    res
}
