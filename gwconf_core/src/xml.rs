//! XML plumbing.
//!
//! Gateway bundles are read with `roxmltree` (see [`crate::read`]). Everything
//! this crate writes goes through the small owned [`Element`] tree below and
//! is serialized with a `quick_xml` writer.

pub mod references;

use std::io::Write;

use anyhow::{Context, Result};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::bundle::{Properties, PropertyValue};

/// Gateway management namespace
pub const L7_NAMESPACE: &str = "http://ns.l7tech.com/2010/04/gateway-management";
/// Namespace of policy assertions
pub const POLICY_NAMESPACE: &str = "http://www.layer7tech.com/ws/policy";
/// WS-Policy namespace, the root of every policy document
pub const WSP_NAMESPACE: &str = "http://schemas.xmlsoap.org/ws/2002/12/policy";

/// A child of an [`Element`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// A nested element
    Element(Element),
    /// Character data. Escaped on write.
    Text(String),
}

/// An owned XML element. Names are written as given, prefix included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    /// Qualified name, e.g. `l7:Item`
    pub name: String,
    /// Attributes, in write order
    pub attributes: Vec<(String, String)>,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Element {
    /// An empty element
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// An empty element in the `l7` namespace
    pub fn l7(local_name: &str) -> Self {
        Self::new(format!("l7:{local_name}"))
    }

    /// `<l7:{local_name}>{text}</l7:{local_name}>`
    pub fn l7_text<S: Into<String>>(local_name: &str, text: S) -> Self {
        Self::l7(local_name).with_text(text)
    }

    /// Builder-style attribute
    pub fn with_attr<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder-style child element
    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    /// Builder-style optional child element
    pub fn with_optional_child(self, child: Option<Element>) -> Self {
        match child {
            Some(c) => self.with_child(c),
            None => self,
        }
    }

    /// Builder-style text content
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Append a child element
    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Value of an attribute
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated text content of direct children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Write this element and its subtree.
    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attributes {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(writer)?,
                Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
            }
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    /// Serialize as a standalone, indented document.
    pub fn to_document_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
        self.write_to(&mut writer)
            .with_context(|| format!("writing element {}", self.name))?;
        String::from_utf8(writer.into_inner()).context("XML output is not UTF-8")
    }
}

/// `<l7:Properties>` for a property bag, or `None` if the bag is empty.
pub fn properties_element(properties: &Properties) -> Option<Element> {
    if properties.is_empty() {
        return None;
    }
    let mut res = Element::l7("Properties");
    for (key, value) in properties {
        res.push(property_element(key, value));
    }
    Some(res)
}

/// A single `<l7:Property key="..">` with a typed value
pub fn property_element(key: &str, value: &PropertyValue) -> Element {
    let value = match value {
        PropertyValue::Boolean(b) => Element::l7_text("BooleanValue", b.to_string()),
        PropertyValue::Integer(i) => Element::l7_text("IntegerValue", i.to_string()),
        PropertyValue::String(s) => Element::l7_text("StringValue", s.as_str()),
    };
    Element::l7("Property").with_attr("key", key).with_child(value)
}

/// Read a `<l7:Properties>` element into a property bag. Unknown value
/// elements are ignored.
pub fn read_properties(node: roxmltree::Node) -> Properties {
    let mut res = Properties::new();
    for property in node.children().filter(|c| c.has_tag_name((L7_NAMESPACE, "Property"))) {
        let Some(key) = property.attribute("key") else {
            continue;
        };
        let Some(value) = property.children().find(|c| c.is_element()) else {
            continue;
        };
        let text = value.text().unwrap_or_default();
        let parsed = match value.tag_name().name() {
            "BooleanValue" => PropertyValue::Boolean(text.trim() == "true"),
            "IntegerValue" | "LongValue" => match text.trim().parse() {
                Ok(i) => PropertyValue::Integer(i),
                Err(_) => PropertyValue::String(text.to_owned()),
            },
            "StringValue" => PropertyValue::String(text.to_owned()),
            _ => continue,
        };
        res.insert(key.to_owned(), parsed);
    }
    res
}

/// First child element with the given local name in the `l7` namespace
pub fn l7_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|c| c.has_tag_name((L7_NAMESPACE, local_name)))
}

/// Text of the named `l7` child, if present
pub fn l7_child_text<'a>(node: roxmltree::Node<'a, '_>, local_name: &str) -> Option<&'a str> {
    l7_child(node, local_name).and_then(|c| c.text())
}
