//! Cross-entity references embedded in policy XML.
//!
//! In a project, a policy refers to another policy or an encass by path or
//! name:
//!
//! ```xml
//! <L7p:Include>
//!     <L7p:PolicyGuid policyPath="common/auth.xml"/>
//! </L7p:Include>
//! ```
//!
//! The gateway wants GUIDs instead (`<L7p:PolicyGuid stringValue="..."/>`).
//! The functions here find those references and rewrite them in either
//! direction. Everything else in the document is passed through untouched.

use std::borrow::Cow;

use anyhow::{Context, Result};
use quick_xml::{
    events::{BytesStart, Event},
    Reader, Writer,
};

/// The attribute the gateway uses for the GUID of a reference
pub const GUID_ATTRIBUTE: &str = "stringValue";

/// A kind of reference: which element carries it and which attribute holds
/// the human-readable form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceKind {
    /// Qualified element name
    pub element: &'static str,
    /// Attribute holding the path or name in project files
    pub attribute: &'static str,
}

/// `L7p:Include` of another policy, by path
pub const POLICY_INCLUDE: ReferenceKind = ReferenceKind {
    element: "L7p:PolicyGuid",
    attribute: "policyPath",
};

/// `L7p:Encapsulated` use of an encass, by name
pub const ENCASS_USE: ReferenceKind = ReferenceKind {
    element: "L7p:EncapsulatedAssertionConfigGuid",
    attribute: "encassName",
};

/// The human-readable references of a kind in a policy, in document order.
pub fn find_references(policy_xml: &str, kind: ReferenceKind) -> Result<Vec<String>> {
    find_attribute_values(policy_xml, kind.element, kind.attribute)
}

/// The GUID references of a kind in a policy, in document order.
pub fn find_guids(policy_xml: &str, kind: ReferenceKind) -> Result<Vec<String>> {
    find_attribute_values(policy_xml, kind.element, GUID_ATTRIBUTE)
}

/// Replace every human-readable reference with the GUID `resolve` returns.
pub fn references_to_guids<F>(policy_xml: &str, kind: ReferenceKind, mut resolve: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    rewrite_attribute(policy_xml, kind.element, kind.attribute, GUID_ATTRIBUTE, |v| {
        resolve(v).map(Some)
    })
}

/// Replace GUID references with human-readable ones. GUIDs `lookup` doesn't
/// know are left as they are.
pub fn guids_to_references<F>(policy_xml: &str, kind: ReferenceKind, mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Option<String>,
{
    rewrite_attribute(policy_xml, kind.element, GUID_ATTRIBUTE, kind.attribute, |v| {
        Ok(lookup(v))
    })
}

fn find_attribute_values(xml: &str, element: &str, attribute: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut res = vec![];
    loop {
        match reader.read_event().context("parsing policy XML")? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == element.as_bytes() => {
                if let Some(v) = attribute_value(&e, attribute)? {
                    res.push(v.into_owned());
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }
    Ok(res)
}

fn attribute_value<'a>(e: &'a BytesStart, attribute: &str) -> Result<Option<Cow<'a, str>>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == attribute.as_bytes() {
            return Ok(Some(attr.unescape_value()?));
        }
    }
    Ok(None)
}

/// Stream the document, swapping `from` for `to` on matching elements when
/// `replace` gives a new value.
fn rewrite_attribute<F>(xml: &str, element: &str, from: &str, to: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    loop {
        let event = reader.read_event().context("parsing policy XML")?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == element.as_bytes() => {
                let rewritten = match attribute_value(e, from)? {
                    Some(v) => replace(&v)?.map(|new| swap_attribute(e, from, to, &new)),
                    None => None,
                };
                match (rewritten, &event) {
                    (Some(Ok(new)), Event::Start(_)) => writer.write_event(Event::Start(new))?,
                    (Some(Ok(new)), _) => writer.write_event(Event::Empty(new))?,
                    (Some(Err(e)), _) => return Err(e),
                    (None, _) => writer.write_event(event.borrow())?,
                }
            }
            _ => writer.write_event(event)?,
        }
    }

    String::from_utf8(writer.into_inner()).context("rewritten policy is not UTF-8")
}

fn swap_attribute(e: &BytesStart, from: &str, to: &str, value: &str) -> Result<BytesStart<'static>> {
    let mut res = e.to_owned().into_owned();
    res.clear_attributes();
    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key == from.as_bytes() || key == to.as_bytes() {
            continue;
        }
        res.push_attribute(attr);
    }
    res.push_attribute((to, value));
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wsp:Policy xmlns:L7p="http://www.layer7tech.com/ws/policy" xmlns:wsp="http://schemas.xmlsoap.org/ws/2002/12/policy">
    <wsp:All wsp:Usage="Required">
        <L7p:Include>
            <L7p:PolicyGuid policyPath="common/auth.xml"/>
        </L7p:Include>
        <L7p:SetVariable>
            <L7p:Base64Expression stringValue="JHtyZXF1ZXN0fQ=="/>
        </L7p:SetVariable>
        <L7p:Encapsulated>
            <L7p:EncapsulatedAssertionConfigGuid encassName="Rate Limit"/>
        </L7p:Encapsulated>
    </wsp:All>
</wsp:Policy>"#;

    #[test]
    fn finds_references_by_kind() -> Result<()> {
        assert_eq!(find_references(POLICY, POLICY_INCLUDE)?, vec!["common/auth.xml"]);
        assert_eq!(find_references(POLICY, ENCASS_USE)?, vec!["Rate Limit"]);
        assert!(find_guids(POLICY, POLICY_INCLUDE)?.is_empty());
        Ok(())
    }

    #[test]
    fn rewrites_both_ways() -> Result<()> {
        let built = references_to_guids(POLICY, POLICY_INCLUDE, |path| {
            assert_eq!(path, "common/auth.xml");
            Ok("guid-1".to_owned())
        })?;
        assert!(built.contains(r#"<L7p:PolicyGuid stringValue="guid-1"/>"#));
        assert!(built.contains(r#"<L7p:Base64Expression stringValue="JHtyZXF1ZXN0fQ=="/>"#));
        assert_eq!(find_guids(&built, POLICY_INCLUDE)?, vec!["guid-1"]);

        let restored = guids_to_references(&built, POLICY_INCLUDE, |guid| {
            (guid == "guid-1").then(|| "common/auth.xml".to_owned())
        })?;
        assert_eq!(restored, POLICY);
        Ok(())
    }

    #[test]
    fn unknown_guids_are_left_alone() -> Result<()> {
        let xml = r#"<L7p:PolicyGuid stringValue="elsewhere"/>"#;
        assert_eq!(guids_to_references(xml, POLICY_INCLUDE, |_| None)?, xml);
        Ok(())
    }

    #[test]
    fn resolve_failures_propagate() {
        let res = references_to_guids(POLICY, POLICY_INCLUDE, |_| anyhow::bail!("nope"));
        assert!(res.is_err());
    }
}
