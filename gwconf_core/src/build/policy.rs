//! Policies, and the references between policies.
//!
//! Building policies happens in stages:
//!
//! 1. Every policy gets a GUID, and the include references in policies and
//!    services are resolved to policy paths. Rewriting them has to wait
//!    until every policy has its GUID.
//! 2. The deferred rewrites run, swapping paths and encass names for GUIDs.
//! 3. Policies are ordered so that each one comes after every policy it
//!    includes. The gateway deploys items in document order and rejects an
//!    include of a GUID it hasn't seen yet.
//! 4. The policy items are emitted in that order.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};

use super::{Entity, EntityBuilder, IdGenerator};
use crate::{
    bundle::{Bundle, EntityType, Policy, Properties, PropertyValue},
    error::EntityBuilderError,
    xml::{
        properties_element,
        references::{find_references, references_to_guids, ENCASS_USE, POLICY_INCLUDE},
        Element,
    },
};

/// Builds standalone policies, in include order.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyEntityBuilder;

/// Whose XML a deferred rewrite applies to
#[derive(Debug)]
enum Owner {
    Policy(String),
    Service(String),
}

/// A rewrite that can only run once every GUID is known.
#[derive(Debug)]
struct DeferredRewrite {
    owner: Owner,
    /// Include reference as written -> path of the included policy
    includes: BTreeMap<String, String>,
}

fn invalid_policy(path: &str, err: anyhow::Error) -> anyhow::Error {
    EntityBuilderError::InvalidPolicy {
        path: path.to_owned(),
        message: format!("{err:#}"),
    }
    .into()
}

impl DeferredRewrite {
    fn xml<'b>(&self, bundle: &'b Bundle) -> Option<(&'b str, &'b str)> {
        match &self.owner {
            Owner::Policy(path) => bundle
                .policies
                .get(path)
                .map(|p| (p.path.as_str(), p.policy_xml.as_str())),
            Owner::Service(path) => bundle
                .services
                .get(path)
                .map(|s| (s.path.as_str(), s.policy_xml.as_str())),
        }
    }

    fn run(self, bundle: &mut Bundle) -> Result<()> {
        let (path, xml) = self
            .xml(bundle)
            .ok_or_else(|| anyhow!("{:?} disappeared while building", self.owner))?;

        let rewritten = references_to_guids(xml, POLICY_INCLUDE, |reference| {
            self.includes
                .get(reference)
                .and_then(|target| bundle.policies.get(target))
                .map(|p| p.guid.to_owned())
                .ok_or_else(|| anyhow!("include of `{reference}` was never resolved"))
        })
        .and_then(|xml| {
            references_to_guids(&xml, ENCASS_USE, |name| {
                bundle
                    .encasses
                    .get(name)
                    .map(|e| e.guid.to_owned())
                    .ok_or_else(|| anyhow!("encass `{name}` was never resolved"))
            })
        })
        .map_err(|e| invalid_policy(path, e))?;

        match self.owner {
            Owner::Policy(path) => {
                if let Some(p) = bundle.policies.get_mut(&path) {
                    p.policy_xml = rewritten;
                }
            }
            Owner::Service(path) => {
                if let Some(s) = bundle.services.get_mut(&path) {
                    s.policy_xml = rewritten;
                }
            }
        }
        Ok(())
    }
}

/// Resolve the include and encass references of one policy document.
fn resolve_references(
    bundle: &Bundle,
    path: &str,
    xml: &str,
) -> Result<BTreeMap<String, String>> {
    let mut includes = BTreeMap::new();
    let references = find_references(xml, POLICY_INCLUDE).map_err(|e| invalid_policy(path, e))?;
    for reference in references {
        let target = bundle.resolve_policy(&reference, path)?;
        includes.insert(reference, target.path.to_owned());
    }
    let encasses = find_references(xml, ENCASS_USE).map_err(|e| invalid_policy(path, e))?;
    for name in encasses {
        if !bundle.encasses.contains_key(&name) {
            return Err(EntityBuilderError::MissingReference {
                entity_type: EntityType::Encass,
                reference: name,
                referrer: path.to_owned(),
            }
            .into());
        }
    }
    Ok(includes)
}

impl PolicyEntityBuilder {
    /// Give policies and encasses GUIDs, record policy includes, and rewrite
    /// references in policy and service XML to GUIDs.
    pub fn prepare(bundle: &mut Bundle, ids: &dyn IdGenerator) -> Result<()> {
        for encass in bundle.encasses.values_mut() {
            if encass.guid.is_empty() {
                encass.guid = ids.generate_guid();
            }
        }

        let mut deferred = vec![];
        let policy_paths: Vec<String> = bundle.policies.keys().cloned().collect();
        for path in policy_paths {
            let xml = &bundle.policies[&path].policy_xml;
            let includes = resolve_references(bundle, &path, xml)?;
            if let Some(policy) = bundle.policies.get_mut(&path) {
                if policy.guid.is_empty() {
                    policy.guid = ids.generate_guid();
                }
                policy.dependencies = includes.values().cloned().collect();
            }
            deferred.push(DeferredRewrite {
                owner: Owner::Policy(path),
                includes,
            });
        }

        let service_paths: Vec<String> = bundle.services.keys().cloned().collect();
        for path in service_paths {
            let xml = &bundle.services[&path].policy_xml;
            let includes = resolve_references(bundle, &path, xml)?;
            deferred.push(DeferredRewrite {
                owner: Owner::Service(path),
                includes,
            });
        }

        for rewrite in deferred {
            rewrite.run(bundle)?;
        }
        Ok(())
    }

    /// Standalone policies, each after every policy it includes.
    pub fn ordered(bundle: &Bundle) -> Result<Vec<&Policy>> {
        let mut placed = HashSet::new();
        let mut stack = vec![];
        let mut res = Vec::with_capacity(bundle.policies.len());
        for path in bundle.policies.keys() {
            visit(bundle, path, &mut stack, &mut placed, &mut res)?;
        }
        Ok(res)
    }
}

/// Post-order DFS. `stack` is the chain of includes being resolved.
fn visit<'b>(
    bundle: &'b Bundle,
    path: &str,
    stack: &mut Vec<String>,
    placed: &mut HashSet<String>,
    res: &mut Vec<&'b Policy>,
) -> Result<()> {
    if placed.contains(path) {
        return Ok(());
    }
    if let Some(start) = stack.iter().position(|p| p == path) {
        let mut cycle = stack[start..].to_vec();
        cycle.push(path.to_owned());
        return Err(EntityBuilderError::IncludeCycle { cycle }.into());
    }
    let policy = bundle
        .policies
        .get(path)
        .ok_or_else(|| EntityBuilderError::MissingReference {
            entity_type: EntityType::Policy,
            reference: path.to_owned(),
            referrer: stack.last().cloned().unwrap_or_default(),
        })?;

    stack.push(path.to_owned());
    for dependency in &policy.dependencies {
        visit(bundle, dependency, stack, placed, res)?;
    }
    stack.pop();

    placed.insert(path.to_owned());
    res.push(policy);
    Ok(())
}

/// `<l7:Resources>` holding a policy document
pub(crate) fn policy_resources(policy_xml: &str) -> Element {
    Element::l7("Resources").with_child(
        Element::l7("ResourceSet").with_attr("tag", "policy").with_child(
            Element::l7("Resource")
                .with_attr("type", "policy")
                .with_text(policy_xml),
        ),
    )
}

fn policy_element(policy: &Policy) -> Element {
    let mut properties = Properties::new();
    properties.insert("revision".to_owned(), PropertyValue::Integer(1));
    properties.insert("soap".to_owned(), PropertyValue::Boolean(false));
    if let Some(tag) = &policy.tag {
        properties.insert("tag".to_owned(), tag.as_str().into());
    }
    if let Some(subtag) = &policy.subtag {
        properties.insert("subtag".to_owned(), subtag.as_str().into());
    }

    Element::l7("Policy")
        .with_attr("guid", &policy.guid)
        .with_attr("id", &policy.id)
        .with_child(
            Element::l7("PolicyDetail")
                .with_attr("folderId", &policy.folder_id)
                .with_attr("guid", &policy.guid)
                .with_attr("id", &policy.id)
                .with_child(Element::l7_text("Name", &policy.name))
                .with_child(Element::l7_text(
                    "PolicyType",
                    policy.policy_type().to_string(),
                ))
                .with_optional_child(properties_element(&properties)),
        )
        .with_child(policy_resources(&policy.policy_xml))
}

impl EntityBuilder for PolicyEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::Policy
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        Ok(Self::ordered(bundle)?
            .into_iter()
            .map(|p| Entity::new(EntityType::Policy, &p.name, &p.id, policy_element(p)))
            .collect())
    }
}
