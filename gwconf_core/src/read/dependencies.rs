//! The dependency graph of a read bundle.
//!
//! Exports made with dependency analysis carry an `<l7:DependencyGraph>`,
//! which is used as-is. Without one, the graph is derived from the entities
//! themselves: include and encass GUIDs in policy documents, context
//! variables naming cluster properties and stored passwords, connection,
//! key and certificate names used by assertions, ids of identity providers,
//! certificates and generic entities, and the references entities make to
//! each other.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;
use roxmltree::Node;

use crate::{
    bundle::{
        Bundle, Dependency, DependencyGraph, EntityType, GatewayEntity, IdentityProvider,
        PropertyValue,
    },
    logging::debug,
    xml::{
        l7_child, l7_child_text,
        references::{find_guids, ENCASS_USE, POLICY_INCLUDE},
        L7_NAMESPACE,
    },
};

/// Read `<l7:DependencyGraph>`. Every dependency that lists its own
/// dependencies contributes its direct children.
pub(super) fn read_dependency_graph(node: Node) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    for entry in node
        .descendants()
        .filter(|n| n.has_tag_name((L7_NAMESPACE, "Dependency")))
    {
        let Some(children) = l7_child(entry, "Dependencies") else {
            continue;
        };
        let Some(from) = dependency(entry) else {
            continue;
        };
        for child in children
            .children()
            .filter(|n| n.has_tag_name((L7_NAMESPACE, "Dependency")))
        {
            if let Some(to) = dependency(child) {
                graph.add_edge(from.clone(), to);
            }
        }
    }
    graph
}

fn dependency(node: Node) -> Option<Dependency> {
    let id = l7_child_text(node, "Id")?;
    let type_name = l7_child_text(node, "Type")?;
    let entity_type = match type_name.parse::<EntityType>() {
        Ok(t) => t,
        Err(_) => {
            debug!("ignoring dependency on unsupported type {type_name}");
            return None;
        }
    };
    let res = Dependency::new(id, entity_type);
    Some(match l7_child_text(node, "Name") {
        Some(name) => res.with_name(name),
        None => res,
    })
}

/// Patterns that name other entities from inside a policy document
struct Scanner {
    context_variable: Regex,
    connection_name: Regex,
    key_alias: Regex,
    trusted_cert_name: Regex,
    trusted_cert_names: Regex,
    string_value: Regex,
    goid: Regex,
}

impl Scanner {
    fn new() -> Result<Self> {
        Ok(Self {
            context_variable: Regex::new(r"\$\{([^}]+)\}")?,
            connection_name: Regex::new(r#"<L7p:ConnectionName\s+stringValue="([^"]+)""#)?,
            key_alias: Regex::new(r#"<L7p:KeyAlias\s+stringValue="([^"]+)""#)?,
            trusted_cert_name: Regex::new(
                r#"<L7p:(?:Recipient)?TrustedCertificateName\s+stringValue="([^"]+)""#,
            )?,
            trusted_cert_names: Regex::new(
                r"(?s)<L7p:TlsTrustedCertNames\b[^>]*>(.*?)</L7p:TlsTrustedCertNames>",
            )?,
            string_value: Regex::new(r#"stringValue="([^"]+)""#)?,
            goid: Regex::new(r#"goidValue="([0-9A-Fa-f]+)""#)?,
        })
    }

    /// Names captured by `pattern`
    fn captures<'t>(pattern: &Regex, text: &'t str) -> Vec<&'t str> {
        pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect()
    }

    /// Cluster property and stored password references in `${..}` form
    fn variables(&self, bundle: &Bundle, text: &str) -> Vec<Dependency> {
        let mut res = vec![];
        for variable in Self::captures(&self.context_variable, text) {
            if let Some(name) = variable.strip_prefix("gateway.") {
                if let Some(p) = bundle.cluster_properties.get(name) {
                    res.push(p.dependency());
                }
            } else if let Some(rest) = variable.strip_prefix("secpass.") {
                let name = rest
                    .rsplit_once('.')
                    .map(|(name, _)| name)
                    .unwrap_or(rest);
                if let Some(p) = bundle.stored_passwords.get(name) {
                    res.push(p.dependency());
                }
            }
        }
        res
    }

    /// Trusted certs a policy document names
    fn trusted_certs(&self, bundle: &Bundle, text: &str) -> Vec<Dependency> {
        let listed = Self::captures(&self.trusted_cert_names, text)
            .into_iter()
            .flat_map(|block| Self::captures(&self.string_value, block));
        Self::captures(&self.trusted_cert_name, text)
            .into_iter()
            .chain(listed)
            .filter_map(|name| bundle.trusted_certs.get(name))
            .map(|c| c.dependency())
            .collect()
    }

    /// Everything a policy document references
    fn policy_references(
        &self,
        bundle: &Bundle,
        by_guid: &BTreeMap<&str, Dependency>,
        by_id: &BTreeMap<&str, Dependency>,
        policy_xml: &str,
    ) -> Result<Vec<Dependency>> {
        let mut res = vec![];
        for guid in find_guids(policy_xml, POLICY_INCLUDE)?
            .into_iter()
            .chain(find_guids(policy_xml, ENCASS_USE)?)
        {
            if let Some(d) = by_guid.get(guid.as_str()) {
                res.push(d.clone());
            }
        }
        res.extend(self.variables(bundle, policy_xml));
        for name in Self::captures(&self.connection_name, policy_xml) {
            if let Some(c) = bundle.jdbc_connections.get(name) {
                res.push(c.dependency());
            }
            if let Some(c) = bundle.cassandra_connections.get(name) {
                res.push(c.dependency());
            }
        }
        for alias in Self::captures(&self.key_alias, policy_xml) {
            if let Some(k) = bundle.private_keys.get(alias) {
                res.push(k.dependency());
            }
        }
        res.extend(self.trusted_certs(bundle, policy_xml));
        for goid in Self::captures(&self.goid, policy_xml) {
            if let Some(d) = by_id.get(goid) {
                res.push(d.clone());
            }
        }
        Ok(res)
    }

    /// Stored passwords and trusted certs an identity provider's settings
    /// name. Certificates may be listed by name or id, comma separated.
    fn identity_provider_references(
        &self,
        bundle: &Bundle,
        provider: &IdentityProvider,
    ) -> Vec<Dependency> {
        let mut res = vec![];
        for value in provider.properties.values() {
            let PropertyValue::String(value) = value else {
                continue;
            };
            res.extend(self.variables(bundle, value));
            for part in value.split(',').map(str::trim) {
                let cert = bundle
                    .trusted_certs
                    .get(part)
                    .or_else(|| bundle.trusted_certs.values().find(|c| c.id == part));
                if let Some(c) = cert {
                    res.push(c.dependency());
                }
            }
        }
        res
    }
}

/// Work out which entities reference which.
pub fn derive_dependency_graph(bundle: &Bundle) -> Result<DependencyGraph> {
    let scanner = Scanner::new()?;
    let mut graph = DependencyGraph::default();

    let mut by_guid: BTreeMap<&str, Dependency> = BTreeMap::new();
    for p in bundle.policies.values().filter(|p| !p.guid.is_empty()) {
        by_guid.insert(&p.guid, p.dependency());
    }
    for e in bundle.encasses.values().filter(|e| !e.guid.is_empty()) {
        by_guid.insert(&e.guid, e.dependency());
    }
    let by_id: BTreeMap<&str, Dependency> = bundle
        .identity_providers
        .values()
        .map(|p| (p.id.as_str(), p.dependency()))
        .chain(
            bundle
                .trusted_certs
                .values()
                .map(|c| (c.id.as_str(), c.dependency())),
        )
        .chain(
            bundle
                .generic_entities
                .values()
                .map(|g| (g.id.as_str(), g.dependency())),
        )
        .filter(|(id, _)| !id.is_empty())
        .collect();

    let documents = bundle
        .policies
        .values()
        .map(|p| (p.dependency(), p.path.as_str(), p.policy_xml.as_str()))
        .chain(
            bundle
                .services
                .values()
                .map(|s| (s.dependency(), s.path.as_str(), s.policy_xml.as_str())),
        );
    for (from, path, policy_xml) in documents {
        for to in scanner
            .policy_references(bundle, &by_guid, &by_id, policy_xml)
            .with_context(|| format!("scanning `{path}`"))?
        {
            graph.add_edge(from.clone(), to);
        }
    }

    let policy = |path: &str| bundle.policies.get(path).map(|p| p.dependency());
    for e in bundle.encasses.values() {
        if let Some(p) = policy(&e.policy) {
            graph.add_edge(e.dependency(), p);
        }
    }
    for pbs in bundle.policy_backed_services.values() {
        for p in pbs.operations.iter().filter_map(|o| policy(&o.policy)) {
            graph.add_edge(pbs.dependency(), p);
        }
    }
    for task in bundle.scheduled_tasks.values() {
        if let Some(p) = policy(&task.policy) {
            graph.add_edge(task.dependency(), p);
        }
    }
    for port in bundle.listen_ports.values() {
        if let Some(s) = port
            .target_service
            .as_ref()
            .and_then(|path| bundle.services.get(path))
        {
            graph.add_edge(port.dependency(), s.dependency());
        }
    }
    for c in bundle.jdbc_connections.values() {
        for p in c
            .password
            .iter()
            .flat_map(|password| scanner.variables(bundle, password))
        {
            graph.add_edge(c.dependency(), p);
        }
    }
    for c in bundle.cassandra_connections.values() {
        if let Some(p) = c
            .stored_password
            .as_ref()
            .and_then(|name| bundle.stored_passwords.get(name))
        {
            graph.add_edge(c.dependency(), p.dependency());
        }
    }

    for provider in bundle.identity_providers.values() {
        for to in scanner.identity_provider_references(bundle, provider) {
            graph.add_edge(provider.dependency(), to);
        }
    }

    debug!("derived {} dependency graph entries", graph.len());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundle::{
            BundleEntity, ClusterProperty, Encass, GenericEntity, JdbcConnection, Policy,
            StoredPassword, TrustedCert,
        },
        read::{read_bundle, tests::bundle_xml},
        xml::POLICY_NAMESPACE,
    };

    fn policy(id: &str, guid: &str, path: &str, body: &str) -> Policy {
        Policy {
            id: id.to_owned(),
            guid: guid.to_owned(),
            name: path.trim_end_matches(".xml").to_owned(),
            path: path.to_owned(),
            policy_xml: format!(
                "<wsp:Policy xmlns:L7p=\"{POLICY_NAMESPACE}\" \
                 xmlns:wsp=\"http://schemas.xmlsoap.org/ws/2002/12/policy\">\
                 <wsp:All wsp:Usage=\"Required\">{body}</wsp:All></wsp:Policy>"
            ),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_graphs_keep_direct_children_only() -> Result<()> {
        let graph = "<l7:DependencyGraph><l7:Dependencies>\
            <l7:Dependency><l7:Name>a</l7:Name><l7:Id>p1</l7:Id><l7:Type>POLICY</l7:Type>\
              <l7:Dependencies>\
                <l7:Dependency><l7:Name>b</l7:Name><l7:Id>p2</l7:Id><l7:Type>POLICY</l7:Type>\
                  <l7:Dependencies>\
                    <l7:Dependency><l7:Name>c</l7:Name><l7:Id>c1</l7:Id><l7:Type>CLUSTER_PROPERTY</l7:Type></l7:Dependency>\
                  </l7:Dependencies>\
                </l7:Dependency>\
                <l7:Dependency><l7:Name>q</l7:Name><l7:Id>q1</l7:Id><l7:Type>JMS_ENDPOINT</l7:Type></l7:Dependency>\
              </l7:Dependencies>\
            </l7:Dependency>\
            </l7:Dependencies></l7:DependencyGraph>";
        let bundle = read_bundle(&bundle_xml("", graph))?;
        let graph = bundle.dependency_graph;

        let p1 = Dependency::new("p1", EntityType::Policy);
        let p2 = Dependency::new("p2", EntityType::Policy);
        assert_eq!(graph.dependencies_of(&p1), &[p2.clone()]);
        assert_eq!(
            graph.dependencies_of(&p2),
            &[Dependency::new("c1", EntityType::ClusterProperty)]
        );
        assert_eq!(graph.len(), 2);
        Ok(())
    }

    #[test]
    fn derived_graphs_follow_guids_variables_and_names() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::Policy(policy(
            "p1",
            "g1",
            "main.xml",
            "<L7p:Include><L7p:PolicyGuid stringValue=\"g2\"/></L7p:Include>\
             <L7p:Encapsulated><L7p:EncapsulatedAssertionConfigGuid stringValue=\"eg\"/></L7p:Encapsulated>\
             <L7p:SetVariable><L7p:Base64Expression stringValue=\"${gateway.timeout}\"/></L7p:SetVariable>\
             <L7p:JdbcQuery><L7p:ConnectionName stringValue=\"orders-db\"/></L7p:JdbcQuery>",
        )));
        bundle.add(BundleEntity::Policy(policy("p2", "g2", "lib.xml", "")));
        bundle.add(BundleEntity::Encass(Encass {
            id: "e1".to_owned(),
            name: "limit".to_owned(),
            guid: "eg".to_owned(),
            policy: "lib.xml".to_owned(),
            ..Default::default()
        }));
        bundle.add(BundleEntity::ClusterProperty(ClusterProperty {
            id: "c1".to_owned(),
            name: "timeout".to_owned(),
            value: "30".to_owned(),
        }));
        bundle.add(BundleEntity::JdbcConnection(JdbcConnection {
            id: "j1".to_owned(),
            name: "orders-db".to_owned(),
            password: Some("${secpass.orders.plaintext}".to_owned()),
            ..Default::default()
        }));
        bundle.add(BundleEntity::StoredPassword(StoredPassword {
            id: "s1".to_owned(),
            name: "orders".to_owned(),
            ..Default::default()
        }));

        let graph = derive_dependency_graph(&bundle)?;
        let main = Dependency::new("p1", EntityType::Policy);
        assert_eq!(
            graph.dependencies_of(&main),
            &[
                Dependency::new("p2", EntityType::Policy),
                Dependency::new("e1", EntityType::Encass),
                Dependency::new("c1", EntityType::ClusterProperty),
                Dependency::new("j1", EntityType::JdbcConnection),
            ]
        );
        assert_eq!(
            graph.dependencies_of(&Dependency::new("e1", EntityType::Encass)),
            &[Dependency::new("p2", EntityType::Policy)]
        );
        assert_eq!(
            graph.dependencies_of(&Dependency::new("j1", EntityType::JdbcConnection)),
            &[Dependency::new("s1", EntityType::StoredPassword)]
        );
        Ok(())
    }

    #[test]
    fn derived_graphs_reach_providers_certificates_and_generic_entities() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::Policy(policy(
            "p1",
            "g1",
            "main.xml",
            "<L7p:Authentication><L7p:IdentityProviderOid goidValue=\"0a1d\"/></L7p:Authentication>\
             <L7p:HttpRoutingAssertion>\
               <L7p:TlsTrustedCertNames stringArrayValue=\"included\">\
                 <L7p:item stringValue=\"backend-ca\"/>\
               </L7p:TlsTrustedCertNames>\
             </L7p:HttpRoutingAssertion>\
             <L7p:RateLimit><L7p:ConfigGoid goidValue=\"6e6e\"/></L7p:RateLimit>",
        )));
        bundle.add(BundleEntity::IdentityProvider(IdentityProvider {
            id: "0a1d".to_owned(),
            name: "corp-ldap".to_owned(),
            properties: [
                ("bindPassword", "${secpass.ldap-bind.plaintext}"),
                ("certificateReferences", "ldap-ca, c2"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.into()))
            .collect(),
            ..Default::default()
        }));
        for (id, name) in [("c1", "backend-ca"), ("c2", "ldap-ca"), ("c3", "unused")] {
            bundle.add(BundleEntity::TrustedCert(TrustedCert {
                id: id.to_owned(),
                name: name.to_owned(),
                ..Default::default()
            }));
        }
        bundle.add(BundleEntity::StoredPassword(StoredPassword {
            id: "s1".to_owned(),
            name: "ldap-bind".to_owned(),
            ..Default::default()
        }));
        bundle.add(BundleEntity::GenericEntity(GenericEntity {
            id: "6e6e".to_owned(),
            name: "limits".to_owned(),
            ..Default::default()
        }));

        let graph = derive_dependency_graph(&bundle)?;
        let provider = Dependency::new("0a1d", EntityType::IdentityProvider);
        assert_eq!(
            graph.dependencies_of(&Dependency::new("p1", EntityType::Policy)),
            &[
                Dependency::new("c1", EntityType::TrustedCert),
                provider.clone(),
                Dependency::new("6e6e", EntityType::GenericEntity),
            ]
        );
        assert_eq!(
            graph.dependencies_of(&provider),
            &[
                Dependency::new("s1", EntityType::StoredPassword),
                Dependency::new("c2", EntityType::TrustedCert),
            ]
        );
        Ok(())
    }
}
