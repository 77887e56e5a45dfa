use std::{collections::BTreeSet, fs, path::Path};

use anyhow::Result;
use gwconf_core::{
    build::SequentialIdGenerator,
    bundle::EntityType,
    read::read_bundle,
    xml::references::{find_references, POLICY_INCLUDE},
    Gwconf,
};

const POLICY_NS: &str = "xmlns:L7p=\"http://www.layer7tech.com/ws/policy\" \
     xmlns:wsp=\"http://schemas.xmlsoap.org/ws/2002/12/policy\"";

fn write(root: &Path, path: &str, contents: &str) -> Result<()> {
    let path = root.join(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

fn source_project(root: &Path) -> Result<()> {
    write(
        root,
        "policy/common/auth.xml",
        &format!(
            "<wsp:Policy {POLICY_NS}><wsp:All wsp:Usage=\"Required\">\
             <L7p:AuditDetailAssertion><L7p:Detail stringValue=\"${{gateway.realm}}\"/></L7p:AuditDetailAssertion>\
             </wsp:All></wsp:Policy>"
        ),
    )?;
    write(
        root,
        "policy/apis/orders.xml",
        &format!(
            "<wsp:Policy {POLICY_NS}><wsp:All wsp:Usage=\"Required\">\
             <L7p:Include><L7p:PolicyGuid policyPath=\"common/auth.xml\"/></L7p:Include>\
             <L7p:SetVariable><L7p:Base64Expression stringValue=\"${{gateway.timeout}}\"/></L7p:SetVariable>\
             <L7p:HttpRoutingAssertion><L7p:TlsTrustedCertNames stringArrayValue=\"included\">\
             <L7p:item stringValue=\"backend-ca\"/></L7p:TlsTrustedCertNames></L7p:HttpRoutingAssertion>\
             </wsp:All></wsp:Policy>"
        ),
    )?;
    write(root, "config/services.yml", "apis/orders.xml:\n  url: /orders\n")?;
    write(root, "config/static.properties", "timeout=30\nrealm=internal\n")?;
    write(
        root,
        "config/certificates/backend-ca.pem",
        "-----BEGIN CERTIFICATE-----\nAAECAw==\n-----END CERTIFICATE-----\n",
    )?;
    Ok(())
}

/// Type and name of every item in a bundle document, for the types both
/// directions cover
fn items(xml: &str) -> Result<BTreeSet<(EntityType, String)>> {
    let bundle = read_bundle(xml)?;
    Ok(bundle
        .policies
        .values()
        .map(|p| (EntityType::Policy, p.path.to_owned()))
        .chain(
            bundle
                .services
                .values()
                .map(|s| (EntityType::Service, s.path.to_owned())),
        )
        .chain(
            bundle
                .cluster_properties
                .values()
                .map(|p| (EntityType::ClusterProperty, format!("{}={}", p.name, p.value))),
        )
        .chain(
            bundle
                .trusted_certs
                .values()
                .map(|c| (EntityType::TrustedCert, format!("{}={}", c.name, c.encoded))),
        )
        .collect())
}

#[test]
fn export_then_build_reproduces_the_items() -> Result<()> {
    let source = tempfile::tempdir()?;
    source_project(source.path())?;
    let built = Gwconf::new(source.path())?.build(&SequentialIdGenerator::default())?;

    let target = tempfile::tempdir()?;
    let exported = Gwconf::new(target.path())?.export(&built)?;
    assert_eq!(exported.policies.len(), 1);
    assert_eq!(exported.services.len(), 1);
    assert_eq!(exported.cluster_properties.len(), 2);
    assert_eq!(exported.trusted_certs.len(), 1);
    assert!(target
        .path()
        .join("config/certificates/backend-ca.pem")
        .is_file());

    let orders = fs::read_to_string(target.path().join("policy/apis/orders.xml"))?;
    assert_eq!(
        find_references(&orders, POLICY_INCLUDE)?,
        vec!["common/auth.xml"]
    );

    let rebuilt = Gwconf::new(target.path())?.build(&SequentialIdGenerator::default())?;
    let expected = items(&built)?;
    assert_eq!(expected.len(), 5);
    assert_eq!(items(&rebuilt)?, expected);
    Ok(())
}

#[test]
fn exporting_a_subtree_keeps_only_what_it_uses() -> Result<()> {
    let source = tempfile::tempdir()?;
    source_project(source.path())?;
    let built = Gwconf::new(source.path())?.build(&SequentialIdGenerator::default())?;

    let target = tempfile::tempdir()?;
    let mut gwconf = Gwconf::new(target.path())?;
    gwconf.config.export.folder_path = "/common".to_owned();
    let exported = gwconf.export(&built)?;

    assert!(exported.services.is_empty());
    assert!(exported.trusted_certs.is_empty());
    assert_eq!(
        exported.cluster_properties.keys().collect::<Vec<_>>(),
        vec!["realm"]
    );
    assert!(target.path().join("policy/common/auth.xml").is_file());
    assert!(!target.path().join("policy/apis").exists());
    Ok(())
}

#[test]
fn missing_export_folders_are_errors() -> Result<()> {
    let source = tempfile::tempdir()?;
    source_project(source.path())?;
    let built = Gwconf::new(source.path())?.build(&SequentialIdGenerator::default())?;

    let target = tempfile::tempdir()?;
    let mut gwconf = Gwconf::new(target.path())?;
    gwconf.config.export.folder_path = "/nope".to_owned();
    let err = gwconf.export(&built).unwrap_err();
    assert!(format!("{err:#}").contains("nope"));
    Ok(())
}
