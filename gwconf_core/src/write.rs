//! # Writing
//!
//! Write a (usually filtered) bundle out as a project directory.
//!
//! Every file that already exists is merged with the new content rather
//! than replaced, see [`merge`]. Map files keep whatever format they're
//! already in; new ones are written in the writer's format.

mod merge;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::{
    bundle::{Bundle, EntityType, GatewayEntity},
    load::{map_stem, PolicyConfig},
    log_runtime,
    logging::{debug, info},
    project::{self, clean_string_for_path, ConfigFormat, POLICIES_CFG},
    properties::{self, PropertyMap},
    xml::references::{guids_to_references, ENCASS_USE, POLICY_INCLUDE},
};

/// Width of the base64 lines in written PEM files
const PEM_LINE_WIDTH: usize = 64;

/// Writes bundles into one project directory.
pub struct ProjectWriter {
    root: PathBuf,
    format: ConfigFormat,
}

impl ProjectWriter {
    /// Basic constructor. `format` is used for map files that don't exist
    /// yet.
    pub fn new<P: AsRef<Path>>(root: P, format: ConfigFormat) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            format,
        }
    }

    /// Write every entity in the bundle.
    pub fn write(&self, bundle: &Bundle) -> Result<()> {
        log_runtime!("writing project", {
            self.write_folders(bundle)?;
            self.write_policies(bundle)?;

            self.write_entities(&bundle.encasses)?;
            self.write_entities(&bundle.policy_backed_services)?;
            self.write_entities(&bundle.listen_ports)?;
            self.write_entities(&bundle.jdbc_connections)?;
            self.write_entities(&bundle.cassandra_connections)?;
            self.write_entities(&bundle.identity_providers)?;
            self.write_entities(&bundle.scheduled_tasks)?;
            self.write_entities(&bundle.private_keys)?;
            self.write_trusted_certs(bundle)?;
            self.write_generic_entities(bundle)?;
            self.write_properties(bundle)?;
        });
        info!("wrote project to {:?}", self.root);
        Ok(())
    }

    /// One directory per folder, so empty folders survive.
    fn write_folders(&self, bundle: &Bundle) -> Result<()> {
        let policy_dir = project::policy_dir(&self.root);
        for folder in bundle.folder_tree.top_down() {
            let path = bundle.folder_tree.path(folder);
            let dir = path
                .split('/')
                .filter(|s| !s.is_empty())
                .fold(policy_dir.to_owned(), |acc, s| acc.join(s));
            fs::create_dir_all(&dir).with_context(|| format!("creating {dir:?}"))?;
        }
        Ok(())
    }

    /// Policy and service bodies, plus the service and policy tag maps.
    fn write_policies(&self, bundle: &Bundle) -> Result<()> {
        let policy_paths: BTreeMap<&str, &str> = bundle
            .policies
            .values()
            .filter(|p| !p.guid.is_empty())
            .map(|p| (p.guid.as_str(), p.path.as_str()))
            .collect();
        let encass_names: BTreeMap<&str, &str> = bundle
            .encasses
            .values()
            .filter(|e| !e.guid.is_empty())
            .map(|e| (e.guid.as_str(), e.name.as_str()))
            .collect();
        let restore = |path: &str, xml: &str| -> Result<String> {
            let xml = guids_to_references(xml, POLICY_INCLUDE, |guid| {
                policy_paths.get(guid).map(|p| p.to_string())
            })?;
            guids_to_references(&xml, ENCASS_USE, |guid| {
                encass_names.get(guid).map(|n| n.to_string())
            })
            .with_context(|| format!("restoring references in `{path}`"))
        };

        let documents = bundle
            .policies
            .values()
            .map(|p| (p.path.as_str(), p.policy_xml.as_str()))
            .chain(
                bundle
                    .services
                    .values()
                    .map(|s| (s.path.as_str(), s.policy_xml.as_str())),
            );
        for (path, xml) in documents {
            let file = project::policy_dir(&self.root).join(path);
            write_file(&file, &restore(path, xml)?)?;
        }

        self.write_map(map_stem(EntityType::Service)?, &bundle.services)?;
        let tags: BTreeMap<&str, PolicyConfig> = bundle
            .policies
            .values()
            .filter_map(|p| {
                p.tag.as_ref().map(|tag| {
                    (
                        p.path.as_str(),
                        PolicyConfig {
                            tag: tag.to_owned(),
                            subtag: p.subtag.to_owned(),
                        },
                    )
                })
            })
            .collect();
        self.write_map(POLICIES_CFG, &tags)
    }

    fn write_entities<T: GatewayEntity + Serialize>(
        &self,
        entities: &BTreeMap<String, T>,
    ) -> Result<()> {
        self.write_map(map_stem(T::ENTITY_TYPE)?, entities)
    }

    fn write_trusted_certs(&self, bundle: &Bundle) -> Result<()> {
        let dir = project::certificates_dir(&self.root);
        for cert in bundle.trusted_certs.values() {
            let file = dir.join(format!("{}.pem", clean_string_for_path(&cert.name)));
            write_file(&file, &pem(&cert.encoded))?;
        }
        self.write_entities(&bundle.trusted_certs)
    }

    fn write_generic_entities(&self, bundle: &Bundle) -> Result<()> {
        let dir = project::generic_entities_dir(&self.root);
        for entity in bundle.generic_entities.values() {
            let file = dir
                .join(clean_string_for_path(&entity.entity_class_name))
                .join(format!(
                    "{}.{}",
                    clean_string_for_path(&entity.name),
                    self.format.extension()
                ));
            self.write_document(&file, self.format, entity)?;
        }
        Ok(())
    }

    fn write_properties(&self, bundle: &Bundle) -> Result<()> {
        let cluster_properties: PropertyMap = bundle
            .cluster_properties
            .values()
            .map(|p| (p.name.to_owned(), p.value.to_owned()))
            .collect();
        write_properties_file(&project::static_properties_path(&self.root), cluster_properties)?;

        let environment: PropertyMap = bundle
            .environment_properties
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        write_properties_file(&project::env_properties_path(&self.root), environment)?;

        let passwords: PropertyMap = bundle
            .stored_passwords
            .values()
            .map(|p| (p.name.to_owned(), p.password.to_owned()))
            .collect();
        write_properties_file(&project::stored_passwords_path(&self.root), passwords)
    }

    /// Merge a map into its file, creating the file if needed. Empty maps
    /// don't create files.
    fn write_map<K: Serialize + Ord, T: Serialize>(
        &self,
        stem: &str,
        entities: &BTreeMap<K, T>,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let config_dir = project::config_dir(&self.root);
        let (file, format) = match project::find_config_file(&config_dir, stem)? {
            Some(existing) => existing,
            None => (
                project::config_file_path(&self.root, stem, self.format),
                self.format,
            ),
        };
        debug!("writing {} entries to {file:?}", entities.len());
        self.write_document(&file, format, entities)
    }

    /// Serialize a value into `file`, merged with what's already there.
    fn write_document<T: Serialize + ?Sized>(
        &self,
        file: &Path,
        format: ConfigFormat,
        val: &T,
    ) -> Result<()> {
        let new = serde_json::to_value(val).context("serializing config")?;
        let merged = if file.is_file() {
            let existing = fs::read_to_string(file).with_context(|| format!("reading {file:?}"))?;
            let existing: Value = format
                .parse(&existing)
                .with_context(|| format!("parsing {file:?}"))?;
            merge::merge_values(existing, new)
        } else {
            new
        };
        write_file(file, &format.render(&merged)?)
    }
}

fn write_properties_file(file: &Path, properties: PropertyMap) -> Result<()> {
    if properties.is_empty() {
        return Ok(());
    }
    let merged = merge::merge_properties(properties::read(file)?, properties);
    write_file(file, &properties::render(&merged))
}

fn write_file(file: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
    }
    fs::write(file, contents).with_context(|| format!("writing {file:?}"))
}

/// Wrap base64 DER in a PEM envelope.
fn pem(encoded: &str) -> String {
    let body: Vec<char> = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let mut res = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in body.chunks(PEM_LINE_WIDTH) {
        res.extend(line);
        res.push('\n');
    }
    res.push_str("-----END CERTIFICATE-----\n");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build::SequentialIdGenerator,
        bundle::{
            BundleEntity, ClusterProperty, Encass, Folder, Policy, Service, TrustedCert,
            ROOT_FOLDER_ID, ROOT_FOLDER_NAME,
        },
        load::load_project,
        xml::references::find_references,
    };

    fn sample_bundle() -> Result<Bundle> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::Folder(Folder {
            id: ROOT_FOLDER_ID.to_owned(),
            name: ROOT_FOLDER_NAME.to_owned(),
            parent_folder_id: None,
        }));
        bundle.add(BundleEntity::Folder(Folder {
            id: "f1".to_owned(),
            name: "common".to_owned(),
            parent_folder_id: Some(ROOT_FOLDER_ID.to_owned()),
        }));
        bundle.add(BundleEntity::Folder(Folder {
            id: "f2".to_owned(),
            name: "empty".to_owned(),
            parent_folder_id: Some(ROOT_FOLDER_ID.to_owned()),
        }));
        bundle.add(BundleEntity::Policy(Policy {
            id: "p1".to_owned(),
            guid: "g-auth".to_owned(),
            name: "auth".to_owned(),
            path: "common/auth.xml".to_owned(),
            folder_id: "f1".to_owned(),
            policy_xml: "<wsp:Policy/>".to_owned(),
            tag: Some("message-received".to_owned()),
            ..Default::default()
        }));
        bundle.add(BundleEntity::Service(Service {
            id: "s1".to_owned(),
            name: "orders".to_owned(),
            path: "orders.xml".to_owned(),
            folder_id: ROOT_FOLDER_ID.to_owned(),
            policy_xml: "<wsp:Policy><L7p:Include><L7p:PolicyGuid stringValue=\"g-auth\"/></L7p:Include>\
                <L7p:Encapsulated><L7p:EncapsulatedAssertionConfigGuid stringValue=\"g-limit\"/></L7p:Encapsulated>\
                </wsp:Policy>"
                .to_owned(),
            url: "/orders".to_owned(),
            enabled: true,
            ..Default::default()
        }));
        bundle.add(BundleEntity::Encass(Encass {
            id: "e1".to_owned(),
            name: "limit".to_owned(),
            guid: "g-limit".to_owned(),
            policy: "common/auth.xml".to_owned(),
            ..Default::default()
        }));
        bundle.add(BundleEntity::ClusterProperty(ClusterProperty {
            id: "c1".to_owned(),
            name: "gateway.timeout".to_owned(),
            value: "30".to_owned(),
        }));
        bundle.add(BundleEntity::TrustedCert(TrustedCert {
            id: "t1".to_owned(),
            name: "ca".to_owned(),
            encoded: "AAECAw==".to_owned(),
            ..Default::default()
        }));
        bundle.rebuild_folder_tree()?;
        Ok(bundle)
    }

    #[test]
    fn written_projects_load_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        ProjectWriter::new(dir.path(), ConfigFormat::Yaml).write(&sample_bundle()?)?;

        assert!(dir.path().join("policy/empty").is_dir());
        assert!(dir.path().join("config/services.yml").is_file());

        let service_xml = fs::read_to_string(dir.path().join("policy/orders.xml"))?;
        assert_eq!(
            find_references(&service_xml, POLICY_INCLUDE)?,
            vec!["common/auth.xml"]
        );
        assert_eq!(find_references(&service_xml, ENCASS_USE)?, vec!["limit"]);

        let loaded = load_project(dir.path(), &SequentialIdGenerator::default())?;
        assert_eq!(loaded.services["orders.xml"].url, "/orders");
        assert_eq!(
            loaded.policies["common/auth.xml"].tag.as_deref(),
            Some("message-received")
        );
        assert_eq!(loaded.encasses["limit"].guid, "g-limit");
        assert_eq!(loaded.cluster_properties["gateway.timeout"].value, "30");
        assert_eq!(loaded.trusted_certs["ca"].encoded, "AAECAw==");
        assert_eq!(loaded.folders.len(), 3);
        Ok(())
    }

    #[test]
    fn existing_files_are_merged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("config");
        fs::create_dir_all(&config)?;
        fs::write(
            config.join("services.json"),
            r#"{"legacy.xml": {"url": "/legacy"}, "orders.xml": {"url": "/old", "enabled": false}}"#,
        )?;
        fs::write(config.join("static.properties"), "kept=1\ngateway.timeout=10\n")?;

        ProjectWriter::new(dir.path(), ConfigFormat::Yaml).write(&sample_bundle()?)?;

        assert!(!config.join("services.yml").exists());
        let services: Value = serde_json::from_str(&fs::read_to_string(config.join("services.json"))?)?;
        assert_eq!(services["legacy.xml"]["url"], "/legacy");
        assert_eq!(services["orders.xml"]["url"], "/orders");
        assert_eq!(services["orders.xml"]["enabled"], false);

        let properties = properties::read(config.join("static.properties"))?;
        assert_eq!(properties["kept"], "1");
        assert_eq!(properties["gateway.timeout"], "30");
        Ok(())
    }

    #[test]
    fn pem_lines_are_wrapped() {
        let encoded = "A".repeat(100);
        let pem = pem(&encoded);
        let lines: Vec<_> = pem.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1].len(), PEM_LINE_WIDTH);
        assert_eq!(lines[2].len(), 36);
    }
}
