//! # Loading
//!
//! Read a project directory into a [`Bundle`] ready to build.
//!
//! Folders are derived from the directories under `policy/` and get their
//! ids here, since policies and services refer to their folder by id. Every
//! other id is left empty for the builder to assign.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    build::IdGenerator,
    bundle::{
        Bundle, BundleEntity, CassandraConnection, ClusterProperty, Encass, EntityType, Folder,
        GatewayEntity, GenericEntity, IdentityProvider, JdbcConnection, ListenPort, Policy,
        PolicyBackedService, PrivateKey, ScheduledTask, Service, StoredPassword, TrustedCert,
        ROOT_FOLDER_ID, ROOT_FOLDER_NAME,
    },
    error::ReadError,
    log_runtime,
    logging::debug,
    project::{self, ConfigFormat, CERTIFICATE_EXTENSIONS, POLICIES_CFG},
    properties,
};

/// Tag and subtag of a global or internal policy, as stored in
/// `policies.yml`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy tag
    pub tag: String,
    /// Subtag, for tags that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtag: Option<String>,
}

/// Load a whole project.
pub fn load_project<P: AsRef<Path>>(project_path: P, ids: &dyn IdGenerator) -> Result<Bundle> {
    let root = project_path.as_ref();
    if !root.is_dir() {
        bail!("project directory {root:?} does not exist");
    }
    let config_dir = project::config_dir(root);
    let mut bundle = Bundle::default();

    log_runtime!("loading project", {
        let folders = load_folders(root, ids, &mut bundle)?;
        load_policies(root, &config_dir, &folders, &mut bundle)?;

        load_named::<Encass, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<PolicyBackedService, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<ListenPort, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<JdbcConnection, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<CassandraConnection, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<IdentityProvider, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_named::<ScheduledTask, _>(&config_dir, &mut bundle, |e, n| e.name = n)?;
        load_trusted_certs(root, &config_dir, &mut bundle)?;
        load_private_keys(root, &config_dir, &mut bundle)?;
        load_generic_entities(root, &mut bundle)?;
        load_properties(root, &mut bundle)?;
    });

    bundle.rebuild_folder_tree().context("building the folder tree")?;
    debug!("loaded entities: {:?}", bundle.counts());
    Ok(bundle)
}

/// Paths under `dir` matching `pattern`, sorted
fn glob_paths(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut res = glob::glob(&full)
        .context("trouble generating config file paths")?
        .collect::<Result<Vec<_>, _>>()?;
    res.sort();
    Ok(res)
}

/// `/`-separated path of `path` relative to `base`
fn relative(path: &Path, base: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{path:?} is not under {base:?}"))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Every directory under `policy/` is a folder. Returns folder ids by path.
fn load_folders(
    root: &Path,
    ids: &dyn IdGenerator,
    bundle: &mut Bundle,
) -> Result<BTreeMap<String, String>> {
    let mut by_path = BTreeMap::new();
    by_path.insert(String::new(), ROOT_FOLDER_ID.to_owned());
    bundle.add(BundleEntity::Folder(Folder {
        id: ROOT_FOLDER_ID.to_owned(),
        name: ROOT_FOLDER_NAME.to_owned(),
        parent_folder_id: None,
    }));

    let policy_dir = project::policy_dir(root);
    if !policy_dir.is_dir() {
        return Ok(by_path);
    }
    // sorted, so parents come before their children
    for dir in glob_paths(&policy_dir, "**/*")?
        .into_iter()
        .filter(|p| p.is_dir())
    {
        let path = relative(&dir, &policy_dir)?;
        let (parent, name) = match path.rsplit_once('/') {
            Some((parent, name)) => (parent.to_owned(), name.to_owned()),
            None => (String::new(), path.to_owned()),
        };
        let parent_id = by_path
            .get(&parent)
            .cloned()
            .with_context(|| format!("no folder for `{parent}`"))?;
        let id = ids.generate_id();
        by_path.insert(path, id.to_owned());
        bundle.add(BundleEntity::Folder(Folder {
            id,
            name,
            parent_folder_id: Some(parent_id),
        }));
    }
    Ok(by_path)
}

/// Read a map file, if there is one. An entry with nothing but defaults is
/// written as a bare key and reads back as the default value.
fn read_map<T>(config_dir: &Path, stem: &str) -> Result<BTreeMap<String, T>>
where
    T: DeserializeOwned + Default,
{
    let Some((path, format)) = project::find_config_file(config_dir, stem)? else {
        return Ok(BTreeMap::new());
    };
    let val = fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
    let entries: BTreeMap<String, Option<T>> = format
        .parse(&val)
        .with_context(|| format!("parsing {path:?}"))?;
    Ok(entries
        .into_iter()
        .map(|(name, entry)| (name, entry.unwrap_or_default()))
        .collect())
}

/// Stem of the map file for an entity type
pub(crate) fn map_stem(entity_type: EntityType) -> Result<&'static str> {
    project::config_file_stem(entity_type)
        .with_context(|| format!("{entity_type} entities aren't kept in a map file"))
}

/// Load a map file whose keys are entity names.
fn load_named<T, F>(config_dir: &Path, bundle: &mut Bundle, set_name: F) -> Result<()>
where
    T: DeserializeOwned + Default + GatewayEntity,
    F: Fn(&mut T, String),
{
    for (name, mut entity) in read_map::<T>(config_dir, map_stem(T::ENTITY_TYPE)?)? {
        set_name(&mut entity, name);
        bundle.add(entity.into_bundle_entity());
    }
    Ok(())
}

/// Every `*.xml` under `policy/` is a policy, unless `services` names its
/// path.
fn load_policies(
    root: &Path,
    config_dir: &Path,
    folders: &BTreeMap<String, String>,
    bundle: &mut Bundle,
) -> Result<()> {
    let mut services: BTreeMap<String, Service> =
        read_map(config_dir, map_stem(EntityType::Service)?)?;
    let mut policy_configs: BTreeMap<String, PolicyConfig> = read_map(config_dir, POLICIES_CFG)?;

    let policy_dir = project::policy_dir(root);
    let files = if policy_dir.is_dir() {
        glob_paths(&policy_dir, "**/*.xml")?
    } else {
        vec![]
    };
    for file in files.into_iter().filter(|p| p.is_file()) {
        let path = relative(&file, &policy_dir)?;
        let folder_path = path.rsplit_once('/').map(|(f, _)| f).unwrap_or_default();
        let folder_id = folders
            .get(folder_path)
            .cloned()
            .with_context(|| format!("no folder for `{path}`"))?;
        let policy_xml =
            fs::read_to_string(&file).with_context(|| format!("reading {file:?}"))?;
        let name = file_stem(&file);

        match services.remove(&path) {
            Some(service) => bundle.add(BundleEntity::Service(Service {
                name,
                path,
                folder_id,
                policy_xml,
                ..service
            })),
            None => {
                let config = policy_configs.remove(&path);
                bundle.add(BundleEntity::Policy(Policy {
                    name,
                    folder_id,
                    policy_xml,
                    tag: config.as_ref().map(|c| c.tag.to_owned()),
                    subtag: config.and_then(|c| c.subtag),
                    path,
                    ..Default::default()
                }))
            }
        }
    }

    if let Some(path) = services.keys().next() {
        bail!("service `{path}` has no policy file");
    }
    if let Some(path) = policy_configs.keys().next() {
        bail!("policy config for `{path}` has no policy file");
    }
    Ok(())
}

/// Base64 DER of a certificate file, PEM or binary.
fn certificate_der(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {path:?}"))?;
    if let Ok(text) = std::str::from_utf8(&bytes) {
        if let Some(start) = text.find("-----BEGIN CERTIFICATE-----") {
            let body = &text[start + "-----BEGIN CERTIFICATE-----".len()..];
            let end = body
                .find("-----END CERTIFICATE-----")
                .with_context(|| format!("unterminated certificate in {path:?}"))?;
            let encoded: String = body[..end].split_whitespace().collect();
            base64::decode(&encoded)
                .with_context(|| format!("invalid certificate in {path:?}"))?;
            return Ok(encoded);
        }
    }
    Ok(base64::encode(bytes))
}

fn load_trusted_certs(root: &Path, config_dir: &Path, bundle: &mut Bundle) -> Result<()> {
    let mut configs: BTreeMap<String, TrustedCert> =
        read_map(config_dir, map_stem(EntityType::TrustedCert)?)?;
    let dir = project::certificates_dir(root);
    let files = if dir.is_dir() {
        glob_paths(&dir, "*")?
    } else {
        vec![]
    };
    for file in files.into_iter().filter(|p| p.is_file()) {
        let extension = file
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !CERTIFICATE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ReadError::InvalidValue {
                element: "certificate file".to_owned(),
                value: file.to_string_lossy().into_owned(),
            }
            .into());
        }
        let name = file_stem(&file);
        let config = configs.remove(&name).unwrap_or_default();
        bundle.add(BundleEntity::TrustedCert(TrustedCert {
            encoded: certificate_der(&file)?,
            name,
            ..config
        }));
    }
    if let Some(name) = configs.keys().next() {
        bail!("trusted cert `{name}` has no certificate file");
    }
    Ok(())
}

fn load_private_keys(root: &Path, config_dir: &Path, bundle: &mut Bundle) -> Result<()> {
    let mut keys: BTreeMap<String, PrivateKey> = BTreeMap::new();
    let dir = project::private_keys_dir(root);
    if dir.is_dir() {
        for file in glob_paths(&dir, "*")?.into_iter().filter(|p| p.is_file()) {
            if file.extension().and_then(|e| e.to_str()) != Some("p12") {
                return Err(ReadError::InvalidValue {
                    element: "private key file".to_owned(),
                    value: file.to_string_lossy().into_owned(),
                }
                .into());
            }
            let alias = file_stem(&file);
            keys.insert(alias.to_owned(), PrivateKey::new(alias));
        }
    }
    let configs = read_map::<PrivateKey>(config_dir, map_stem(EntityType::PrivateKey)?)?;
    for (alias, key) in configs {
        keys.insert(
            alias.to_owned(),
            PrivateKey {
                id: format!("{}:{alias}", key.keystore),
                alias,
                ..key
            },
        );
    }
    for key in keys.into_values() {
        bundle.add(BundleEntity::PrivateKey(key));
    }
    Ok(())
}

fn load_generic_entities(root: &Path, bundle: &mut Bundle) -> Result<()> {
    let dir = project::generic_entities_dir(root);
    if !dir.is_dir() {
        return Ok(());
    }
    for file in glob_paths(&dir, "*/*")?.into_iter().filter(|p| p.is_file()) {
        let format = ConfigFormat::from_path(&file)?;
        let val = fs::read_to_string(&file).with_context(|| format!("reading {file:?}"))?;
        let entity: GenericEntity = format
            .parse(&val)
            .with_context(|| format!("parsing {file:?}"))?;
        let class_name = file
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        bundle.add(BundleEntity::GenericEntity(GenericEntity {
            name: file_stem(&file),
            entity_class_name: class_name,
            ..entity
        }));
    }
    Ok(())
}

fn load_properties(root: &Path, bundle: &mut Bundle) -> Result<()> {
    for (name, value) in properties::read(project::static_properties_path(root))? {
        bundle.add(BundleEntity::ClusterProperty(ClusterProperty {
            name,
            value,
            ..Default::default()
        }));
    }
    bundle
        .environment_properties
        .extend(properties::read(project::env_properties_path(root))?);
    for (name, password) in properties::read(project::stored_passwords_path(root))? {
        bundle.add(BundleEntity::StoredPassword(StoredPassword {
            name,
            password,
            ..Default::default()
        }));
    }
    Ok(())
}
