//! Path utilities for project organization.
//!
//! The project structure looks like this:
//!
//! ```text
//! {project_root}
//!  ├── gwconf.yaml
//!  ├── policy
//!  │    └── <folder path>
//!  │         └── <name>.xml
//!  └── config
//!       ├── services.yml
//!       ├── policies.yml
//!       ├── encass.yml
//!       ├── ... one file per entity type
//!       ├── static.properties
//!       ├── env.properties
//!       ├── stored-passwords.properties
//!       ├── certificates
//!       │    └── <name>.pem
//!       ├── privateKeys
//!       │    └── <alias>.p12
//!       └── genericEntities
//!            └── <entity class name>
//!                 └── <name>.yml
//! ```
//!
//! Map files can be YAML (`.yml` or `.yaml`) or JSON (`.json`).

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::bundle::EntityType;

lazy_static! {
    static ref GWCONF_CFG: PathBuf = PathBuf::from("gwconf.yaml");
    static ref POLICY_DIR: PathBuf = PathBuf::from("policy");
    static ref CONFIG_DIR: PathBuf = PathBuf::from("config");
    static ref CERTIFICATES_DIR: PathBuf = PathBuf::from("certificates");
    static ref PRIVATE_KEYS_DIR: PathBuf = PathBuf::from("privateKeys");
    static ref GENERIC_ENTITIES_DIR: PathBuf = PathBuf::from("genericEntities");
    static ref STATIC_PROPERTIES: PathBuf = PathBuf::from("static.properties");
    static ref ENV_PROPERTIES: PathBuf = PathBuf::from("env.properties");
    static ref STORED_PASSWORDS: PathBuf = PathBuf::from("stored-passwords.properties");
}

/// File stem of the policy tag/subtag map
pub const POLICIES_CFG: &str = "policies";

/// Extensions accepted for trusted certificates
pub const CERTIFICATE_EXTENSIONS: [&str; 4] = ["pem", "crt", "cer", "der"];

/// Path to the project config file
pub fn gwconf_cfg_path<P: AsRef<Path>>(project_path: P) -> PathBuf {
    project_path.as_ref().join(GWCONF_CFG.as_path())
}

/// Root of the policy tree. Every directory below it is a folder.
pub fn policy_dir<P: AsRef<Path>>(project_path: P) -> PathBuf {
    project_path.as_ref().join(POLICY_DIR.as_path())
}

/// Directory holding every config file
pub fn config_dir<P: AsRef<Path>>(project_path: P) -> PathBuf {
    project_path.as_ref().join(CONFIG_DIR.as_path())
}

/// Directory of trusted certificate files
pub fn certificates_dir<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(CERTIFICATES_DIR.as_path())
}

/// Directory of private key files
pub fn private_keys_dir<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(PRIVATE_KEYS_DIR.as_path())
}

/// Directory of generic entities, one subdirectory per entity class
pub fn generic_entities_dir<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(GENERIC_ENTITIES_DIR.as_path())
}

/// Cluster properties file
pub fn static_properties_path<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(STATIC_PROPERTIES.as_path())
}

/// Environment properties file
pub fn env_properties_path<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(ENV_PROPERTIES.as_path())
}

/// Stored passwords file
pub fn stored_passwords_path<P: AsRef<Path>>(project_path: P) -> PathBuf {
    config_dir(project_path).join(STORED_PASSWORDS.as_path())
}

/// The stem of the map file holding entities of the given type, for the
/// types that are stored in one.
pub fn config_file_stem(entity_type: EntityType) -> Option<&'static str> {
    match entity_type {
        EntityType::Service => Some("services"),
        EntityType::Encass => Some("encass"),
        EntityType::PolicyBackedService => Some("policy-backed-services"),
        EntityType::ListenPort => Some("listen-ports"),
        EntityType::JdbcConnection => Some("jdbc-connections"),
        EntityType::CassandraConnection => Some("cassandra-connections"),
        EntityType::IdentityProvider => Some("identity-providers"),
        EntityType::TrustedCert => Some("trusted-certs"),
        EntityType::PrivateKey => Some("private-keys"),
        EntityType::ScheduledTask => Some("scheduled-tasks"),
        EntityType::Folder
        | EntityType::Policy
        | EntityType::ClusterProperty
        | EntityType::StoredPassword
        | EntityType::GenericEntity => None,
    }
}

/// Path of a map file in the given format
pub fn config_file_path<P: AsRef<Path>>(
    project_path: P,
    stem: &str,
    format: ConfigFormat,
) -> PathBuf {
    config_dir(project_path).join(format!("{stem}.{}", format.extension()))
}

/// Find an existing map file with the given stem, in any format.
///
/// It's an error for more than one to exist, since which one wins would be
/// arbitrary.
pub fn find_config_file<P: AsRef<Path>>(
    dir: P,
    stem: &str,
) -> Result<Option<(PathBuf, ConfigFormat)>> {
    let found: Vec<_> = ["yml", "yaml", "json"]
        .into_iter()
        .map(|ext| dir.as_ref().join(format!("{stem}.{ext}")))
        .filter(|p| p.is_file())
        .collect();
    match found.as_slice() {
        [] => Ok(None),
        [path] => Ok(Some((path.to_owned(), ConfigFormat::from_path(path)?))),
        many => bail!("found more than one `{stem}` config file: {many:?}"),
    }
}

/// Serialization format of the map files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    /// YAML, written with the `.yml` extension
    #[default]
    Yaml,
    /// Pretty-printed JSON
    Json,
}

impl ConfigFormat {
    /// Extension used when writing a new file
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
            ConfigFormat::Json => "json",
        }
    }

    /// Work out the format from a file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("yml" | "yaml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => bail!("unsupported config file: {:?}", path.as_ref()),
        }
    }

    /// Deserialize a document. An empty YAML document gives the default.
    pub fn parse<T: DeserializeOwned + Default>(&self, val: &str) -> Result<T> {
        match self {
            ConfigFormat::Yaml => {
                let mut docs: Vec<T> = yaml_peg::serde::from_str(val)?;
                Ok(docs.pop().unwrap_or_default())
            }
            ConfigFormat::Json if val.trim().is_empty() => Ok(T::default()),
            ConfigFormat::Json => Ok(serde_json::from_str(val)?),
        }
    }

    /// Serialize a document
    pub fn render<T: Serialize>(&self, val: &T) -> Result<String> {
        match self {
            ConfigFormat::Yaml => yaml_peg::serde::to_string(val).map_err(anyhow::Error::from),
            ConfigFormat::Json => {
                let mut res = serde_json::to_string_pretty(val)?;
                res.push('\n');
                Ok(res)
            }
        }
    }
}

impl Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFormat::Yaml => write!(f, "yaml"),
            ConfigFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(anyhow!("unknown config format `{other}`, expected yaml or json")),
        }
    }
}

/// Clean out characters that can't be used in file names.
pub fn clean_string_for_path(val: &str) -> String {
    let cleaned = val
        .split(
            &[
                '/', '\\', '?', '|', '<', '>', ':', '*', '"', '+', ',', ';', '=', '[', ']',
            ][..],
        )
        .collect::<Vec<_>>()
        .join("_");
    // Can't end in a period
    if cleaned.ends_with('.') {
        format!("{cleaned}_")
    } else {
        cleaned
    }
}
