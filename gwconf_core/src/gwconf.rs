//! Project config and the two top-level operations.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use yaml_peg::serde as yaml;

use crate::{
    build::{BundleDocumentBuilder, BundleEntityBuilder, IdGenerator},
    bundle::{Bundle, EntityType},
    filter::{BundleFilter, FilterConfiguration},
    load::load_project,
    logging::{debug, info},
    project::{self, ConfigFormat},
    read::read_bundle,
    write::ProjectWriter,
};

/// Struct representing the gwconf.yaml file.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct GwconfConfig {
    /// Project name
    #[serde(default)]
    pub name: String,
    /// Format of new map files
    #[serde(default)]
    pub format: ConfigFormat,
    /// Export settings
    #[serde(default)]
    pub export: ExportConfig,
}

/// What to export from a gateway bundle.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Gateway folder to export, e.g. `/my/folder`
    #[serde(default = "default_folder_path")]
    pub folder_path: String,
    /// Names to export regardless of dependencies, keyed by type
    #[serde(default)]
    pub entity_filters: BTreeMap<EntityType, BTreeSet<String>>,
}

fn default_folder_path() -> String {
    "/".to_owned()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            folder_path: default_folder_path(),
            entity_filters: Default::default(),
        }
    }
}

impl ExportConfig {
    /// The force-include settings as a filter configuration
    pub fn filter_configuration(&self) -> FilterConfiguration {
        FilterConfiguration {
            entity_filters: self.entity_filters.to_owned(),
        }
    }
}

impl GwconfConfig {
    /// Read the config file. A missing file gives the defaults.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<GwconfConfig> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no config at {path:?}, using defaults");
            return Ok(Default::default());
        }
        let config_raw = fs::read_to_string(path).context("Reading file")?;
        let mut config =
            yaml::from_str::<GwconfConfig>(&config_raw).context("Deserializing config")?;
        Ok(config.pop().unwrap_or_default())
    }

    /// Convert this config to a yaml string.
    pub fn to_yaml(&self) -> Result<String> {
        yaml::to_string(self).map_err(anyhow::Error::from)
    }
}

/// One project directory and its config.
pub struct Gwconf {
    /// The project's gwconf.yaml, with any overrides applied
    pub config: GwconfConfig,
    root: PathBuf,
}

impl Gwconf {
    /// Open the project at `root`, reading its config if there is one.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_owned();
        Ok(Gwconf {
            config: GwconfConfig::read_from_file(project::gwconf_cfg_path(&root))
                .context("Reading gwconf config file")?,
            root,
        })
    }

    /// The project directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the project and render it as a deployable bundle document.
    pub fn build(&self, ids: &dyn IdGenerator) -> Result<String> {
        let bundle = load_project(&self.root, ids)
            .with_context(|| format!("loading project {:?}", self.root))?;
        let entities = BundleEntityBuilder::new(ids).build(&bundle)?;
        info!("built {} entities", entities.len());
        BundleDocumentBuilder.build_string(&entities)
    }

    /// Read an exported bundle, narrow it to the configured folder and
    /// write the result into the project. Returns what was written.
    pub fn export(&self, bundle_xml: &str) -> Result<Bundle> {
        let source = read_bundle(bundle_xml).context("reading bundle")?;
        let export = &self.config.export;
        let filtered = BundleFilter::new(&source, export.filter_configuration())?
            .filter(&export.folder_path)
            .with_context(|| format!("filtering bundle at `{}`", export.folder_path))?;
        ProjectWriter::new(&self.root, self.config.format).write(&filtered)?;
        info!(
            "exported {} entities from `{}`",
            filtered.counts().values().sum::<usize>(),
            export.folder_path
        );
        Ok(filtered)
    }
}
