//! Commands for the gwconf CLI
//!

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{self, Parser, Subcommand};

use gwconf_core::{bundle::EntityType, logging::LevelFilter, project::ConfigFormat};

/// gwconf: keep gateway configuration in version control
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None, arg_required_else_help = true)]
pub(crate) struct GwconfArgs {
    #[clap(subcommand)]
    pub(crate) command: GwconfCommand,
    #[clap(global = true, short = 'v', long)]
    pub(crate) log_level: Option<LevelFilter>,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum GwconfCommand {
    /// Build a deployable bundle from a project
    Build {
        /// Project directory
        #[clap(short, long, default_value = ".")]
        source: PathBuf,
        /// Where to write the bundle. Printed to stdout if not given.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the contents of an exported bundle into a project
    Export {
        /// The exported bundle
        #[clap(short, long)]
        bundle: PathBuf,
        /// Gateway folder to export. Overrides gwconf.yaml.
        #[clap(short, long)]
        folder: Option<String>,
        /// Project directory
        #[clap(short, long, default_value = ".")]
        target: PathBuf,
        /// Format of new config files (yaml or json). Overrides gwconf.yaml.
        #[clap(long)]
        format: Option<ConfigFormat>,
        /// Entities to export even if nothing uses them, e.g. CLUSTER_PROPERTY=timeout
        #[clap(short, long, use_value_delimiter = true, value_delimiter = ',', value_parser = parse_include)]
        include: Vec<(EntityType, String)>,
    },
}

/// Parse a `TYPE=NAME` force-include
pub(crate) fn parse_include(val: &str) -> Result<(EntityType, String)> {
    let (entity_type, name) = val
        .split_once('=')
        .ok_or_else(|| anyhow!("expected TYPE=NAME, got `{val}`"))?;
    let entity_type = entity_type
        .trim()
        .parse::<EntityType>()
        .with_context(|| format!("in `{val}`"))?;
    Ok((entity_type, name.trim().to_owned()))
}
