//! Full CLI library for gwconf
//!

#![deny(missing_docs)]

mod cmd;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use human_panic::setup_panic;

use gwconf_core::{
    build::UuidIdGenerator,
    bundle::EntityType,
    logging::{self, info},
    project::ConfigFormat,
    Gwconf,
};

use cmd::{GwconfArgs, GwconfCommand};

/// Main CLI entrypoint.
pub fn cli() -> Result<()> {
    setup_panic!(Metadata {
        name: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
        authors: env!("CARGO_PKG_AUTHORS").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    });
    let args = GwconfArgs::parse();
    logging::setup(args.log_level);

    match &args.command {
        GwconfCommand::Build { source, output } => build(source, output.as_deref())?,
        GwconfCommand::Export {
            bundle,
            folder,
            target,
            format,
            include,
        } => export(bundle, folder.as_deref(), target, *format, include)?,
    }

    Ok(())
}

fn build(source: &Path, output: Option<&Path>) -> Result<()> {
    let gwconf = Gwconf::new(source)?;
    let xml = gwconf.build(&UuidIdGenerator)?;
    match output {
        Some(path) => {
            fs::write(path, xml).with_context(|| format!("writing {path:?}"))?;
            info!("bundle written to {path:?}");
        }
        None => println!("{xml}"),
    }
    Ok(())
}

fn export(
    bundle: &Path,
    folder: Option<&str>,
    target: &Path,
    format: Option<ConfigFormat>,
    include: &[(EntityType, String)],
) -> Result<()> {
    let bundle_xml =
        fs::read_to_string(bundle).with_context(|| format!("reading {bundle:?}"))?;

    let mut gwconf = Gwconf::new(target)?;
    if let Some(folder) = folder {
        gwconf.config.export.folder_path = folder.to_owned();
    }
    if let Some(format) = format {
        gwconf.config.format = format;
    }
    for (entity_type, name) in include {
        gwconf
            .config
            .export
            .entity_filters
            .entry(*entity_type)
            .or_default()
            .insert(name.to_owned());
    }

    let exported = gwconf.export(&bundle_xml)?;
    for (entity_type, count) in exported.counts().into_iter().filter(|(_, c)| *c > 0) {
        info!("{count:>6} {entity_type}");
    }
    Ok(())
}
