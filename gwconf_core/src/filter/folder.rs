//! Filters that select by location rather than by reference.

use anyhow::Result;

use super::{EntityFilter, FilterConfiguration};
use crate::{
    bundle::{is_within, Bundle, BundleEntity, EntityType, Folder},
    error::EntityFilterError,
};

/// Keeps the export root and every folder beneath it.
#[derive(Clone, Copy, Debug, Default)]
pub struct FolderFilter;

impl FolderFilter {
    /// The folders above `path`, root first. Doesn't include the folder at
    /// `path` itself.
    pub fn parent_folders(path: &str, bundle: &Bundle) -> Result<Vec<Folder>> {
        let folder = bundle
            .folder_tree
            .folder_by_path(path)
            .ok_or_else(|| EntityFilterError::FolderNotFound(path.to_owned()))?;
        Ok(bundle
            .folder_tree
            .ancestors(&folder.id)
            .into_iter()
            .cloned()
            .collect())
    }
}

impl EntityFilter for FolderFilter {
    fn entity_type(&self) -> EntityType {
        EntityType::Folder
    }

    fn dependencies(&self) -> Vec<EntityType> {
        vec![]
    }

    fn filter(
        &self,
        folder_path: &str,
        _config: &FilterConfiguration,
        source: &Bundle,
        _filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        Ok(source
            .folders
            .values()
            .filter(|f| is_within(&source.folder_tree.path(f), folder_path))
            .cloned()
            .map(BundleEntity::Folder)
            .collect())
    }
}

/// Keeps standalone policies stored in a kept folder.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyFilter;

impl EntityFilter for PolicyFilter {
    fn entity_type(&self) -> EntityType {
        EntityType::Policy
    }

    fn dependencies(&self) -> Vec<EntityType> {
        vec![EntityType::Folder]
    }

    fn filter(
        &self,
        _folder_path: &str,
        _config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        Ok(source
            .policies
            .values()
            .filter(|p| filtered.folders.contains_key(&p.folder_id))
            .cloned()
            .map(BundleEntity::Policy)
            .collect())
    }
}

/// Keeps services stored in a kept folder.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceFilter;

impl EntityFilter for ServiceFilter {
    fn entity_type(&self) -> EntityType {
        EntityType::Service
    }

    fn dependencies(&self) -> Vec<EntityType> {
        vec![EntityType::Folder]
    }

    fn filter(
        &self,
        _folder_path: &str,
        _config: &FilterConfiguration,
        source: &Bundle,
        filtered: &Bundle,
    ) -> Result<Vec<BundleEntity>> {
        Ok(source
            .services
            .values()
            .filter(|s| filtered.folders.contains_key(&s.folder_id))
            .cloned()
            .map(BundleEntity::Service)
            .collect())
    }
}
