//! Folder hierarchy over a flat set of folders.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};

use super::{EntityType, Folder};
use crate::error::EntityBuilderError;

/// Id of the gateway's root folder
pub const ROOT_FOLDER_ID: &str = "0000000000000000ffffffffffffec76";
/// Name of the gateway's root folder
pub const ROOT_FOLDER_NAME: &str = "Root Node";

/// Folders keyed by id, with child lists. Parents are resolved by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderTree {
    folders: BTreeMap<String, Folder>,
    children: BTreeMap<String, Vec<String>>,
}

impl FolderTree {
    /// Build a tree, checking that every folder's parent chain ends at the
    /// root folder.
    pub fn new<I: IntoIterator<Item = Folder>>(folders: I) -> Result<Self> {
        let folders: BTreeMap<String, Folder> =
            folders.into_iter().map(|f| (f.id.to_owned(), f)).collect();

        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for folder in folders.values() {
            if let Some(parent) = &folder.parent_folder_id {
                children
                    .entry(parent.to_owned())
                    .or_default()
                    .push(folder.id.to_owned());
            }
        }

        let tree = FolderTree { folders, children };
        for id in tree.folders.keys() {
            tree.check_chain(id)?;
        }
        Ok(tree)
    }

    fn check_chain(&self, id: &str) -> Result<()> {
        let mut seen = HashSet::new();
        let mut current = id;
        loop {
            if !seen.insert(current) {
                bail!("folder `{id}` has a cycle in its parent chain");
            }
            let folder = match self.folders.get(current) {
                Some(f) => f,
                None => {
                    return Err(EntityBuilderError::MissingReference {
                        entity_type: EntityType::Folder,
                        reference: current.to_owned(),
                        referrer: format!("the parent chain of folder `{id}`"),
                    }
                    .into())
                }
            };
            match &folder.parent_folder_id {
                Some(parent) => current = parent,
                None if folder.id == ROOT_FOLDER_ID => return Ok(()),
                None => bail!("folder `{}` has no parent but is not the root", folder.id),
            }
        }
    }

    /// Look a folder up by id
    pub fn folder_by_id(&self, id: &str) -> Option<&Folder> {
        self.folders.get(id)
    }

    /// The root folder, if the tree has one
    pub fn root(&self) -> Option<&Folder> {
        self.folders.get(ROOT_FOLDER_ID)
    }

    /// The slash-separated path of a folder relative to the root. The root
    /// itself has the empty path.
    pub fn path(&self, folder: &Folder) -> String {
        self.path_by_id(&folder.id).unwrap_or_default()
    }

    /// Same as [`FolderTree::path`], by id. `None` if the folder is unknown.
    pub fn path_by_id(&self, id: &str) -> Option<String> {
        let ancestry = self.ancestry(id)?;
        Some(
            ancestry
                .iter()
                .filter(|f| f.parent_folder_id.is_some())
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// The folder at the given path. Leading and trailing slashes are
    /// ignored, so `/`, `` and the root all resolve to the root folder.
    pub fn folder_by_path(&self, path: &str) -> Option<&Folder> {
        let mut current = self.root()?;
        for segment in normalize_path(path).split('/').filter(|s| !s.is_empty()) {
            current = self
                .child_ids(&current.id)
                .iter()
                .filter_map(|c| self.folders.get(c))
                .find(|f| f.name == segment)?;
        }
        Some(current)
    }

    /// The folder followed by its ancestors, ordered root first.
    fn ancestry(&self, id: &str) -> Option<Vec<&Folder>> {
        let mut res = vec![];
        let mut current = self.folders.get(id)?;
        res.push(current);
        while let Some(parent) = &current.parent_folder_id {
            current = self.folders.get(parent)?;
            res.push(current);
        }
        res.reverse();
        Some(res)
    }

    /// Ancestors of a folder, root first, not including the folder itself.
    pub fn ancestors(&self, id: &str) -> Vec<&Folder> {
        let mut res = self.ancestry(id).unwrap_or_default();
        res.pop();
        res
    }

    /// Ids of the direct children of a folder
    pub fn child_ids(&self, id: &str) -> &[String] {
        self.children.get(id).map(|c| c.as_slice()).unwrap_or_default()
    }

    /// Every folder, parents before children
    pub fn top_down(&self) -> Vec<&Folder> {
        let mut res = vec![];
        let mut queue = std::collections::VecDeque::new();
        if let Some(root) = self.root() {
            queue.push_back(root);
        }
        while let Some(folder) = queue.pop_front() {
            res.push(folder);
            queue.extend(
                self.child_ids(&folder.id)
                    .iter()
                    .filter_map(|c| self.folders.get(c)),
            );
        }
        res
    }

    /// Number of folders
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

/// Strip leading and trailing slashes from a folder path
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Whether `path` is `root` or lies beneath it. Both are normalized first.
pub fn is_within(path: &str, root: &str) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(root);
    root.is_empty()
        || path == root
        || (path.starts_with(root) && path[root.len()..].starts_with('/'))
}
