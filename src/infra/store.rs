//! Authoritative recipe map, mirrored to one JSON file per recipe.
//!
//! Every mutation reaches the disk before it reaches memory. A failed write
//! or delete leaves the in-memory map untouched, so the map never describes a
//! recipe the directory does not hold.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::recipe::RawRecipe;
use crate::domain::recipe_id::{is_recipe_id, to_recipe_id};

const RECIPE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to (de)serialize recipe file `{}`", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("recipe `{id}` should be in the store")]
    Invariant { id: String },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug)]
pub struct RecipeStore {
    dir: PathBuf,
    recipes: BTreeMap<String, RawRecipe>,
}

impl RecipeStore {
    /// Load every `*.json` file in `dir`, creating the directory if needed.
    /// The file stem is the recipe identifier; files whose stem is not a
    /// normalized identifier could never be addressed and are skipped.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        let mut recipes = BTreeMap::new();
        let entries = fs::read_dir(&dir).map_err(|err| StoreError::io(&dir, err))?;
        for entry in entries {
            let path = entry.map_err(|err| StoreError::io(&dir, err))?.path();
            let Some(id) = recipe_id_of(&path) else {
                continue;
            };
            if !is_recipe_id(&id) {
                warn!(
                    op = "store::open",
                    path = %path.display(),
                    "Skipping recipe file whose name is not a recipe identifier"
                );
                continue;
            }
            let recipe = read_recipe(&path)?;
            if to_recipe_id(&recipe.name).ok().as_deref() != Some(id.as_str()) {
                warn!(
                    op = "store::open",
                    recipe_id = %id,
                    recipe_name = %recipe.name,
                    "Recipe name does not match its file name"
                );
            }
            recipes.insert(id, recipe);
        }

        info!(
            op = "store::open",
            dir = %dir.display(),
            recipes = recipes.len(),
            "Recipes loaded"
        );
        Ok(Self { dir, recipes })
    }

    pub fn get(&self, id: &str) -> Option<&RawRecipe> {
        self.recipes.get(id)
    }

    /// Lookup for callers that already established `id` is present.
    ///
    /// A miss means a cache record outlived its recipe; it is logged and
    /// reported as [`StoreError::Invariant`].
    pub fn get_must_exist(&self, id: &str) -> Result<&RawRecipe, StoreError> {
        self.recipes.get(id).ok_or_else(|| {
            error!(
                op = "store::get_must_exist",
                recipe_id = id,
                "Recipe should be in the store"
            );
            StoreError::Invariant { id: id.to_string() }
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.recipes.contains_key(id)
    }

    /// All recipes ordered by identifier.
    pub fn recipes(&self) -> &BTreeMap<String, RawRecipe> {
        &self.recipes
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn add(&mut self, id: &str, recipe: RawRecipe) -> Result<AddOutcome, StoreError> {
        if self.recipes.contains_key(id) {
            return Ok(AddOutcome::AlreadyExists);
        }
        self.write_recipe(id, &recipe)?;
        self.recipes.insert(id.to_string(), recipe);
        Ok(AddOutcome::Added)
    }

    /// Overwrite an existing recipe. Returns the previous document, or `None`
    /// without touching anything when `id` is unknown.
    pub fn replace(
        &mut self,
        id: &str,
        recipe: RawRecipe,
    ) -> Result<Option<RawRecipe>, StoreError> {
        if !self.recipes.contains_key(id) {
            return Ok(None);
        }
        self.write_recipe(id, &recipe)?;
        Ok(self.recipes.insert(id.to_string(), recipe))
    }

    pub fn remove(&mut self, id: &str) -> Result<RemoveOutcome, StoreError> {
        if !self.recipes.contains_key(id) {
            return Ok(RemoveOutcome::NotFound);
        }
        let path = self.path_of(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    op = "store::remove",
                    recipe_id = id,
                    path = %path.display(),
                    "Recipe file was already gone"
                );
            }
            Err(err) => return Err(StoreError::io(&path, err)),
        }
        self.recipes.remove(id);
        Ok(RemoveOutcome::Removed)
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECIPE_EXTENSION}"))
    }

    // Written to a sibling temp file and renamed over the target so a crash
    // never leaves a truncated recipe behind.
    fn write_recipe(&self, id: &str, recipe: &RawRecipe) -> Result<(), StoreError> {
        let path = self.path_of(id);
        let file = tempfile::Builder::new()
            .prefix(".recipe-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|err| StoreError::io(&self.dir, err))?;

        let mut writer = BufWriter::new(file.as_file());
        serde_json::to_writer_pretty(&mut writer, recipe).map_err(|source| {
            StoreError::Serialization {
                path: path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(|err| StoreError::io(file.path(), err))?;
        drop(writer);
        file.as_file()
            .sync_all()
            .map_err(|err| StoreError::io(file.path(), err))?;

        file.persist(&path)
            .map_err(|err| StoreError::io(&path, err.error))?;
        debug!(op = "store::write", recipe_id = id, path = %path.display(), "Recipe written");
        Ok(())
    }
}

fn recipe_id_of(path: &Path) -> Option<String> {
    if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(RECIPE_EXTENSION)
    {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

fn read_recipe(path: &Path) -> Result<RawRecipe, StoreError> {
    let text = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}
