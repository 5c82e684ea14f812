//! The recipe catalog: the store and its render cache behind one lock.
//!
//! Every write takes the outer lock exclusively and applies the store change
//! and the matching cache change as one [`Mutation`]. Reads take it shared
//! and keep it until their page is rendered, so a page is always rendered
//! from the document that is current when it is filled.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::application::render::{PageRenderer, RenderError};
use crate::cache::{RenderCache, rw_read, rw_write};
use crate::domain::recipe::RawRecipe;
pub use crate::infra::store::{AddOutcome, RemoveOutcome};
use crate::infra::store::{RecipeStore, StoreError};

const SOURCE: &str = "application::catalog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Same identifier, new document.
    Replaced,
    /// Stored under a new identifier; the old one is gone.
    Renamed,
    /// The new identifier belongs to another recipe. Nothing changed.
    AlreadyExists,
    /// The old identifier is unknown. Nothing changed.
    NotFound,
}

struct CatalogState {
    store: RecipeStore,
    cache: RenderCache,
}

enum Mutation<'a> {
    Add { id: &'a str, recipe: RawRecipe },
    Replace { id: &'a str, recipe: RawRecipe },
    Remove { id: &'a str },
}

#[derive(Debug, PartialEq, Eq)]
enum Applied {
    Added,
    Replaced,
    Removed,
    AlreadyExists,
    NotFound,
}

impl CatalogState {
    /// The only place the store and the cache records change. Requires the
    /// outer write lock, which `&mut self` proves.
    fn apply(&mut self, mutation: Mutation<'_>) -> Result<Applied, StoreError> {
        match mutation {
            Mutation::Add { id, recipe } => match self.store.add(id, recipe)? {
                AddOutcome::AlreadyExists => Ok(Applied::AlreadyExists),
                AddOutcome::Added => {
                    self.cache.add_recipe(id);
                    self.cache.invalidate_home();
                    Ok(Applied::Added)
                }
            },
            Mutation::Replace { id, recipe } => match self.store.replace(id, recipe)? {
                None => Ok(Applied::NotFound),
                Some(_previous) => {
                    self.cache.invalidate(id);
                    self.cache.invalidate_home();
                    Ok(Applied::Replaced)
                }
            },
            Mutation::Remove { id } => match self.store.remove(id)? {
                RemoveOutcome::NotFound => Ok(Applied::NotFound),
                RemoveOutcome::Removed => {
                    self.cache.remove_recipe(id);
                    self.cache.invalidate_home();
                    Ok(Applied::Removed)
                }
            },
        }
    }
}

pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new(store: RecipeStore, renderer: Arc<dyn PageRenderer>) -> Self {
        let cache = RenderCache::new(renderer, &store);
        Self {
            state: RwLock::new(CatalogState { store, cache }),
        }
    }

    pub fn open(
        recipes_dir: impl Into<PathBuf>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(RecipeStore::open(recipes_dir)?, renderer))
    }

    // ===== Reads =====

    pub fn home_page(&self) -> Result<Arc<str>, RenderError> {
        let state = rw_read(&self.state, SOURCE, "home_page");
        state.cache.home_page(&state.store)
    }

    pub fn create_page(&self) -> Result<Arc<str>, RenderError> {
        let state = rw_read(&self.state, SOURCE, "create_page");
        state.cache.create_page()
    }

    /// `Ok(None)` for an unknown identifier.
    pub fn recipe_page(&self, id: &str) -> Result<Option<Arc<str>>, RenderError> {
        let state = rw_read(&self.state, SOURCE, "recipe_page");
        state.cache.recipe_page(&state.store, id)
    }

    /// `Ok(None)` for an unknown identifier.
    pub fn edit_page(&self, id: &str) -> Result<Option<Arc<str>>, RenderError> {
        let state = rw_read(&self.state, SOURCE, "edit_page");
        state.cache.edit_page(&state.store, id)
    }

    pub fn recipe(&self, id: &str) -> Option<RawRecipe> {
        rw_read(&self.state, SOURCE, "recipe")
            .store
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        rw_read(&self.state, SOURCE, "contains").store.contains(id)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Writes =====

    pub fn add(&self, id: &str, recipe: RawRecipe) -> Result<AddOutcome, StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "add");
        match state.apply(Mutation::Add { id, recipe })? {
            Applied::Added => {
                info!(op = "catalog::add", recipe_id = id, "Recipe added");
                Ok(AddOutcome::Added)
            }
            _ => {
                debug!(op = "catalog::add", recipe_id = id, result = "already_exists");
                Ok(AddOutcome::AlreadyExists)
            }
        }
    }

    /// Store `recipe` under `new_id`, replacing the recipe known as `old_id`.
    ///
    /// With differing identifiers this is an add of `new_id` followed by a
    /// removal of `old_id` under one held lock. When `new_id` is taken the
    /// old recipe is left alone.
    pub fn replace(
        &self,
        new_id: &str,
        old_id: &str,
        recipe: RawRecipe,
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "replace");

        if new_id == old_id {
            let outcome = match state.apply(Mutation::Replace { id: new_id, recipe })? {
                Applied::Replaced => ReplaceOutcome::Replaced,
                _ => ReplaceOutcome::NotFound,
            };
            info!(op = "catalog::replace", recipe_id = new_id, result = ?outcome);
            return Ok(outcome);
        }

        if !state.store.contains(old_id) {
            debug!(op = "catalog::replace", old_id, new_id, result = "not_found");
            return Ok(ReplaceOutcome::NotFound);
        }
        if state.apply(Mutation::Add { id: new_id, recipe })? == Applied::AlreadyExists {
            debug!(op = "catalog::replace", old_id, new_id, result = "already_exists");
            return Ok(ReplaceOutcome::AlreadyExists);
        }
        state.apply(Mutation::Remove { id: old_id })?;

        info!(op = "catalog::replace", old_id, new_id, "Recipe renamed");
        Ok(ReplaceOutcome::Renamed)
    }

    pub fn remove(&self, id: &str) -> Result<RemoveOutcome, StoreError> {
        let mut state = rw_write(&self.state, SOURCE, "remove");
        match state.apply(Mutation::Remove { id })? {
            Applied::Removed => {
                info!(op = "catalog::remove", recipe_id = id, "Recipe removed");
                Ok(RemoveOutcome::Removed)
            }
            _ => {
                debug!(op = "catalog::remove", recipe_id = id, result = "not_found");
                Ok(RemoveOutcome::NotFound)
            }
        }
    }

    /// Drop every cached page, e.g. after the templates changed.
    pub fn invalidate_all(&self) {
        let state = rw_write(&self.state, SOURCE, "invalidate_all");
        state.cache.invalidate_all();
        info!(op = "catalog::invalidate_all", "All cached pages invalidated");
    }

    #[cfg(test)]
    fn assert_records_match_store(&self) {
        let state = rw_read(&self.state, SOURCE, "assert_records_match_store");
        assert_eq!(state.cache.record_count(), state.store.len());
        for id in state.store.recipes().keys() {
            assert!(state.cache.has_record(id), "missing cache record for {id}");
        }
    }

    #[cfg(test)]
    fn is_home_rendered(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_home_rendered")
            .cache
            .is_home_rendered()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct CountingRenderer {
        home: AtomicUsize,
        create: AtomicUsize,
        recipe: AtomicUsize,
        edit: AtomicUsize,
    }

    impl PageRenderer for CountingRenderer {
        fn render_home(
            &self,
            out: &mut String,
            recipes: &BTreeMap<String, RawRecipe>,
        ) -> Result<(), RenderError> {
            self.home.fetch_add(1, Ordering::SeqCst);
            let ids: Vec<&str> = recipes.keys().map(String::as_str).collect();
            out.push_str(&ids.join(","));
            Ok(())
        }

        fn render_create(&self, out: &mut String) -> Result<(), RenderError> {
            self.create.fetch_add(1, Ordering::SeqCst);
            out.push_str("create");
            Ok(())
        }

        fn render_recipe(
            &self,
            out: &mut String,
            id: &str,
            recipe: &RawRecipe,
        ) -> Result<(), RenderError> {
            self.recipe.fetch_add(1, Ordering::SeqCst);
            out.push_str(&format!("{id}:{}", recipe.description));
            Ok(())
        }

        fn render_edit(
            &self,
            out: &mut String,
            id: &str,
            recipe: &RawRecipe,
        ) -> Result<(), RenderError> {
            self.edit.fetch_add(1, Ordering::SeqCst);
            out.push_str(&format!("edit {id}:{}", recipe.description));
            Ok(())
        }
    }

    fn recipe(name: &str, description: &str) -> RawRecipe {
        RawRecipe {
            name: name.to_string(),
            image_path: String::new(),
            description: description.to_string(),
            ingredients_sections: Vec::new(),
            instructions: String::new(),
            source: String::new(),
            categories: Vec::new(),
        }
    }

    fn catalog() -> (TempDir, Arc<CountingRenderer>, Catalog) {
        let dir = TempDir::new().expect("tempdir");
        let renderer = Arc::new(CountingRenderer::default());
        let catalog = Catalog::open(dir.path(), renderer.clone()).expect("open");
        (dir, renderer, catalog)
    }

    #[test]
    fn records_exist_for_preloaded_recipes() {
        let dir = TempDir::new().expect("tempdir");
        {
            let mut store = RecipeStore::open(dir.path()).expect("open");
            store.add("soup", recipe("Soup", "hot")).expect("add");
        }

        let catalog = Catalog::open(dir.path(), Arc::new(CountingRenderer::default()))
            .expect("open");

        catalog.assert_records_match_store();
        assert_eq!(
            catalog.recipe_page("soup").expect("render").as_deref(),
            Some("soup:hot")
        );
    }

    #[test]
    fn duplicate_add_keeps_first_document() {
        let (_dir, _renderer, catalog) = catalog();

        assert_eq!(catalog.add("x", recipe("X", "doc")).unwrap(), AddOutcome::Added);
        assert_eq!(
            catalog.add("x", recipe("X", "doc2")).unwrap(),
            AddOutcome::AlreadyExists
        );

        assert_eq!(catalog.recipe("x").unwrap().description, "doc");
        catalog.assert_records_match_store();
    }

    #[test]
    fn add_invalidates_home_listing() {
        let (_dir, renderer, catalog) = catalog();
        assert_eq!(&*catalog.home_page().unwrap(), "");

        catalog.add("soup", recipe("Soup", "hot")).unwrap();

        assert_eq!(&*catalog.home_page().unwrap(), "soup");
        assert_eq!(renderer.home.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn replace_rerenders_only_the_changed_recipe() {
        let (_dir, renderer, catalog) = catalog();
        catalog.add("a", recipe("A", "v1")).unwrap();
        catalog.add("b", recipe("B", "v1")).unwrap();
        catalog.recipe_page("a").unwrap();
        catalog.recipe_page("b").unwrap();
        catalog.edit_page("a").unwrap();

        assert_eq!(
            catalog.replace("a", "a", recipe("A", "v2")).unwrap(),
            ReplaceOutcome::Replaced
        );

        assert_eq!(catalog.recipe_page("a").unwrap().as_deref(), Some("a:v2"));
        assert_eq!(catalog.edit_page("a").unwrap().as_deref(), Some("edit a:v2"));
        assert_eq!(catalog.recipe_page("b").unwrap().as_deref(), Some("b:v1"));
        assert_eq!(renderer.recipe.load(Ordering::SeqCst), 3);
        assert_eq!(renderer.edit.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn replace_of_unknown_identifier_changes_nothing() {
        let (dir, _renderer, catalog) = catalog();

        assert_eq!(
            catalog.replace("ghost", "ghost", recipe("Ghost", "")).unwrap(),
            ReplaceOutcome::NotFound
        );
        assert_eq!(
            catalog.replace("new", "ghost", recipe("New", "")).unwrap(),
            ReplaceOutcome::NotFound
        );

        assert!(catalog.is_empty());
        assert!(!dir.path().join("new.json").exists());
    }

    #[test]
    fn rename_moves_recipe_and_its_pages() {
        let (_dir, _renderer, catalog) = catalog();
        catalog.add("old", recipe("Old", "v1")).unwrap();
        catalog.recipe_page("old").unwrap();

        assert_eq!(
            catalog.replace("new", "old", recipe("New", "v2")).unwrap(),
            ReplaceOutcome::Renamed
        );

        assert_eq!(catalog.recipe_page("old").unwrap(), None);
        assert_eq!(catalog.recipe_page("new").unwrap().as_deref(), Some("new:v2"));
        catalog.assert_records_match_store();
    }

    #[test]
    fn rename_onto_existing_identifier_aborts() {
        let (_dir, _renderer, catalog) = catalog();
        catalog.add("old", recipe("Old", "old")).unwrap();
        catalog.add("new", recipe("New", "new")).unwrap();

        assert_eq!(
            catalog.replace("new", "old", recipe("New", "clobber")).unwrap(),
            ReplaceOutcome::AlreadyExists
        );

        assert_eq!(catalog.recipe_page("old").unwrap().as_deref(), Some("old:old"));
        assert_eq!(catalog.recipe_page("new").unwrap().as_deref(), Some("new:new"));
        catalog.assert_records_match_store();
    }

    #[test]
    fn removing_missing_recipe_keeps_home_page() {
        let (_dir, renderer, catalog) = catalog();
        catalog.home_page().unwrap();
        assert!(catalog.is_home_rendered());

        assert_eq!(catalog.remove("missing").unwrap(), RemoveOutcome::NotFound);

        assert!(catalog.is_home_rendered());
        catalog.home_page().unwrap();
        assert_eq!(renderer.home.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_drops_record_and_relists_home() {
        let (_dir, renderer, catalog) = catalog();
        catalog.add("soup", recipe("Soup", "hot")).unwrap();
        catalog.recipe_page("soup").unwrap();
        catalog.home_page().unwrap();

        assert_eq!(catalog.remove("soup").unwrap(), RemoveOutcome::Removed);
        assert_eq!(catalog.remove("soup").unwrap(), RemoveOutcome::NotFound);

        assert_eq!(catalog.recipe_page("soup").unwrap(), None);
        assert_eq!(catalog.edit_page("soup").unwrap(), None);
        assert_eq!(&*catalog.home_page().unwrap(), "");
        assert_eq!(renderer.home.load(Ordering::SeqCst), 2);
        catalog.assert_records_match_store();
    }

    #[test]
    fn failed_persist_leaves_catalog_and_pages_untouched() {
        let (dir, renderer, catalog) = catalog();
        catalog.add("old", recipe("Old", "v1")).unwrap();
        catalog.home_page().unwrap();
        catalog.recipe_page("old").unwrap();
        // The rename onto the directory fails regardless of privileges.
        std::fs::create_dir(dir.path().join("soup.json")).expect("mkdir");

        let err = catalog.add("soup", recipe("Soup", "hot")).expect_err("add fails");
        assert!(matches!(err, StoreError::Io { .. }));
        let err = catalog
            .replace("soup", "old", recipe("Soup", "v2"))
            .expect_err("rename fails");
        assert!(matches!(err, StoreError::Io { .. }));

        assert!(!catalog.contains("soup"));
        assert!(catalog.contains("old"));
        catalog.assert_records_match_store();
        assert!(catalog.is_home_rendered());
        assert_eq!(&*catalog.home_page().unwrap(), "old");
        assert_eq!(catalog.recipe_page("old").unwrap().as_deref(), Some("old:v1"));
        assert_eq!(renderer.home.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.recipe.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_identifiers_do_not_call_the_renderer() {
        let (_dir, renderer, catalog) = catalog();

        assert_eq!(catalog.recipe_page("ghost").unwrap(), None);
        assert_eq!(catalog.edit_page("ghost").unwrap(), None);

        assert_eq!(renderer.recipe.load(Ordering::SeqCst), 0);
        assert_eq!(renderer.edit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalidate_all_forces_rerender_without_changes() {
        let (_dir, renderer, catalog) = catalog();
        catalog.add("soup", recipe("Soup", "hot")).unwrap();
        catalog.home_page().unwrap();
        catalog.create_page().unwrap();
        catalog.recipe_page("soup").unwrap();
        catalog.edit_page("soup").unwrap();

        catalog.invalidate_all();
        catalog.invalidate_all();

        catalog.home_page().unwrap();
        catalog.create_page().unwrap();
        catalog.recipe_page("soup").unwrap();
        catalog.edit_page("soup").unwrap();
        assert_eq!(renderer.home.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.create.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.recipe.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.edit.load(Ordering::SeqCst), 2);
    }
}
