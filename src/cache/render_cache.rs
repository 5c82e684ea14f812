use std::sync::Arc;

use metrics::counter;

use super::map::{METRIC_RENDER_CACHE_INVALIDATE, RecipePagesMap};
use super::slot::{PageKind, PageSlot};
use crate::application::render::{PageRenderer, RenderError};
use crate::infra::store::RecipeStore;

/// Rendered pages for the home listing, the creation form and every recipe.
///
/// Readers pass the store they read under; `Catalog` guarantees it is the
/// store the cache records were registered against and that no writer holds
/// it meanwhile.
pub struct RenderCache {
    renderer: Arc<dyn PageRenderer>,
    home: PageSlot,
    create: PageSlot,
    recipes: RecipePagesMap,
}

impl RenderCache {
    /// Build an empty cache with one record per recipe already in `store`.
    pub fn new(renderer: Arc<dyn PageRenderer>, store: &RecipeStore) -> Self {
        let recipes = RecipePagesMap::new();
        for id in store.recipes().keys() {
            recipes.create(id);
        }
        Self {
            renderer,
            home: PageSlot::new(),
            create: PageSlot::new(),
            recipes,
        }
    }

    pub fn home_page(&self, store: &RecipeStore) -> Result<Arc<str>, RenderError> {
        self.home.get_or_render(PageKind::Home, |out| {
            self.renderer.render_home(out, store.recipes())
        })
    }

    pub fn create_page(&self) -> Result<Arc<str>, RenderError> {
        self.create
            .get_or_render(PageKind::Create, |out| self.renderer.render_create(out))
    }

    /// `Ok(None)` when no record exists for `id`; the renderer is not called.
    pub fn recipe_page(
        &self,
        store: &RecipeStore,
        id: &str,
    ) -> Result<Option<Arc<str>>, RenderError> {
        let Some(record) = self.recipes.get(id) else {
            return Ok(None);
        };
        record
            .view()
            .get_or_render(PageKind::Recipe, |out| {
                let recipe = store.get_must_exist(id)?;
                self.renderer.render_recipe(out, id, recipe)
            })
            .map(Some)
    }

    pub fn edit_page(
        &self,
        store: &RecipeStore,
        id: &str,
    ) -> Result<Option<Arc<str>>, RenderError> {
        let Some(record) = self.recipes.get(id) else {
            return Ok(None);
        };
        record
            .edit()
            .get_or_render(PageKind::Edit, |out| {
                let recipe = store.get_must_exist(id)?;
                self.renderer.render_edit(out, id, recipe)
            })
            .map(Some)
    }

    // The maintenance calls below assume the store already holds the state the
    // next render should see, which only holds under the catalog's write lock.

    pub(crate) fn invalidate_home(&self) {
        self.home.invalidate();
        counter!(METRIC_RENDER_CACHE_INVALIDATE, "scope" => "home").increment(1);
    }

    pub(crate) fn invalidate(&self, id: &str) -> bool {
        self.recipes.invalidate(id)
    }

    pub(crate) fn add_recipe(&self, id: &str) {
        self.recipes.create(id);
    }

    pub(crate) fn remove_recipe(&self, id: &str) -> bool {
        self.recipes.remove(id)
    }

    pub(crate) fn invalidate_all(&self) {
        self.home.invalidate();
        self.create.invalidate();
        self.recipes.invalidate_all();
    }

    pub fn has_record(&self, id: &str) -> bool {
        self.recipes.contains(id)
    }

    pub fn record_count(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_home_rendered(&self) -> bool {
        self.home.is_rendered()
    }
}
