//! Per-recipe cache records keyed by recipe identifier.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metrics::counter;
use tracing::debug;

use super::lock::{rw_read, rw_write};
use super::slot::PageSlot;

const SOURCE: &str = "cache::map";

pub(crate) const METRIC_RENDER_CACHE_INVALIDATE: &str = "recipes_render_cache_invalidate_total";

/// The two cached pages of one recipe.
#[derive(Default)]
pub struct RecipePages {
    view: PageSlot,
    edit: PageSlot,
}

impl RecipePages {
    pub fn view(&self) -> &PageSlot {
        &self.view
    }

    pub fn edit(&self) -> &PageSlot {
        &self.edit
    }

    fn invalidate(&self) {
        self.view.invalidate();
        self.edit.invalidate();
    }
}

/// Dynamic set of [`RecipePages`].
///
/// The structural lock only guards the map itself. Records are handed out as
/// `Arc`s and the guard is released before any slot is touched, so a lookup
/// never waits on a render and renders of different recipes never block each
/// other.
#[derive(Default)]
pub struct RecipePagesMap {
    records: RwLock<HashMap<String, Arc<RecipePages>>>,
}

impl RecipePagesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty record, replacing any existing one.
    pub fn create(&self, id: &str) {
        rw_write(&self.records, SOURCE, "create")
            .insert(id.to_string(), Arc::new(RecipePages::default()));
        debug!(recipe_id = id, "cache record created");
    }

    /// Returns whether a record was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = rw_write(&self.records, SOURCE, "remove").remove(id);
        debug!(recipe_id = id, removed = removed.is_some(), "cache record removed");
        removed.is_some()
    }

    /// Invalidate both pages of `id`. Unknown identifiers are ignored.
    pub fn invalidate(&self, id: &str) -> bool {
        let Some(record) = self.get(id) else {
            return false;
        };
        record.invalidate();
        counter!(METRIC_RENDER_CACHE_INVALIDATE, "scope" => "recipe").increment(1);
        true
    }

    pub fn invalidate_all(&self) {
        let records: Vec<Arc<RecipePages>> = rw_read(&self.records, SOURCE, "invalidate_all")
            .values()
            .cloned()
            .collect();
        for record in &records {
            record.invalidate();
        }
        counter!(METRIC_RENDER_CACHE_INVALIDATE, "scope" => "all").increment(1);
        debug!(records = records.len(), "all cache records invalidated");
    }

    /// Look up a record without creating one.
    pub fn get(&self, id: &str) -> Option<Arc<RecipePages>> {
        rw_read(&self.records, SOURCE, "get").get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        rw_read(&self.records, SOURCE, "contains").contains_key(id)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
