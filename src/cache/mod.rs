//! Render cache for recipe pages.
//!
//! Pages are rendered lazily and kept until a write invalidates them:
//!
//! - [`PageSlot`]: one page, single-flight fill
//! - [`RecipePagesMap`]: view and edit slots per recipe
//! - [`RenderCache`]: the fixed home and create slots plus the map, bound to a renderer
//!
//! Locks are always taken in the order catalog → map → slot. A slot's lock is
//! never held while asking for the map's.

mod lock;
mod map;
mod render_cache;
mod slot;

pub(crate) use lock::{rw_read, rw_write};
pub use map::{RecipePages, RecipePagesMap};
pub use render_cache::RenderCache;
pub use slot::{PageKind, PageSlot};

pub(crate) use map::METRIC_RENDER_CACHE_INVALIDATE;
pub(crate) use slot::{
    METRIC_RENDER_CACHE_HIT, METRIC_RENDER_CACHE_MISS, METRIC_RENDER_FAILURE, METRIC_RENDER_MS,
};
