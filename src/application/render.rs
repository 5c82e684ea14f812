use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::recipe::RawRecipe;
use crate::infra::store::StoreError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template `{template}` failed to render")]
    Template {
        template: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("render failed: {0}")]
    Message(String),
}

impl RenderError {
    pub fn template(template: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Template {
            template: template.into(),
            source: source.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Produces the cacheable pages. Implementations write into `out` and may
/// fail; a failure must not be treated as a finished page.
pub trait PageRenderer: Send + Sync {
    fn render_home(
        &self,
        out: &mut String,
        recipes: &BTreeMap<String, RawRecipe>,
    ) -> Result<(), RenderError>;

    fn render_create(&self, out: &mut String) -> Result<(), RenderError>;

    fn render_recipe(
        &self,
        out: &mut String,
        id: &str,
        recipe: &RawRecipe,
    ) -> Result<(), RenderError>;

    fn render_edit(
        &self,
        out: &mut String,
        id: &str,
        recipe: &RawRecipe,
    ) -> Result<(), RenderError>;
}
