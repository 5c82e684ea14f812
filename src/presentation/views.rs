use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minify_html::{Cfg, minify};
use serde::Serialize;

use crate::application::error::{ErrorReport, HttpError};
use crate::application::render::{PageRenderer, RenderError};
use crate::domain::recipe::{BakedRecipe, RawRecipe};
use crate::presentation::templates::{
    AUTHENTICATION_TEMPLATE, EDIT_TEMPLATE, HOME_TEMPLATE, PageTemplates, RECIPE_TEMPLATE,
};

const HOME_TITLE: &str = "Rezepte";
const CREATE_TITLE: &str = "Neues Rezept";
const AUTHENTICATION_TITLE: &str = "Anmeldung";

#[derive(Serialize)]
pub struct RecipeCardView<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub image_path: &'a str,
    pub categories: &'a [String],
}

#[derive(Serialize)]
pub struct HomeView<'a> {
    pub title: &'static str,
    pub base_url: &'a str,
    pub recipes: Vec<RecipeCardView<'a>>,
    pub categories: BTreeSet<&'a str>,
}

#[derive(Serialize)]
pub struct RecipePageView<'a> {
    pub title: &'a str,
    pub base_url: &'a str,
    pub id: &'a str,
    pub recipe: BakedRecipe,
}

/// Shared by the creation form and the edit page; `id` and `recipe` are
/// absent when creating.
#[derive(Serialize)]
pub struct EditPageView<'a> {
    pub title: String,
    pub base_url: &'a str,
    pub id: Option<&'a str>,
    pub recipe: Option<&'a RawRecipe>,
    pub action: String,
}

#[derive(Serialize)]
pub struct AuthenticationView<'a> {
    pub title: &'static str,
    pub base_url: &'a str,
    pub identity: Option<&'a str>,
}

/// [`PageRenderer`] backed by the on-disk template set. Every page is
/// minified after rendering.
pub struct TemplateRenderer {
    templates: Arc<PageTemplates>,
    base_url: String,
    minify: Cfg,
}

impl TemplateRenderer {
    pub fn new(templates: Arc<PageTemplates>, base_url: impl Into<String>) -> Self {
        Self {
            templates,
            base_url: base_url.into(),
            minify: minify_settings(),
        }
    }

    pub fn templates(&self) -> &Arc<PageTemplates> {
        &self.templates
    }

    /// The authentication page depends on the visitor, so it is never cached.
    pub fn render_authentication(&self, identity: Option<&str>) -> Result<String, RenderError> {
        let view = AuthenticationView {
            title: AUTHENTICATION_TITLE,
            base_url: &self.base_url,
            identity,
        };
        let html = self
            .templates
            .render(AUTHENTICATION_TEMPLATE, view)
            .map_err(|err| RenderError::template(AUTHENTICATION_TEMPLATE, err))?;
        self.minify_page(&html)
    }

    fn render_into<S: Serialize>(
        &self,
        out: &mut String,
        template: &'static str,
        view: S,
    ) -> Result<(), RenderError> {
        let html = self
            .templates
            .render(template, view)
            .map_err(|err| RenderError::template(template, err))?;
        out.push_str(&self.minify_page(&html)?);
        Ok(())
    }

    fn minify_page(&self, html: &str) -> Result<String, RenderError> {
        String::from_utf8(minify(html.as_bytes(), &self.minify))
            .map_err(|err| RenderError::message(format!("minified page is not UTF-8: {err}")))
    }
}

/// Document and end tags stay, as do quotes around attribute values.
fn minify_settings() -> Cfg {
    Cfg {
        do_not_minify_doctype: true,
        ensure_spec_compliant_unquoted_attribute_values: true,
        keep_closing_tags: true,
        keep_html_and_head_opening_tags: true,
        keep_spaces_between_attributes: true,
        minify_css: true,
        ..Cfg::new()
    }
}

impl PageRenderer for TemplateRenderer {
    fn render_home(
        &self,
        out: &mut String,
        recipes: &BTreeMap<String, RawRecipe>,
    ) -> Result<(), RenderError> {
        let cards: Vec<RecipeCardView<'_>> = recipes
            .iter()
            .map(|(id, recipe)| RecipeCardView {
                id,
                name: &recipe.name,
                description: &recipe.description,
                image_path: &recipe.image_path,
                categories: &recipe.categories,
            })
            .collect();
        let categories = recipes
            .values()
            .flat_map(|recipe| recipe.categories.iter().map(String::as_str))
            .collect();
        let view = HomeView {
            title: HOME_TITLE,
            base_url: &self.base_url,
            recipes: cards,
            categories,
        };
        self.render_into(out, HOME_TEMPLATE, view)
    }

    fn render_create(&self, out: &mut String) -> Result<(), RenderError> {
        let view = EditPageView {
            title: CREATE_TITLE.to_string(),
            base_url: &self.base_url,
            id: None,
            recipe: None,
            action: format!("{}/create", self.base_url),
        };
        self.render_into(out, EDIT_TEMPLATE, view)
    }

    fn render_recipe(
        &self,
        out: &mut String,
        id: &str,
        recipe: &RawRecipe,
    ) -> Result<(), RenderError> {
        let view = RecipePageView {
            title: &recipe.name,
            base_url: &self.base_url,
            id,
            recipe: recipe.bake(),
        };
        self.render_into(out, RECIPE_TEMPLATE, view)
    }

    fn render_edit(
        &self,
        out: &mut String,
        id: &str,
        recipe: &RawRecipe,
    ) -> Result<(), RenderError> {
        let view = EditPageView {
            title: format!("Bearbeiten: {}", recipe.name),
            base_url: &self.base_url,
            id: Some(id),
            recipe: Some(recipe),
            action: format!("{}/edit/{id}", self.base_url),
        };
        self.render_into(out, EDIT_TEMPLATE, view)
    }
}

/// Serve an already rendered page.
pub fn page_response(page: &str) -> Response {
    Html(page.to_string()).into_response()
}

pub fn render_not_found_response(source: &'static str) -> Response {
    let mut response = (StatusCode::NOT_FOUND, "not-found").into_response();
    ErrorReport::from_message(source, StatusCode::NOT_FOUND, "Recipe not found").attach(&mut response);
    response
}

impl From<RenderError> for HttpError {
    fn from(err: RenderError) -> Self {
        HttpError::from_error(
            "presentation::views",
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal-error",
            &err,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::domain::recipe::{Ingredient, IngredientsSection};

    fn renderer(dir: &TempDir) -> TemplateRenderer {
        let files = [
            (
                HOME_TEMPLATE,
                "{{ title }}|{% for r in recipes %}{{ r.id }}={{ r.name }};{% endfor %}|{{ categories | join(',') }}",
            ),
            (
                RECIPE_TEMPLATE,
                "{{ title }}|{% for s in recipe.ingredient_summaries %}{{ s.amount }}{% if s.unit is spaced_unit %} {% endif %}{{ s.unit or '' }} {{ s.name }};{% endfor %}|{{ recipe.instructions | safe }}",
            ),
            (EDIT_TEMPLATE, "{{ title }}|{{ action | safe }}|{{ id or '-' }}"),
            (AUTHENTICATION_TEMPLATE, "{{ identity or 'anonymous' }}"),
        ];
        for (name, body) in files {
            fs::write(dir.path().join(name), body).expect("write template");
        }
        let templates = PageTemplates::load(dir.path(), "html").expect("load templates");
        TemplateRenderer::new(Arc::new(templates), "/rezepte")
    }

    fn recipe() -> RawRecipe {
        RawRecipe {
            name: "Pfannkuchen".to_string(),
            image_path: String::new(),
            description: String::new(),
            ingredients_sections: vec![IngredientsSection {
                heading: String::new(),
                ingredients: vec![
                    Ingredient {
                        name: "Mehl".to_string(),
                        amount: "250".to_string(),
                        unit: Some("g".to_string()),
                    },
                    Ingredient {
                        name: "Zucker".to_string(),
                        amount: "2".to_string(),
                        unit: Some("EL".to_string()),
                    },
                ],
            }],
            instructions: "Gut *verrühren*.".to_string(),
            source: String::new(),
            categories: vec!["Frühstück".to_string()],
        }
    }

    #[test]
    fn home_lists_recipes_and_categories() {
        let dir = TempDir::new().expect("tempdir");
        let renderer = renderer(&dir);
        let mut recipes = BTreeMap::new();
        recipes.insert("pfannkuchen".to_string(), recipe());

        let mut out = String::new();
        renderer.render_home(&mut out, &recipes).expect("render");

        assert_eq!(out, "Rezepte|pfannkuchen=Pfannkuchen;|Frühstück");
    }

    #[test]
    fn recipe_page_bakes_the_document() {
        let dir = TempDir::new().expect("tempdir");
        let renderer = renderer(&dir);

        let mut out = String::new();
        renderer
            .render_recipe(&mut out, "pfannkuchen", &recipe())
            .expect("render");

        assert!(out.starts_with("Pfannkuchen|250.0g Mehl;2.0 EL Zucker;|"), "{out}");
        assert!(out.contains("<em>verrühren</em>"));
    }

    #[test]
    fn create_and_edit_share_the_form() {
        let dir = TempDir::new().expect("tempdir");
        let renderer = renderer(&dir);

        let mut create = String::new();
        renderer.render_create(&mut create).expect("render");
        assert_eq!(create, "Neues Rezept|/rezepte/create|-");

        let mut edit = String::new();
        renderer
            .render_edit(&mut edit, "pfannkuchen", &recipe())
            .expect("render");
        assert_eq!(
            edit,
            "Bearbeiten: Pfannkuchen|/rezepte/edit/pfannkuchen|pfannkuchen"
        );
    }

    #[test]
    fn pages_are_minified() {
        let dir = TempDir::new().expect("tempdir");
        let renderer = renderer(&dir);
        let source = "<!DOCTYPE html>\n<html>\n  <head>\n    <title>{{ title }}</title>\n  </head>\n  <body>\n    <!-- listing -->\n    <ul>\n      {% for r in recipes %}\n        <li>{{ r.name }}</li>\n      {% endfor %}\n    </ul>\n  </body>\n</html>\n";
        fs::write(dir.path().join(HOME_TEMPLATE), source).expect("write");
        renderer.templates().reload().expect("reload");
        let mut recipes = BTreeMap::new();
        recipes.insert("pfannkuchen".to_string(), recipe());

        let unminified = renderer
            .templates()
            .render(
                HOME_TEMPLATE,
                serde_json::json!({ "title": HOME_TITLE, "recipes": [{ "name": "Pfannkuchen" }] }),
            )
            .expect("render");
        let mut out = String::new();
        renderer.render_home(&mut out, &recipes).expect("render");

        assert!(out.len() < unminified.len(), "{out}");
        assert!(!out.contains("<!--"));
        assert!(!out.contains("\n  "));
        assert!(out.contains("<title>Rezepte</title>"));
        assert!(out.contains("<li>Pfannkuchen</li>"));
    }

    #[test]
    fn template_failure_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let renderer = renderer(&dir);
        fs::write(dir.path().join(HOME_TEMPLATE), "{{ missing.field.deeper }}").expect("write");
        renderer.templates().reload().expect("reload");

        let mut out = String::new();
        let err = renderer
            .render_home(&mut out, &BTreeMap::new())
            .expect_err("undefined attribute access fails");
        assert!(matches!(err, RenderError::Template { .. }));
    }
}
