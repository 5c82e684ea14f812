//! Recipe documents as stored on disk and as handed to templates.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use ammonia::Builder as AmmoniaBuilder;
use comrak::{Options, markdown_to_html};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::error::DomainError;

static MARKDOWN_OPTIONS: Lazy<Options<'static>> = Lazy::new(|| {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options
});

static SANITIZER: Lazy<AmmoniaBuilder<'static>> = Lazy::new(|| {
    let mut builder = AmmoniaBuilder::default();
    builder.link_rel(Some("noopener noreferrer"));
    builder
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ingredient {
    pub name: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngredientsSection {
    pub heading: String,
    pub ingredients: Vec<Ingredient>,
}

/// A recipe exactly as submitted by the editor and persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawRecipe {
    pub name: String,
    #[serde(default)]
    pub image_path: String,
    pub description: String,
    pub ingredients_sections: Vec<IngredientsSection>,
    pub instructions: String,
    pub source: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl RawRecipe {
    /// Normalize whitespace and decimal separators of user input.
    pub fn clean(&mut self) {
        trim_in_place(&mut self.name);
        trim_in_place(&mut self.image_path);
        trim_in_place(&mut self.description);
        trim_in_place(&mut self.instructions);
        trim_in_place(&mut self.source);
        for section in &mut self.ingredients_sections {
            trim_in_place(&mut section.heading);
            for ingredient in &mut section.ingredients {
                trim_in_place(&mut ingredient.name);
                ingredient.amount = ingredient.amount.trim().replace(',', ".");
                ingredient.unit = ingredient
                    .unit
                    .take()
                    .map(|unit| unit.trim().to_string())
                    .filter(|unit| !unit.is_empty());
            }
        }
        for category in &mut self.categories {
            trim_in_place(category);
        }
        self.categories.retain(|category| !category.is_empty());
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("recipe name must not be empty"));
        }
        Ok(())
    }

    /// Produce the template-facing form: markdown rendered and sanitized,
    /// ingredient amounts summed across sections.
    pub fn bake(&self) -> BakedRecipe {
        BakedRecipe {
            name: self.name.clone(),
            image_path: self.image_path.clone(),
            description: self.description.clone(),
            ingredients_sections: self.ingredients_sections.clone(),
            ingredient_summaries: summarize_ingredients(&self.ingredients_sections),
            instructions: render_markdown(&self.instructions),
            source: render_markdown(&self.source),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientSummary {
    pub name: String,
    pub unit: Option<String>,
    pub amount: f64,
}

/// A recipe prepared for display. `instructions` and `source` hold sanitized HTML.
#[derive(Debug, Clone, Serialize)]
pub struct BakedRecipe {
    pub name: String,
    pub image_path: String,
    pub description: String,
    pub ingredients_sections: Vec<IngredientsSection>,
    pub ingredient_summaries: Vec<IngredientSummary>,
    pub instructions: String,
    pub source: String,
    pub categories: Vec<String>,
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn render_markdown(input: &str) -> String {
    let html = markdown_to_html(input, &MARKDOWN_OPTIONS);
    SANITIZER.clean(&html).to_string()
}

/// Sum numeric amounts per (name, unit), in the order each pair first appears.
/// Amounts that are not plain numbers ("a pinch") are left out.
pub fn summarize_ingredients(sections: &[IngredientsSection]) -> Vec<IngredientSummary> {
    let mut positions: HashMap<(&str, Option<&str>), usize> = HashMap::new();
    let mut summaries: Vec<IngredientSummary> = Vec::new();

    for ingredient in sections.iter().flat_map(|section| &section.ingredients) {
        let Ok(amount) = ingredient.amount.parse::<f64>() else {
            continue;
        };
        match positions.entry((ingredient.name.as_str(), ingredient.unit.as_deref())) {
            Entry::Occupied(entry) => summaries[*entry.get()].amount += amount,
            Entry::Vacant(entry) => {
                entry.insert(summaries.len());
                summaries.push(IngredientSummary {
                    name: ingredient.name.clone(),
                    unit: ingredient.unit.clone(),
                    amount,
                });
            }
        }
    }

    summaries
}
