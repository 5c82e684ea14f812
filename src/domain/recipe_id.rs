//! Derive recipe identifiers from free-form recipe names.
//!
//! German umlauts get their conventional two-letter spelling (`Grünkern` →
//! `gruenkern`) before the `slug` crate transliterates whatever non-ASCII text
//! remains.

use slug::slugify;

use super::error::DomainError;

/// Turn a recipe name into the identifier used for its URL and file name.
pub fn to_recipe_id(name: &str) -> Result<String, DomainError> {
    let spelled = spell_out_umlauts(name);
    let id = slugify(spelled);
    if id.is_empty() {
        return Err(DomainError::validation("empty-id"));
    }
    Ok(id)
}

/// Whether `id` is already in normalized form, as file stems and URL segments must be.
pub fn is_recipe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && !id.ends_with('-')
        && !id.contains("--")
        && id
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

fn spell_out_umlauts(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.chars().flat_map(char::to_lowercase) {
        match ch {
            'ä' => output.push_str("ae"),
            'ö' => output.push_str("oe"),
            'ü' => output.push_str("ue"),
            'ß' => output.push_str("ss"),
            other => output.push(other),
        }
    }
    output
}
