//! Recipe documents and the pure rules around them.

pub mod error;
pub mod recipe;
pub mod recipe_id;
pub mod unit;
