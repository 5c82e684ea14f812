//! Application services: the catalog and the contracts around it.

pub mod catalog;
pub mod error;
pub mod render;
pub mod tokens;
