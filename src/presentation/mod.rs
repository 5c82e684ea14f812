//! HTML pages: the template set and the views rendered through it.

pub mod templates;
pub mod views;
