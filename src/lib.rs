//! A small recipe collection: JSON documents on disk, served as HTML pages
//! that are rendered once and cached until the recipe behind them changes.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
