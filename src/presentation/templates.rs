//! The HTML template set, loaded from disk and swappable at runtime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use minijinja::{AutoEscape, Environment, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{rw_read, rw_write};
use crate::domain::unit::unit_needs_space;

const SOURCE: &str = "presentation::templates";

pub const HOME_TEMPLATE: &str = "home.html";
pub const RECIPE_TEMPLATE: &str = "recipe-page.html";
pub const EDIT_TEMPLATE: &str = "edit-recipe-page.html";
pub const AUTHENTICATION_TEMPLATE: &str = "authentication.html";

const REQUIRED_TEMPLATES: [&str; 4] = [
    HOME_TEMPLATE,
    RECIPE_TEMPLATE,
    EDIT_TEMPLATE,
    AUTHENTICATION_TEMPLATE,
];

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error("failed to read templates from `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template `{name}` is invalid")]
    Syntax {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("required template `{name}` is missing")]
    Missing { name: &'static str },
}

/// Every `*.{extension}` file of one directory, compiled into a single
/// environment so templates can extend and include each other.
pub struct PageTemplates {
    dir: PathBuf,
    extension: String,
    env: RwLock<Arc<Environment<'static>>>,
}

impl PageTemplates {
    pub fn load(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Result<Self, TemplateLoadError> {
        let dir = dir.into();
        let extension = extension.into();
        let env = build_environment(&dir, &extension)?;
        Ok(Self {
            dir,
            extension,
            env: RwLock::new(Arc::new(env)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory. On failure the current set stays active.
    pub fn reload(&self) -> Result<(), TemplateLoadError> {
        match build_environment(&self.dir, &self.extension) {
            Ok(env) => {
                *rw_write(&self.env, SOURCE, "reload") = Arc::new(env);
                info!(op = "templates::reload", dir = %self.dir.display(), "Templates reloaded");
                Ok(())
            }
            Err(err) => {
                warn!(
                    op = "templates::reload",
                    dir = %self.dir.display(),
                    error = %err,
                    "Template reload failed; keeping previous templates"
                );
                Err(err)
            }
        }
    }

    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String, minijinja::Error> {
        // Rendering works on a snapshot so a reload never waits for it.
        let env = Arc::clone(&rw_read(&self.env, SOURCE, "render"));
        env.get_template(name)?.render(context)
    }
}

fn build_environment(dir: &Path, extension: &str) -> Result<Environment<'static>, TemplateLoadError> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_name| AutoEscape::Html);
    env.add_test("spaced_unit", |unit: Value| {
        unit.as_str().is_some_and(unit_needs_space)
    });
    env.add_function("unit_needs_space", |unit: Value| {
        unit.as_str().is_some_and(unit_needs_space)
    });

    let entries = fs::read_dir(dir).map_err(|source| TemplateLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| TemplateLoadError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let source = fs::read_to_string(&path).map_err(|source| TemplateLoadError::Io {
            path: path.clone(),
            source,
        })?;
        env.add_template_owned(name.to_string(), source)
            .map_err(|source| TemplateLoadError::Syntax {
                name: name.to_string(),
                source,
            })?;
    }

    for name in REQUIRED_TEMPLATES {
        if env.get_template(name).is_err() {
            return Err(TemplateLoadError::Missing { name });
        }
    }
    Ok(env)
}
