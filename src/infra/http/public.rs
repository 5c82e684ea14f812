use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Form, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::info;

use crate::{
    application::{
        catalog::{AddOutcome, Catalog, RemoveOutcome, ReplaceOutcome},
        error::HttpError,
        tokens::TokenManager,
    },
    domain::{
        recipe::RawRecipe,
        recipe_id::{is_recipe_id, to_recipe_id},
    },
    presentation::views::{TemplateRenderer, page_response, render_not_found_response},
};

use super::{
    assets::serve_static,
    middleware::{log_responses, set_request_context},
};

const SOURCE: &str = "infra::http::public";

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Arc<Catalog>,
    pub renderer: Arc<TemplateRenderer>,
    pub tokens: Arc<TokenManager>,
    pub base_url: Arc<str>,
    pub secure_cookies: bool,
    pub static_dir: Arc<PathBuf>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/recipe/{id}", get(recipe_page))
        .route("/create", get(create_page).post(create_recipe))
        .route("/edit/{id}", get(edit_page).post(edit_recipe))
        .route("/delete/{id}", post(delete_recipe))
        .route("/authentication", get(authentication_page))
        .route("/authentication/set", post(set_authentication))
        .route("/static/{*path}", get(serve_static))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Run `op` on the blocking pool: catalog calls hold std locks across
/// rendering and file I/O.
async fn with_catalog<T, F>(state: &HttpState, op: F) -> Result<T, HttpError>
where
    T: Send + 'static,
    F: FnOnce(&Catalog) -> T + Send + 'static,
{
    let catalog = Arc::clone(&state.catalog);
    tokio::task::spawn_blocking(move || op(&catalog))
        .await
        .map_err(|err| {
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal-error",
                &err,
            )
        })
}

// ===== Pages =====

async fn home(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let page = with_catalog(&state, |catalog| catalog.home_page()).await??;
    Ok(page_response(&page))
}

async fn create_page(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let page = with_catalog(&state, |catalog| catalog.create_page()).await??;
    Ok(page_response(&page))
}

async fn recipe_page(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    if !is_recipe_id(&id) {
        return Ok(render_not_found_response(SOURCE));
    }
    let page = with_catalog(&state, move |catalog| catalog.recipe_page(&id)).await??;
    Ok(match page {
        Some(page) => page_response(&page),
        None => render_not_found_response(SOURCE),
    })
}

async fn edit_page(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    if !is_recipe_id(&id) {
        return Ok(render_not_found_response(SOURCE));
    }
    let page = with_catalog(&state, move |catalog| catalog.edit_page(&id)).await??;
    Ok(match page {
        Some(page) => page_response(&page),
        None => render_not_found_response(SOURCE),
    })
}

// ===== Authentication =====

async fn authentication_page(
    State(state): State<HttpState>,
    jar: CookieJar,
) -> Result<Response, HttpError> {
    let identity = identify(&state, &jar);
    let html = state.renderer.render_authentication(identity.as_deref())?;
    Ok(Html(html).into_response())
}

#[derive(Debug, Deserialize)]
struct SetTokenForm {
    #[serde(rename = "cookie-input")]
    token: String,
}

async fn set_authentication(
    State(state): State<HttpState>,
    jar: CookieJar,
    Form(form): Form<SetTokenForm>,
) -> (CookieJar, Redirect) {
    let target = format!("{}/authentication", state.base_url);
    let token = form.token.trim();
    if token.is_empty() {
        let removal = Cookie::build(state.tokens.cookie_name().to_string())
            .path(cookie_path(&state))
            .build();
        return (jar.remove(removal), Redirect::to(&target));
    }

    let cookie = Cookie::build((state.tokens.cookie_name().to_string(), token.to_string()))
        .path(cookie_path(&state))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(state.secure_cookies)
        .build();
    (jar.add(cookie), Redirect::to(&target))
}

fn cookie_path(state: &HttpState) -> String {
    if state.base_url.is_empty() {
        "/".to_string()
    } else {
        state.base_url.to_string()
    }
}

fn identify(state: &HttpState, jar: &CookieJar) -> Option<String> {
    jar.get(state.tokens.cookie_name())
        .and_then(|cookie| state.tokens.identify(cookie.value()))
}

/// The identity behind the request's token, or 403.
fn authorize(state: &HttpState, jar: &CookieJar) -> Result<String, HttpError> {
    identify(state, jar).ok_or_else(|| {
        HttpError::new(
            SOURCE,
            StatusCode::FORBIDDEN,
            "access-denied",
            "missing or unknown token",
        )
    })
}

// ===== Writes =====

/// Parse, clean and validate a submitted recipe and derive its identifier.
fn parse_recipe(body: &[u8]) -> Result<(String, RawRecipe), HttpError> {
    let mut recipe: RawRecipe = serde_json::from_slice(body).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "invalid-request-body",
            &err,
        )
    })?;
    recipe.clean();
    recipe.validate()?;
    let id = to_recipe_id(&recipe.name)?;
    Ok((id, recipe))
}

fn duplicate_id(id: &str) -> HttpError {
    HttpError::new(
        SOURCE,
        StatusCode::BAD_REQUEST,
        "duplicate-id",
        format!("recipe `{id}` already exists"),
    )
}

fn recipe_location(state: &HttpState, id: &str) -> String {
    format!("{}/recipe/{id}", state.base_url)
}

async fn create_recipe(
    State(state): State<HttpState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, HttpError> {
    let identity = authorize(&state, &jar)?;
    let (id, recipe) = parse_recipe(&body)?;

    let outcome = {
        let id = id.clone();
        with_catalog(&state, move |catalog| catalog.add(&id, recipe)).await??
    };
    match outcome {
        AddOutcome::Added => {
            info!(op = "http::create", recipe_id = %id, identity = %identity, "Recipe created");
            Ok(Redirect::to(&recipe_location(&state, &id)).into_response())
        }
        AddOutcome::AlreadyExists => Err(duplicate_id(&id)),
    }
}

async fn edit_recipe(
    State(state): State<HttpState>,
    Path(old_id): Path<String>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, HttpError> {
    let identity = authorize(&state, &jar)?;
    if !is_recipe_id(&old_id) {
        return Ok(render_not_found_response(SOURCE));
    }
    let (new_id, recipe) = parse_recipe(&body)?;

    let outcome = {
        let (new_id, old_id) = (new_id.clone(), old_id.clone());
        with_catalog(&state, move |catalog| {
            catalog.replace(&new_id, &old_id, recipe)
        })
        .await??
    };
    match outcome {
        ReplaceOutcome::Replaced | ReplaceOutcome::Renamed => {
            info!(
                op = "http::edit",
                old_id = %old_id,
                recipe_id = %new_id,
                identity = %identity,
                "Recipe updated"
            );
            Ok(Redirect::to(&recipe_location(&state, &new_id)).into_response())
        }
        ReplaceOutcome::AlreadyExists => Err(duplicate_id(&new_id)),
        ReplaceOutcome::NotFound => Ok(render_not_found_response(SOURCE)),
    }
}

async fn delete_recipe(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    jar: CookieJar,
) -> Result<Response, HttpError> {
    let identity = authorize(&state, &jar)?;
    if !is_recipe_id(&id) {
        return Ok(render_not_found_response(SOURCE));
    }

    let outcome = {
        let id = id.clone();
        with_catalog(&state, move |catalog| catalog.remove(&id)).await??
    };
    match outcome {
        RemoveOutcome::Removed => {
            info!(op = "http::delete", recipe_id = %id, identity = %identity, "Recipe deleted");
            Ok(Redirect::to(&format!("{}/", state.base_url)).into_response())
        }
        RemoveOutcome::NotFound => Ok(render_not_found_response(SOURCE)),
    }
}
