//! Static files served from the configured directory.

use std::io::ErrorKind;
use std::path::{Component, Path as FsPath, PathBuf};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;

use crate::application::error::ErrorReport;

use super::HttpState;

const SOURCE: &str = "infra::http::assets";

pub(super) async fn serve_static(
    State(state): State<HttpState>,
    path: Option<Path<String>>,
) -> Response {
    let captured = path.map(|Path(value)| value).unwrap_or_default();
    let Some(relative) = resolve_relative(&captured) else {
        return not_found_response();
    };

    let full = state.static_dir.join(&relative);
    match tokio::fs::read(&full).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&relative).first_or_octet_stream();
            build_response(Bytes::from(contents), mime)
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            not_found_response()
        }
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

/// Only plain relative paths without `..` or directory listings.
fn resolve_relative(candidate: &str) -> Option<PathBuf> {
    let candidate = candidate.trim_start_matches('/');
    if candidate.is_empty() || candidate.ends_with('/') {
        return None;
    }
    let path = FsPath::new(candidate);
    path.components()
        .all(|component| matches!(component, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    response
}
