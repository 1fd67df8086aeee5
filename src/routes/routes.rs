//! Defines routes for the file API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **File endpoints** (`{id}` is the URL-safe base64 of the object key)
//!   - `GET    /files?user=&path_prefix=`: list a user's files
//!   - `POST   /files`: multipart upload
//!   - `GET    /files/tree`: not yet supported
//!   - `GET    /files/{id}`: fetch one file
//!   - `DELETE /files/{id}`: delete a file
//!   - `POST   /files/{id}/move`: move or rename a file
//!
//! - **Downloads**
//!   - `GET    /objects/{bucket}/{*key}`: stream a public object
//!
//! The wildcard `*key` allows nested keys like `1/photos/2025/img.jpg`.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_object, file_tree, get_file, list_files, move_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Multipart framing allowance on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router for all file API routes.
///
/// Handlers share one `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file routes
        .route("/files", get(list_files).post(upload_file))
        .route("/files/tree", get(file_tree))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/move", post(move_file))
        // downloads
        .route("/objects/{bucket}/{*key}", get(download_object))
}

/// The complete application: routes, state and the HTTP middleware stack.
pub fn app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers may call from any origin; the origin is echoed back so
/// credentials are allowed.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::PUT,
            Method::POST,
            Method::GET,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::REFERER,
            header::HeaderName::from_static("x-authorization"),
            header::HeaderName::from_static("x-cluster"),
        ])
        .expose_headers([header::DATE])
}
