//! Defines the single route of the download gate.
//!
//! - `GET /?file=<name>` — download `name`, at most once
//! - any other method on `/` — 405
//! - any other path — 404
//!
//! Every response, the fallbacks included, passes through
//! `no_cache_headers`.

use crate::{
    handlers::download_handlers::{download, no_cache_headers, not_found},
    state::AppState,
};
use axum::{Router, middleware, routing::any};

/// Build and return the router. The caller supplies `AppState` via `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // method filtering happens in the handler so HEAD is refused too
        .route("/", any(download))
        .fallback(not_found)
        .layer(middleware::map_response(no_cache_headers))
}
