//! A single-use download gate.
//!
//! Each filename can be downloaded exactly once. The first `GET /?file=<name>`
//! for an existing object records a grant and streams the bytes; every later
//! request for that name is refused with `403`, including concurrent ones
//! that lose the grant transaction.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use services::download_gate::DownloadGate;
use state::{AppState, EdgeHeaders};

/// The complete application router with state attached.
pub fn app(gate: DownloadGate, edge_headers: EdgeHeaders) -> Router {
    routes::routes::routes().with_state(AppState::new(gate, edge_headers))
}
