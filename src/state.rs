//! Shared state handed to every handler.

use crate::{models::grant::Requester, services::download_gate::DownloadGate};
use axum::http::{HeaderMap, HeaderName};

/// Names of the headers the trusted edge uses to report where a caller is.
#[derive(Clone, Debug)]
pub struct EdgeHeaders {
    pub country: HeaderName,
    pub region: HeaderName,
}

impl Default for EdgeHeaders {
    fn default() -> Self {
        Self {
            country: HeaderName::from_static("x-appengine-country"),
            region: HeaderName::from_static("x-appengine-region"),
        }
    }
}

impl EdgeHeaders {
    /// Read the requester location. Missing or non-text values become empty.
    pub fn requester(&self, headers: &HeaderMap) -> Requester {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Requester::new(read(&self.country), read(&self.region))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gate: DownloadGate,
    pub edge_headers: EdgeHeaders,
}

impl AppState {
    pub fn new(gate: DownloadGate, edge_headers: EdgeHeaders) -> Self {
        Self { gate, edge_headers }
    }
}
