//! Shared fixtures for router-level tests.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use download_gate::{
    services::{
        download_gate::DownloadGate,
        grant_store::GrantStore,
        object_store::{LocalObjectStore, ObjectStore},
    },
    state::EdgeHeaders,
};
use std::path::Path;
use tempfile::TempDir;
use tower::ServiceExt;

pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("cache-control", "no-cache, private, max-age=0"),
    ("expires", "Thu, 01 Jan 1970 00:00:00 GMT"),
    ("pragma", "no-cache"),
];

/// A temporary grant database.
pub async fn grant_store(dir: &Path) -> GrantStore {
    let url = format!("sqlite://{}", dir.join("grants.db").display());
    let store = GrantStore::connect(&url, 8).await.unwrap();
    store.migrate().await.unwrap();
    store
}

/// Router over a temporary database and a temporary object directory.
pub struct LocalApp {
    pub db_dir: TempDir,
    pub objects_dir: TempDir,
    pub grants: GrantStore,
    pub router: Router,
}

impl LocalApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let objects_dir = tempfile::tempdir().unwrap();
        let grants = grant_store(db_dir.path()).await;
        let objects = ObjectStore::Local(LocalObjectStore::new(objects_dir.path()));
        let router = download_gate::app(
            DownloadGate::new(grants.clone(), objects),
            EdgeHeaders::default(),
        );
        Self {
            db_dir,
            objects_dir,
            grants,
            router,
        }
    }

    pub fn upload(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.objects_dir.path().join(name), bytes).unwrap();
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        send(&self.router, Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn assert_no_cache<B>(response: &Response<B>) {
    for (name, value) in NO_CACHE_HEADERS {
        assert_eq!(
            response.headers().get(name).map(|v| v.to_str().unwrap()),
            Some(value),
            "header {name}"
        );
    }
}
