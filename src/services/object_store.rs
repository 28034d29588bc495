//! src/services/object_store.rs
//!
//! Read-only access to the downloadable payloads. Two backends share one
//! surface (`exists` + `fetch`):
//!
//! - `Http`: a bucket behind an HTTP object endpoint, addressed as
//!   `{endpoint}/{bucket}/{filename}`. The response is relayed as-is apart
//!   from provider metadata headers.
//! - `Local`: a directory on disk, streamed from an open `File`.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::Url;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Storage-provider headers that are never forwarded to the caller.
pub const PROVIDER_HEADERS: [&str; 8] = [
    "expires",
    "x-goog-generation",
    "x-goog-hash",
    "x-goog-metageneration",
    "x-goog-storage-class",
    "x-goog-stored-content-encoding",
    "x-goog-stored-content-length",
    "x-guploader-uploadid",
];

/// Connection-scoped headers that must not be relayed by a proxy.
const HOP_BY_HOP_HEADERS: [HeaderName; 3] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object endpoint `{0}` cannot address objects")]
    InvalidEndpoint(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object store answered with unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

/// A payload ready to be relayed to the caller.
pub struct ObjectResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ObjectResponse {
    /// Strip provider metadata and hop-by-hop headers, keeping status and body.
    pub fn sanitized(mut self) -> Self {
        for name in PROVIDER_HEADERS {
            self.headers.remove(name);
        }
        for name in &HOP_BY_HOP_HEADERS {
            self.headers.remove(name);
        }
        self
    }
}

impl std::fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum ObjectStore {
    Local(LocalObjectStore),
    Http(HttpObjectStore),
}

impl ObjectStore {
    /// Whether an object named `filename` exists.
    pub async fn exists(&self, filename: &str) -> ObjectResult<bool> {
        match self {
            Self::Local(store) => store.exists(filename).await,
            Self::Http(store) => store.exists(filename).await,
        }
    }

    /// Open the object for streaming.
    pub async fn fetch(&self, filename: &str) -> ObjectResult<ObjectResponse> {
        match self {
            Self::Local(store) => store.fetch(filename).await,
            Self::Http(store) => store.fetch(filename).await,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Local(store) => format!("local:{}", store.root.display()),
            Self::Http(store) => format!(
                "{}/{}",
                store.endpoint.as_str().trim_end_matches('/'),
                store.bucket
            ),
        }
    }
}

/// Objects stored as plain files beneath `root`.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a filename onto a path under `root`.
    ///
    /// Names with root, prefix, `.` or `..` components have no object and
    /// resolve to `None`.
    fn object_path(&self, filename: &str) -> Option<PathBuf> {
        let relative = Path::new(filename);
        if relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            Some(self.root.join(relative))
        } else {
            None
        }
    }

    async fn exists(&self, filename: &str) -> ObjectResult<bool> {
        let Some(path) = self.object_path(filename) else {
            return Ok(false);
        };
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch(&self, filename: &str) -> ObjectResult<ObjectResponse> {
        let path = self
            .object_path(filename)
            .ok_or_else(|| ObjectStoreError::NotFound(filename.to_string()))?;
        let file = File::open(&path).await.map_err(|err| {
            if is_missing(&err) {
                ObjectStoreError::NotFound(filename.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let meta = file.metadata().await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
        if let Ok(modified) = meta.modified() {
            let modified: DateTime<Utc> = modified.into();
            let value = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::LAST_MODIFIED, value);
            }
        }

        Ok(ObjectResponse {
            status: StatusCode::OK,
            headers,
            body: Body::from_stream(ReaderStream::new(file)),
        })
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::InvalidInput
    )
}

/// Objects in a bucket on an HTTP object endpoint.
#[derive(Clone, Debug)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> ObjectResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|_| ObjectStoreError::InvalidEndpoint(endpoint.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(ObjectStoreError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            token,
        })
    }

    /// `{endpoint}/{bucket}/{filename}`, each segment percent-encoded.
    /// Slashes in the filename keep their meaning as path separators.
    ///
    /// URL path rules would drop `.` and `..` segments and address a
    /// different object, so such names have no object and resolve to `None`.
    fn object_url(&self, filename: &str) -> ObjectResult<Option<Url>> {
        if filename
            .split('/')
            .any(|segment| matches!(segment, "." | ".."))
        {
            return Ok(None);
        }
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(filename.split('/'));
        Ok(Some(url))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn exists(&self, filename: &str) -> ObjectResult<bool> {
        let Some(url) = self.object_url(filename)? else {
            return Ok(false);
        };
        let response = self.request(Method::HEAD, url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(ObjectStoreError::UnexpectedStatus(status)),
        }
    }

    async fn fetch(&self, filename: &str) -> ObjectResult<ObjectResponse> {
        let url = self
            .object_url(filename)?
            .ok_or_else(|| ObjectStoreError::NotFound(filename.to_string()))?;
        let response = self.request(Method::GET, url).send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let name = filename.to_string();
        let stream = response.bytes_stream().inspect_err(move |err| {
            warn!(filename = %name, error = %err, "object stream aborted mid-transfer");
        });

        Ok(ObjectResponse {
            status,
            headers,
            body: Body::from_stream(stream),
        })
    }
}
