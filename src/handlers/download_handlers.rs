//! HTTP handlers for the download gate.
//! Streams object bodies without buffering and delegates the grant protocol
//! to `DownloadGate`.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

/// `Expires` value sent on every response: the Unix epoch.
pub const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Name of the query parameter carrying the filename.
pub const FILE_PARAM: &str = "file";

/// `GET /?file=<name>` — hand out `name` once.
///
/// Only `GET` is served. `HEAD` is refused too, so it never consumes a
/// filename.
#[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4(), file = tracing::field::Empty))]
pub async fn download(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if method != Method::GET {
        return Err(AppError::method_not_allowed());
    }

    // The first `file` value wins; repeats are ignored.
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&uri)
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "bad request: malformed query"))?;
    let filename = pairs
        .into_iter()
        .find_map(|(key, value)| (key == FILE_PARAM).then_some(value))
        .unwrap_or_default();
    tracing::Span::current().record("file", filename.as_str());

    let requester = state.edge_headers.requester(&headers);
    let object = state.gate.download(&filename, &requester).await?;

    let mut response = Response::new(object.body);
    *response.status_mut() = object.status;
    *response.headers_mut() = object.headers;
    Ok(response)
}

/// Anything other than `/`.
pub async fn not_found() -> AppError {
    AppError::not_found()
}

/// Mark every response as uncacheable, overriding whatever the object store sent.
pub async fn no_cache_headers(mut response: Response) -> impl IntoResponse {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, private, max-age=0"),
    );
    headers.insert(header::EXPIRES, HeaderValue::from_static(EPOCH_HTTP_DATE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
