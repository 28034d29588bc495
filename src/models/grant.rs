//! Represents the marker written once a filename has been handed out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A download grant for a single filename.
///
/// At most one grant exists per filename. It is created inside the grant
/// transaction and never updated or deleted afterwards.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Grant {
    /// Filename the grant was issued for (primary key).
    pub filename: String,

    /// Requester country as reported by the trusted edge. May be empty.
    pub country: String,

    /// Requester region as reported by the trusted edge. May be empty.
    pub region: String,

    /// When the grant was committed.
    pub downloaded_at: DateTime<Utc>,
}

/// Where a request came from, as forwarded by the trusted edge layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Requester {
    pub country: String,
    pub region: String,
}

impl Requester {
    pub fn new(country: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: region.into(),
        }
    }
}
